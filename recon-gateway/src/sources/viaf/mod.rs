//! VIAF (Virtual International Authority File) source
//!
//! Serves three modes through one adapter:
//! - plain: `/reconcile/viaf`, results keyed by VIAF cluster id
//! - source-specific: `/reconcile/viaf/{code}`, clusters restricted to one
//!   contributing institution and named by that institution's heading
//! - proxy: `/reconcile/viafproxy/{code}`, results keyed by the
//!   institution's own record id

pub mod cluster;
pub mod format;
pub mod parser;

use crate::parser::HandlerTable;
use crate::sources::{RecordFormatter, ServiceMetadata, SourceAdapter};
use crate::types::{NameType, Query, Record, RequestScope};
use async_trait::async_trait;
use cluster::Cluster;
use format::{ViafFormatter, ViafSource};
use parser::ViafScratch;
use recon_common::Result;
use tracing::debug;

pub const DEFAULT_SEARCH_URL: &str = "http://www.viaf.org/viaf/search";

const IDENTIFIER_SPACE: &str = "http://rdf.freebase.com/ns/user/hangy/viaf";

/// VIAF's own code for a name type (`nameType` element)
pub fn viaf_code(name_type: NameType) -> &'static str {
    match name_type {
        NameType::Person => "Personal",
        NameType::Organization => "Corporate",
        NameType::Location => "Geographic",
        NameType::Book => "UniformTitleWork",
        NameType::Edition => "UniformTitleExpression",
    }
}

pub fn name_type_from_viaf_code(code: &str) -> Option<NameType> {
    NameType::ALL.into_iter().find(|t| viaf_code(*t) == code)
}

/// CQL index searched for a name type
fn cql_index(name_type: Option<NameType>) -> &'static str {
    match name_type {
        None => "local.mainHeadingEl",
        Some(NameType::Person) => "local.personalNames",
        Some(NameType::Organization) => "local.corporateNames",
        Some(NameType::Location) => "local.geographicNames",
        Some(NameType::Book) => "local.uniformTitleWorks",
        Some(NameType::Edition) => "local.uniformTitleExpressions",
    }
}

/// CQL expression sent as VIAF's `query` parameter
///
/// A source filter only requires the cluster to have an entry from that
/// institution; it does not restrict which headings are searched.
pub fn cql_query(query: &Query) -> String {
    let text = query.text.replace('"', "\\\"");
    let mut cql = format!("{} all \"{}\"", cql_index(query.type_hint), text);
    if let Some(source) = &query.source_filter {
        cql.push_str(&format!(" and local.sources = \"{}\"", source.to_lowercase()));
    }
    cql
}

pub struct ViafAdapter {
    search_url: String,
    table: HandlerTable<Cluster, ViafScratch>,
}

impl Default for ViafAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_URL)
    }
}

impl ViafAdapter {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
            table: parser::handler_table(),
        }
    }

    /// Parse a search response into clusters without formatting
    pub fn parse_clusters(&self, body: &[u8]) -> Result<Vec<Cluster>> {
        self.table.parse_records(body)
    }
}

#[async_trait]
impl SourceAdapter for ViafAdapter {
    fn name(&self) -> &str {
        "viaf"
    }

    fn display_name(&self) -> &str {
        "VIAF"
    }

    fn build_request(&self, query: &Query) -> Option<String> {
        let limit = query.limit.to_string();
        reqwest::Url::parse_with_params(
            &self.search_url,
            &[
                ("query", cql_query(query).as_str()),
                ("sortKeys", "holdingscount"),
                ("maximumRecords", limit.as_str()),
                ("httpAccept", "application/xml"),
            ],
        )
        .ok()
        .map(String::from)
    }

    fn parse_response(&self, query: &Query, body: &[u8]) -> Result<Vec<Record>> {
        let clusters = self.parse_clusters(body)?;
        let formatter = ViafFormatter::for_query(query);

        debug!(query = %query.text, clusters = clusters.len(), "Parsed VIAF response");

        Ok(clusters
            .iter()
            .map(|cluster| formatter.format_record(cluster, query))
            .collect())
    }

    fn service_metadata(&self, scope: &RequestScope) -> ServiceMetadata {
        let (name, view) = match (&scope.source, scope.proxy_mode) {
            (Some(code), true) => (
                format!("{} (by way of VIAF)", code),
                ViafSource::Institution(code.clone()).view_url(),
            ),
            (Some(code), false) => (format!("VIAF - {}", code), ViafSource::Viaf.view_url()),
            (None, _) => ("VIAF".to_string(), ViafSource::Viaf.view_url()),
        };

        ServiceMetadata::new(name, IDENTIFIER_SPACE)
            .with_view(view)
            .with_default_types(NameType::ALL.iter().map(NameType::as_type_tag).collect())
    }
}
