//! Upstream source adapters
//!
//! Each adapter knows how to turn a [`Query`] into a request URL and a
//! response body into [`Record`]s. The orchestrator, pool and cache only
//! depend on [`SourceAdapter`].

pub mod openlibrary;
pub mod orcid;
pub mod solr;
pub mod viaf;

use crate::services::connection::ConnectionFactory;
use crate::types::{Query, Record, RequestScope, TypeTag};
use async_trait::async_trait;
use recon_common::Result;
use serde::Serialize;

pub use openlibrary::OpenLibraryAdapter;
pub use orcid::OrcidAdapter;
pub use solr::SolrAdapter;
pub use viaf::ViafAdapter;

/// Capability interface implemented by every source
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Registry key and cache namespace (e.g. "viaf")
    fn name(&self) -> &str;

    /// Human readable service name
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Request URL for `query`, or `None` when the query cannot be expressed
    /// for this source (answered with an empty result, no request is made)
    fn build_request(&self, query: &Query) -> Option<String>;

    /// Turn a response body into records, in response order
    fn parse_response(&self, query: &Query, body: &[u8]) -> Result<Vec<Record>>;

    /// Service description returned when a client sends no query
    fn service_metadata(&self, scope: &RequestScope) -> ServiceMetadata;

    /// Pool size this source needs regardless of the configured default
    fn preferred_pool_size(&self) -> Option<usize> {
        None
    }

    /// Run one query end to end
    async fn fetch(&self, query: &Query, connector: &dyn ConnectionFactory) -> Result<Vec<Record>> {
        let Some(url) = self.build_request(query) else {
            return Ok(Vec::new());
        };
        let body = connector.open(&url).await?;
        self.parse_response(query, &body)
    }
}

/// Conversion of a source-specific parsed match into a [`Record`]
pub trait RecordFormatter {
    type Raw;

    fn format_record(&self, raw: &Self::Raw, query: &Query) -> Record;
}

/// View template for result ids
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct View {
    pub url: String,
}

/// Reconciliation service description
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMetadata {
    pub name: String,
    pub identifier_space: String,
    pub schema_space: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<View>,
    pub default_types: Vec<TypeTag>,
}

/// Schema space shared by every source
pub const SCHEMA_SPACE: &str = "http://rdf.freebase.com/ns/type.object.id";

impl ServiceMetadata {
    pub fn new(name: impl Into<String>, identifier_space: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            identifier_space: identifier_space.into(),
            schema_space: SCHEMA_SPACE.to_string(),
            view: None,
            default_types: Vec::new(),
        }
    }

    pub fn with_view(mut self, url: impl Into<String>) -> Self {
        self.view = Some(View { url: url.into() });
        self
    }

    pub fn with_default_types(mut self, types: Vec<TypeTag>) -> Self {
        self.default_types = types;
        self
    }
}
