//! Turning VIAF clusters into client records
//!
//! In plain mode the record id is the VIAF cluster id. In proxy mode the
//! gateway answers as if it were the contributing institution, so the id
//! is that institution's own record id.

use super::cluster::Cluster;
use crate::sources::RecordFormatter;
use crate::types::{name_similarity, Query, Record};

/// View template for VIAF cluster ids
pub const VIAF_VIEW_URL: &str = "http://viaf.org/viaf/{{id}}";

/// Institution view templates, where the institution exposes one keyed by
/// its own record id
fn institution_view_url(code: &str) -> Option<&'static str> {
    let url = match code {
        "BNE" => "http://catalogo.bne.es/uhtbin/authoritybrowse.cgi?action=display&authority_id={{id}}",
        "DNB" => "http://d-nb.info/gnd/{{id}}",
        "ICCU" => "http://id.sbn.it/af/{{id}}",
        "JPG" => "http://www.getty.edu/vow/ULANFullDisplay?find=&role=&nation=&subjectid={{id}}",
        "LC" => "http://id.loc.gov/authorities/names/{{id}}",
        "NDL" => "http://id.ndl.go.jp/auth/ndlna/{{id}}",
        "SELIBR" => "http://libris.kb.se/resource/auth/{{id}}",
        "SUDOC" => "http://www.idref.fr/{{id}}/id",
        "WKP" => "http://www.wikidata.org/entity/{{id}}#sitelinks-wikipedia",
        _ => return None,
    };
    Some(url)
}

/// Which identifier space results are expressed in
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViafSource {
    Viaf,
    /// A contributing institution, by code
    Institution(String),
}

impl ViafSource {
    pub fn for_query(query: &Query) -> Self {
        match (&query.source_filter, query.proxy_mode) {
            (Some(code), true) => ViafSource::Institution(code.clone()),
            _ => ViafSource::Viaf,
        }
    }

    /// View template for ids of this source
    pub fn view_url(&self) -> String {
        match self {
            ViafSource::Viaf => VIAF_VIEW_URL.to_string(),
            ViafSource::Institution(code) => institution_view_url(code)
                .map(str::to_string)
                .unwrap_or_else(|| format!("https://viaf.org/viaf/sourceID/{}|{{{{id}}}}", code)),
        }
    }

    /// Normalize an id for use in view URLs
    pub fn format_id(&self, id: &str) -> String {
        match self {
            // VIAF pads LC ids with spaces ("n  79081460")
            ViafSource::Institution(code) if code == "LC" => id.replace(' ', ""),
            _ => id.to_string(),
        }
    }
}

/// Formats clusters for one query's identifier space
pub struct ViafFormatter {
    source: ViafSource,
}

impl ViafFormatter {
    pub fn new(source: ViafSource) -> Self {
        Self { source }
    }

    pub fn for_query(query: &Query) -> Self {
        Self::new(ViafSource::for_query(query))
    }

    fn record_id(&self, cluster: &Cluster) -> String {
        match &self.source {
            ViafSource::Viaf => cluster.viaf_id.clone(),
            ViafSource::Institution(code) => {
                let id = cluster
                    .source_name_id(code)
                    // VIAF sometimes gives the institution id as a URL
                    .filter(|id| !id.starts_with("http"))
                    .or_else(|| cluster.name_id(code))
                    .unwrap_or("0");
                self.source.format_id(id)
            }
        }
    }
}

impl RecordFormatter for ViafFormatter {
    type Raw = Cluster;

    fn format_record(&self, cluster: &Cluster, query: &Query) -> Record {
        let name = match &query.source_filter {
            Some(code) => cluster.name_by_source(code),
            None => cluster.exact_or_most_common_name(&query.text),
        }
        .unwrap_or_default();

        let types = cluster
            .name_type
            .map(|t| vec![t.as_type_tag()])
            .unwrap_or_default();

        Record::new(
            self.record_id(cluster),
            name,
            types,
            name_similarity(name, &query.text),
            name == query.text,
        )
    }
}
