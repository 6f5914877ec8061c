//! ORCID researcher registry source
//!
//! A search returns only ORCID iDs, so each hit is filled in with a second
//! request for the individual record. Fill-in requests for one query run
//! concurrently, bounded by [`RECORD_FETCH_CONCURRENCY`].
//!
//! Smart-names mode first tries a fielded `given-names`/`family-name`
//! search when the query looks like a two-part personal name, and falls
//! back to the keyword search when that finds nothing.

use crate::parser::HandlerTable;
use crate::services::connection::ConnectionFactory;
use crate::sources::{RecordFormatter, ServiceMetadata, SourceAdapter};
use crate::types::{name_similarity, NameType, Query, Record, RequestScope};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use recon_common::{Error, Result};
use tracing::{debug, warn};

pub const DEFAULT_API_URL: &str = "https://pub.orcid.org/v2.1";

/// Maximum concurrent individual-record requests per query
pub const RECORD_FETCH_CONCURRENCY: usize = 20;

const IDENTIFIER_SPACE: &str = "http://xmlns.com/foaf/0.1/";
const VIEW_URL: &str = "https://orcid.org/{{id}}";

/// One search hit, filled in from the individual record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrcidHit {
    pub id: String,
    pub given_names: Option<String>,
    pub family_name: Option<String>,
}

impl OrcidHit {
    /// "Given Family", or whichever part exists
    pub fn display_name(&self) -> String {
        [self.given_names.as_deref(), self.family_name.as_deref()]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
struct PersonName {
    given_names: Option<String>,
    family_name: Option<String>,
}

fn search_table() -> HandlerTable<OrcidHit, ()> {
    HandlerTable::<OrcidHit, ()>::new()
        .on_start("search/result", |state, _| {
            state.current = Some(OrcidHit::default());
        })
        .capture("search/result/orcid-identifier/path", |state, text| {
            if let Some(hit) = state.current.as_mut() {
                hit.id = text.trim().to_string();
            }
        })
        .on_end("search/result", |state| state.finish_current())
}

fn record_table() -> HandlerTable<(), PersonName> {
    HandlerTable::<(), PersonName>::new()
        .capture("record/person/name/given-names", |state, text| {
            state.scratch.given_names = Some(text.trim().to_string());
        })
        .capture("record/person/name/family-name", |state, text| {
            state.scratch.family_name = Some(text.trim().to_string());
        })
}

/// Split a personal name into (given, family)
///
/// Accepts "Family, Given" (exactly one comma) or exactly two
/// whitespace-separated words "Given Family".
pub fn parse_name(name: &str) -> Option<(String, String)> {
    if name.matches(',').count() == 1 {
        let (family, given) = name.split_once(',')?;
        let (given, family) = (given.trim(), family.trim());
        if given.is_empty() || family.is_empty() {
            return None;
        }
        return Some((given.to_string(), family.to_string()));
    }

    let pieces: Vec<&str> = name.split_whitespace().collect();
    match pieces.as_slice() {
        [given, family] => Some((given.to_string(), family.to_string())),
        _ => None,
    }
}

pub struct OrcidAdapter {
    api_url: String,
    search_table: HandlerTable<OrcidHit, ()>,
    record_table: HandlerTable<(), PersonName>,
}

impl Default for OrcidAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_API_URL)
    }
}

impl OrcidAdapter {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            search_table: search_table(),
            record_table: record_table(),
        }
    }

    fn search_url(&self, query: &Query, q: &str) -> Option<String> {
        let limit = query.limit.to_string();
        reqwest::Url::parse_with_params(
            &format!("{}/search/", self.api_url),
            &[("rows", limit.as_str()), ("q", q)],
        )
        .ok()
        .map(String::from)
    }

    /// Plain keyword search URL
    pub fn keyword_url(&self, query: &Query) -> Option<String> {
        self.search_url(query, &query.text)
    }

    /// Fielded name search URL, when the query parses as a personal name
    pub fn smart_names_url(&self, query: &Query) -> Option<String> {
        let (given, family) = parse_name(&query.text)?;
        self.search_url(
            query,
            &format!("given-names:{} AND family-name:{}", given, family),
        )
    }

    pub fn record_url(&self, orcid_id: &str) -> String {
        format!("{}/{}/record", self.api_url, orcid_id)
    }

    /// Hits (ids only) from a search response
    pub fn parse_search_hits(&self, body: &[u8]) -> Result<Vec<OrcidHit>> {
        self.search_table.parse_records(body)
    }

    async fn search_hits(&self, url: &str, connector: &dyn ConnectionFactory) -> Result<Vec<OrcidHit>> {
        let body = connector.open(url).await?;
        self.parse_search_hits(&body)
    }

    async fn fill_in(&self, mut hit: OrcidHit, connector: &dyn ConnectionFactory) -> Result<OrcidHit> {
        let url = self.record_url(&hit.id);
        debug!(orcid = %hit.id, url = %url, "Filling in ORCID result");

        let body = connector.open(&url).await?;
        let name = self.record_table.parse(&body)?.scratch;
        hit.given_names = name.given_names;
        hit.family_name = name.family_name;

        if hit.given_names.is_none() && hit.family_name.is_none() {
            warn!(orcid = %hit.id, "Name not found in ORCID record");
        }
        Ok(hit)
    }

    /// Fill in every hit, keeping search order
    ///
    /// A throttled fill-in fails the whole query; other failures drop that
    /// hit only.
    async fn fill_in_all(
        &self,
        hits: Vec<OrcidHit>,
        connector: &dyn ConnectionFactory,
    ) -> Result<Vec<OrcidHit>> {
        let results: Vec<(String, Result<OrcidHit>)> = stream::iter(hits)
            .map(|hit| async move {
                let id = hit.id.clone();
                (id, self.fill_in(hit, connector).await)
            })
            .buffered(RECORD_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut filled = Vec::with_capacity(results.len());
        for (id, result) in results {
            match result {
                Ok(hit) => filled.push(hit),
                Err(Error::Throttled(message)) => return Err(Error::Throttled(message)),
                Err(e) => warn!(orcid = %id, error = %e, "Dropping ORCID result"),
            }
        }
        Ok(filled)
    }
}

impl RecordFormatter for OrcidAdapter {
    type Raw = OrcidHit;

    fn format_record(&self, hit: &OrcidHit, query: &Query) -> Record {
        let name = hit.display_name();
        let score = if name.is_empty() {
            0.0
        } else {
            name_similarity(&name, &query.text)
        };
        Record::new(
            hit.id.clone(),
            name,
            vec![NameType::Person.as_type_tag()],
            score,
            false,
        )
    }
}

#[async_trait]
impl SourceAdapter for OrcidAdapter {
    fn name(&self) -> &str {
        "orcid"
    }

    fn display_name(&self) -> &str {
        "ORCID"
    }

    fn build_request(&self, query: &Query) -> Option<String> {
        if query.extra_mode_flags {
            if let Some(url) = self.smart_names_url(query) {
                return Some(url);
            }
        }
        self.keyword_url(query)
    }

    /// A search response alone has ids but no names; records come from [`Self::fetch`]
    fn parse_response(&self, _query: &Query, _body: &[u8]) -> Result<Vec<Record>> {
        Err(Error::Internal(
            "ORCID results need a record fill-in per hit, use fetch".to_string(),
        ))
    }

    fn service_metadata(&self, scope: &RequestScope) -> ServiceMetadata {
        let name = if scope.extra_mode {
            "ORCID - Smart Names Mode"
        } else {
            "ORCID"
        };
        ServiceMetadata::new(name, IDENTIFIER_SPACE)
            .with_view(VIEW_URL)
            .with_default_types(vec![NameType::Person.as_type_tag()])
    }

    async fn fetch(&self, query: &Query, connector: &dyn ConnectionFactory) -> Result<Vec<Record>> {
        let mut hits = Vec::new();

        if query.extra_mode_flags {
            if let Some(url) = self.smart_names_url(query) {
                hits = self.search_hits(&url, connector).await?;
            }
        }
        if hits.is_empty() {
            let Some(url) = self.keyword_url(query) else {
                return Ok(Vec::new());
            };
            hits = self.search_hits(&url, connector).await?;
        }

        let filled = self.fill_in_all(hits, connector).await?;
        Ok(filled
            .iter()
            .map(|hit| self.format_record(hit, query))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::connection::TransportError;
    use crate::types::RequestScope;
    use std::sync::Mutex;

    const SEARCH: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<search:search num-found="2" xmlns:search="http://www.orcid.org/ns/search" xmlns:common="http://www.orcid.org/ns/common">
    <search:result>
        <common:orcid-identifier>
            <common:uri>https://orcid.org/0000-0002-1825-0097</common:uri>
            <common:path>0000-0002-1825-0097</common:path>
            <common:host>orcid.org</common:host>
        </common:orcid-identifier>
    </search:result>
    <search:result>
        <common:orcid-identifier>
            <common:path>0000-0001-5109-3700</common:path>
        </common:orcid-identifier>
    </search:result>
</search:search>"#;

    fn record(given: &str, family: &str) -> String {
        format!(
            r#"<record:record xmlns:record="http://www.orcid.org/ns/record" xmlns:person="http://www.orcid.org/ns/person" xmlns:personal-details="http://www.orcid.org/ns/personal-details">
  <person:person>
    <person:name>
      <personal-details:given-names>{}</personal-details:given-names>
      <personal-details:family-name>{}</personal-details:family-name>
    </person:name>
  </person:person>
</record:record>"#,
            given, family
        )
    }

    /// Serves canned bodies by URL substring and records requests
    struct Canned {
        routes: Vec<(String, std::result::Result<String, u16>)>,
        requests: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectionFactory for Canned {
        async fn open(&self, url: &str) -> std::result::Result<Vec<u8>, TransportError> {
            self.requests.lock().unwrap().push(url.to_string());
            for (pattern, response) in &self.routes {
                if url.contains(pattern.as_str()) {
                    return match response {
                        Ok(body) => Ok(body.clone().into_bytes()),
                        Err(status) => Err(TransportError::from_status(*status, url)),
                    };
                }
            }
            Err(TransportError::from_status(404, url))
        }
    }

    fn canned(routes: Vec<(&str, std::result::Result<String, u16>)>) -> Canned {
        Canned {
            routes: routes.into_iter().map(|(p, r)| (p.to_string(), r)).collect(),
            requests: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_parse_name() {
        assert_eq!(parse_name("Carberry, Josiah"), Some(("Josiah".into(), "Carberry".into())));
        assert_eq!(parse_name("Josiah Carberry"), Some(("Josiah".into(), "Carberry".into())));
        assert_eq!(parse_name("Josiah Stinkney Carberry"), None);
        assert_eq!(parse_name("Carberry,"), None);
        assert_eq!(parse_name("Carberry"), None);
    }

    #[test]
    fn test_parse_search_hits() {
        let hits = OrcidAdapter::default().parse_search_hits(SEARCH.as_bytes()).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["0000-0002-1825-0097", "0000-0001-5109-3700"]);
    }

    #[test]
    fn test_parse_response_refuses_unfilled_hits() {
        let adapter = OrcidAdapter::default();
        let result = adapter.parse_response(&Query::new("carberry"), SEARCH.as_bytes());
        assert!(matches!(result, Err(Error::Internal(_))));
    }

    #[test]
    fn test_smart_names_url() {
        let adapter = OrcidAdapter::default();
        let query = Query::new("Carberry, Josiah").with_scope(&RequestScope {
            extra_mode: true,
            ..RequestScope::default()
        });
        let url = adapter.build_request(&query).unwrap();
        assert!(url.starts_with("https://pub.orcid.org/v2.1/search/?rows=3&q="));
        assert!(url.contains("given-names%3AJosiah"));
        assert!(url.contains("family-name%3ACarberry"));
    }

    #[tokio::test]
    async fn test_fetch_fills_in_names_in_order() {
        let adapter = OrcidAdapter::default();
        let connector = canned(vec![
            ("/search/", Ok(SEARCH.to_string())),
            ("0000-0002-1825-0097/record", Ok(record("Josiah", "Carberry"))),
            ("0000-0001-5109-3700/record", Ok(record("Jo", "Carberry"))),
        ]);

        let records = adapter.fetch(&Query::new("Josiah Carberry"), &connector).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "0000-0002-1825-0097");
        assert_eq!(records[0].name, "Josiah Carberry");
        assert_eq!(records[0].score, 1.0);
        assert!(!records[0].is_exact_match);
        assert_eq!(records[1].name, "Jo Carberry");
    }

    #[tokio::test]
    async fn test_failed_fill_in_drops_hit() {
        let adapter = OrcidAdapter::default();
        let connector = canned(vec![
            ("/search/", Ok(SEARCH.to_string())),
            ("0000-0002-1825-0097/record", Ok(record("Josiah", "Carberry"))),
            ("0000-0001-5109-3700/record", Err(500)),
        ]);

        let records = adapter.fetch(&Query::new("Josiah Carberry"), &connector).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_throttled_fill_in_fails_query() {
        let adapter = OrcidAdapter::default();
        let connector = canned(vec![
            ("/search/", Ok(SEARCH.to_string())),
            ("/record", Err(429)),
        ]);

        let err = adapter.fetch(&Query::new("Josiah Carberry"), &connector).await.unwrap_err();
        assert!(matches!(err, Error::Throttled(_)));
    }

    #[tokio::test]
    async fn test_smart_names_falls_back_to_keyword() {
        let adapter = OrcidAdapter::default();
        let empty = r#"<search:search num-found="0" xmlns:search="http://www.orcid.org/ns/search"/>"#;
        let connector = canned(vec![
            ("given-names", Ok(empty.to_string())),
            ("/search/", Ok(SEARCH.to_string())),
            ("/record", Ok(record("Josiah", "Carberry"))),
        ]);
        let query = Query::new("Carberry, Josiah").with_scope(&RequestScope {
            extra_mode: true,
            ..RequestScope::default()
        });

        let records = adapter.fetch(&query, &connector).await.unwrap();
        assert_eq!(records.len(), 2);

        let requests = connector.requests.lock().unwrap();
        let searches: Vec<&String> = requests.iter().filter(|u| u.contains("/search/")).collect();
        assert_eq!(searches.len(), 2);
        assert!(searches[0].contains("given-names"));
        assert!(!searches[1].contains("given-names"));
    }

    #[test]
    fn test_display_name_parts() {
        let hit = OrcidHit {
            id: "x".into(),
            given_names: None,
            family_name: Some("Carberry".into()),
        };
        assert_eq!(hit.display_name(), "Carberry");
        assert_eq!(OrcidHit::default().display_name(), "");
    }
}
