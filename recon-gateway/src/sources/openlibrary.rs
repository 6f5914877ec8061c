//! Open Library book search (JSON)

use crate::sources::{RecordFormatter, ServiceMetadata, SourceAdapter};
use crate::types::{NameType, Query, Record, RequestScope, TypeTag};
use async_trait::async_trait;
use recon_common::{Error, Result};
use serde::Deserialize;

pub const DEFAULT_SEARCH_URL: &str = "https://openlibrary.org/search.json";

const IDENTIFIER_SPACE: &str = "http://rdf.freebase.com/ns/user/hangy/viaf";
const VIEW_URL: &str = "https://openlibrary.org{{id}}";

fn book_type() -> TypeTag {
    TypeTag::new(NameType::Book.id(), "Book")
}

/// Open Library rejects simultaneous queries from one client
pub const POOL_SIZE: usize = 1;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    docs: Vec<OpenLibraryDoc>,
}

/// One entry of `docs`
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OpenLibraryDoc {
    /// Work key, e.g. `/works/OL45883W`
    pub key: String,
    #[serde(default)]
    pub title: String,
}

pub struct OpenLibraryAdapter {
    search_url: String,
}

impl Default for OpenLibraryAdapter {
    fn default() -> Self {
        Self::new(DEFAULT_SEARCH_URL)
    }
}

impl OpenLibraryAdapter {
    pub fn new(search_url: impl Into<String>) -> Self {
        Self {
            search_url: search_url.into(),
        }
    }

    pub fn parse_docs(&self, body: &[u8]) -> Result<Vec<OpenLibraryDoc>> {
        let response: SearchResponse = serde_json::from_slice(body)
            .map_err(|e| Error::Parse(format!("openlibrary: {}", e)))?;
        Ok(response.docs)
    }
}

impl RecordFormatter for OpenLibraryAdapter {
    type Raw = OpenLibraryDoc;

    fn format_record(&self, doc: &OpenLibraryDoc, _query: &Query) -> Record {
        Record::new(
            doc.key.clone(),
            doc.title.clone(),
            vec![book_type()],
            1.0,
            false,
        )
    }
}

#[async_trait]
impl SourceAdapter for OpenLibraryAdapter {
    fn name(&self) -> &str {
        "openlibrary"
    }

    fn display_name(&self) -> &str {
        "OpenLibrary"
    }

    fn build_request(&self, query: &Query) -> Option<String> {
        reqwest::Url::parse_with_params(&self.search_url, &[("q", query.text.as_str())])
            .ok()
            .map(String::from)
    }

    fn parse_response(&self, query: &Query, body: &[u8]) -> Result<Vec<Record>> {
        Ok(self
            .parse_docs(body)?
            .iter()
            .take(query.limit)
            .map(|doc| self.format_record(doc, query))
            .collect())
    }

    fn preferred_pool_size(&self) -> Option<usize> {
        Some(POOL_SIZE)
    }

    fn service_metadata(&self, _scope: &RequestScope) -> ServiceMetadata {
        ServiceMetadata::new(self.display_name(), IDENTIFIER_SPACE)
            .with_view(VIEW_URL)
            .with_default_types(vec![book_type()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"{
        "numFound": 4,
        "start": 0,
        "docs": [
            {"key": "/works/OL1W", "title": "Tractatus Logico-Philosophicus", "author_name": ["Ludwig Wittgenstein"]},
            {"key": "/works/OL2W", "title": "Philosophical Investigations"},
            {"key": "/works/OL3W", "title": "On Certainty"},
            {"key": "/works/OL4W"}
        ]
    }"#;

    #[test]
    fn test_parse_respects_limit() {
        let adapter = OpenLibraryAdapter::default();
        let records = adapter
            .parse_response(&Query::new("wittgenstein").with_limit(2), RESPONSE.as_bytes())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "/works/OL1W");
        assert_eq!(records[0].name, "Tractatus Logico-Philosophicus");
        assert_eq!(records[0].score, 1.0);
        assert!(!records[0].is_exact_match);
        assert_eq!(records[0].types, vec![TypeTag::new("/book/book", "Book")]);
    }

    #[test]
    fn test_missing_title_is_empty() {
        let docs = OpenLibraryAdapter::default().parse_docs(RESPONSE.as_bytes()).unwrap();
        assert_eq!(docs[3].title, "");
    }

    #[test]
    fn test_invalid_json() {
        let err = OpenLibraryAdapter::default().parse_docs(b"<html>").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_request_url() {
        let url = OpenLibraryAdapter::default()
            .build_request(&Query::new("on certainty"))
            .unwrap();
        assert_eq!(url, "https://openlibrary.org/search.json?q=on+certainty");
    }
}
