//! Generic Solr source
//!
//! Everything about the upstream index comes from `[datasources.solr]`:
//! the query URL template, which document fields hold the id and the name,
//! how a multi-valued name is collapsed, and the type reported on results.

use crate::parser::{Attributes, HandlerTable, ParseState};
use crate::sources::{RecordFormatter, ServiceMetadata, SourceAdapter};
use crate::types::{NameType, Query, Record, RequestScope, TypeTag};
use async_trait::async_trait;
use recon_common::config::{DataSourceConfig, MultiValueStrategy};
use recon_common::{Error, Result};
use std::sync::Arc;
use tracing::debug;

const IDENTIFIER_SPACE: &str = "http://rdf.freebase.com/ns/user/hangy/viaf";

/// One `doc` element of a Solr response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolrDoc {
    pub id: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Id,
    Name,
}

#[derive(Debug, Default)]
struct SolrScratch {
    field: Option<Field>,
    values: Vec<String>,
    /// First malformed score seen
    bad_score: Option<String>,
}

type SolrState = ParseState<SolrDoc, SolrScratch>;

/// Field mapping shared by the response handlers
#[derive(Debug, Clone)]
struct FieldMapping {
    id: String,
    name: String,
    strategy: MultiValueStrategy,
    delimiter: String,
}

impl FieldMapping {
    fn field_for(&self, attrs: &Attributes) -> Option<Field> {
        match attrs.get("name") {
            Some(name) if name == self.id => Some(Field::Id),
            Some(name) if name == self.name => Some(Field::Name),
            _ => None,
        }
    }

    fn collapse(&self, values: &[String]) -> Option<String> {
        match self.strategy {
            MultiValueStrategy::Concat => Some(values.join(&self.delimiter)),
            MultiValueStrategy::First => values.first().cloned(),
        }
    }
}

fn handler_table(mapping: FieldMapping) -> HandlerTable<SolrDoc, SolrScratch> {
    let mapping = Arc::new(mapping);
    let arr_mapping = Arc::clone(&mapping);
    let arr_end_mapping = Arc::clone(&mapping);
    let str_mapping = mapping;

    HandlerTable::<SolrDoc, SolrScratch>::new()
        .on_start("response/result/doc", |state, _| {
            state.current = Some(SolrDoc::default());
        })
        .on_end("response/result/doc", |state| state.finish_current())
        // Multi-valued fields
        .on_start("response/result/doc/arr", move |state, attrs| {
            state.scratch.field = arr_mapping.field_for(attrs);
        })
        .on_start("response/result/doc/arr/str", |state, _| {
            if state.scratch.field.is_some() {
                state.start_capture();
            }
        })
        .on_end("response/result/doc/arr/str", |state| {
            let text = state.take_text();
            if state.scratch.field == Some(Field::Name) {
                state.scratch.values.push(text);
            }
        })
        .on_end("response/result/doc/arr", move |state| {
            let values = std::mem::take(&mut state.scratch.values);
            if state.scratch.field.take() == Some(Field::Name) {
                if let (Some(name), Some(doc)) =
                    (arr_end_mapping.collapse(&values), state.current.as_mut())
                {
                    doc.name = name;
                }
            }
        })
        // Single-valued fields
        .on_start("response/result/doc/str", move |state, attrs| {
            state.scratch.field = str_mapping.field_for(attrs);
            if state.scratch.field.is_some() {
                state.start_capture();
            }
        })
        .on_end("response/result/doc/str", |state| {
            let text = state.take_text();
            let field = state.scratch.field.take();
            if let Some(doc) = state.current.as_mut() {
                match field {
                    Some(Field::Id) => doc.id = text,
                    Some(Field::Name) => doc.name = text,
                    None => {}
                }
            }
        })
        .on_start("response/result/doc/float", |state, attrs| {
            if attrs.get("name") == Some("score") {
                state.start_capture();
            }
        })
        .on_end("response/result/doc/float", |state: &mut SolrState| {
            if !state.capturing {
                return;
            }
            let text = state.take_text();
            match text.trim().parse::<f64>() {
                Ok(score) => {
                    if let Some(doc) = state.current.as_mut() {
                        doc.score = score;
                    }
                }
                Err(_) => {
                    state.scratch.bad_score.get_or_insert(text);
                }
            }
        })
}

pub struct SolrAdapter {
    display_name: String,
    url_template: String,
    view_url: Option<String>,
    name_type: Option<TypeTag>,
    table: HandlerTable<SolrDoc, SolrScratch>,
}

impl std::fmt::Debug for SolrAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SolrAdapter")
            .field("display_name", &self.display_name)
            .field("url_template", &self.url_template)
            .finish()
    }
}

impl SolrAdapter {
    /// Build from a `[datasources.solr]` table
    ///
    /// Fails with a configuration error when the URL template or either
    /// field name is missing.
    pub fn from_config(config: &DataSourceConfig) -> Result<Self> {
        let required = |value: &Option<String>, key: &str| {
            value
                .clone()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| Error::Config(format!("solr: missing required key '{}'", key)))
        };

        let url_template = required(&config.url, "url")?;
        let mapping = FieldMapping {
            id: required(&config.field_id, "field_id")?,
            name: required(&config.field_name, "field_name")?,
            strategy: config.field_name_multivalue_strategy,
            delimiter: config.field_name_multivalue_delimiter.clone(),
        };

        let name_type = config.nametype_id.as_ref().map(|id| {
            TypeTag::new(id.clone(), config.nametype_name.clone().unwrap_or_default())
        });

        Ok(Self {
            display_name: config.name.clone().unwrap_or_else(|| "Solr".to_string()),
            url_template,
            view_url: config.url_document.clone(),
            name_type,
            table: handler_table(mapping),
        })
    }

    /// Parse a Solr XML response into raw documents
    pub fn parse_docs(&self, body: &[u8]) -> Result<Vec<SolrDoc>> {
        let state = self.table.parse(body)?;
        if let Some(bad) = state.scratch.bad_score {
            return Err(Error::Parse(format!("solr: invalid score '{}'", bad)));
        }
        Ok(state.results)
    }
}

impl RecordFormatter for SolrAdapter {
    type Raw = SolrDoc;

    fn format_record(&self, doc: &SolrDoc, _query: &Query) -> Record {
        Record::new(
            doc.id.clone(),
            doc.name.clone(),
            self.name_type.iter().cloned().collect(),
            doc.score,
            false,
        )
    }
}

#[async_trait]
impl SourceAdapter for SolrAdapter {
    fn name(&self) -> &str {
        "solr"
    }

    fn display_name(&self) -> &str {
        &self.display_name
    }

    fn build_request(&self, query: &Query) -> Option<String> {
        let encoded: String = url::form_urlencoded::byte_serialize(query.text.as_bytes()).collect();
        Some(
            self.url_template
                .replace("{{QUERY}}", &encoded)
                .replace("{{ROWS}}", &query.limit.to_string()),
        )
    }

    fn parse_response(&self, query: &Query, body: &[u8]) -> Result<Vec<Record>> {
        let docs = self.parse_docs(body)?;
        debug!(query = %query.text, results = docs.len(), "Parsed Solr response");
        Ok(docs.iter().map(|doc| self.format_record(doc, query)).collect())
    }

    fn service_metadata(&self, _scope: &RequestScope) -> ServiceMetadata {
        let metadata = ServiceMetadata::new(self.display_name.clone(), IDENTIFIER_SPACE)
            .with_default_types(NameType::ALL.iter().map(NameType::as_type_tag).collect());
        match &self.view_url {
            Some(url) => metadata.with_view(url.clone()),
            None => metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESPONSE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<response>
  <lst name="responseHeader"><int name="status">0</int></lst>
  <result name="response" numFound="2" start="0" maxScore="4.2">
    <doc>
      <str name="id">b1</str>
      <arr name="title">
        <str>Tractatus logico-philosophicus</str>
        <str>Logisch-philosophische Abhandlung</str>
      </arr>
      <arr name="subject"><str>Logic</str></arr>
      <float name="score">0.75</float>
    </doc>
    <doc>
      <str name="id">b2</str>
      <str name="title">Philosophical investigations</str>
      <float name="score">4.2</float>
    </doc>
  </result>
</response>"#;

    fn config(strategy: MultiValueStrategy) -> DataSourceConfig {
        DataSourceConfig {
            name: Some("Library Catalog".to_string()),
            url: Some("http://localhost:8983/solr/select?q={{QUERY}}&rows={{ROWS}}".to_string()),
            url_document: Some("http://localhost/catalog/{{id}}".to_string()),
            field_id: Some("id".to_string()),
            field_name: Some("title".to_string()),
            field_name_multivalue_strategy: strategy,
            nametype_id: Some("/book/book".to_string()),
            nametype_name: Some("Book".to_string()),
            ..DataSourceConfig::default()
        }
    }

    #[test]
    fn test_missing_required_keys() {
        let mut cfg = config(MultiValueStrategy::Concat);
        cfg.field_name = None;
        let err = SolrAdapter::from_config(&cfg).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("field_name")));

        let err = SolrAdapter::from_config(&DataSourceConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_url_template() {
        let adapter = SolrAdapter::from_config(&config(MultiValueStrategy::Concat)).unwrap();
        let url = adapter
            .build_request(&Query::new("tractatus logico").with_limit(5))
            .unwrap();
        assert_eq!(
            url,
            "http://localhost:8983/solr/select?q=tractatus+logico&rows=5"
        );
    }

    #[test]
    fn test_concat_strategy() {
        let adapter = SolrAdapter::from_config(&config(MultiValueStrategy::Concat)).unwrap();
        let records = adapter
            .parse_response(&Query::new("tractatus"), RESPONSE.as_bytes())
            .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "b1");
        assert_eq!(
            records[0].name,
            "Tractatus logico-philosophicus, Logisch-philosophische Abhandlung"
        );
        assert_eq!(records[0].score, 0.75);
        assert_eq!(records[0].types, vec![TypeTag::new("/book/book", "Book")]);
        assert_eq!(records[1].name, "Philosophical investigations");
        // Raw Solr relevance is clamped into [0, 1]
        assert_eq!(records[1].score, 1.0);
    }

    #[test]
    fn test_first_strategy() {
        let adapter = SolrAdapter::from_config(&config(MultiValueStrategy::First)).unwrap();
        let docs = adapter.parse_docs(RESPONSE.as_bytes()).unwrap();
        assert_eq!(docs[0].name, "Tractatus logico-philosophicus");
    }

    #[test]
    fn test_bad_score_is_parse_error() {
        let adapter = SolrAdapter::from_config(&config(MultiValueStrategy::First)).unwrap();
        let body = r#"<response><result><doc><str name="id">x</str><float name="score">high</float></doc></result></response>"#;
        assert!(matches!(adapter.parse_docs(body.as_bytes()), Err(Error::Parse(_))));
    }

    #[test]
    fn test_metadata_uses_configured_name_and_view() {
        let adapter = SolrAdapter::from_config(&config(MultiValueStrategy::Concat)).unwrap();
        let metadata = adapter.service_metadata(&RequestScope::default());
        assert_eq!(metadata.name, "Library Catalog");
        assert_eq!(metadata.view.unwrap().url, "http://localhost/catalog/{{id}}");
        assert_eq!(metadata.default_types.len(), NameType::ALL.len());
    }
}
