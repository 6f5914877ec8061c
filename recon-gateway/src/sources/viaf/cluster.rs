//! VIAF authority cluster model and source-id association

use crate::types::NameType;
use std::collections::BTreeMap;

/// Composite source key ("LC|n  79021164") to the contributing
/// institution's own record id ("n79021164")
pub type SourceIdMap = BTreeMap<String, String>;

/// Split a composite `SOURCE|ID` key
pub fn split_source_id(source_id: &str) -> Option<(&str, &str)> {
    let (code, id) = source_id.split_once('|')?;
    if code.is_empty() || id.contains('|') {
        return None;
    }
    Some((code, id))
}

/// An institution asserting a name heading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameSource {
    /// Institution code (LC, DNB, BNF, ...)
    pub code: String,
    /// VIAF's composite key for this institution's record, when listed
    pub viaf_source_id: Option<String>,
    /// The institution's own record id, filled in by association
    pub source_name_id: Option<String>,
}

impl NameSource {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_source_id(code: impl Into<String>, viaf_source_id: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            viaf_source_id: Some(viaf_source_id.into()),
            source_name_id: None,
        }
    }

    /// Record id half of the composite key
    pub fn name_id(&self) -> Option<&str> {
        self.viaf_source_id
            .as_deref()
            .and_then(split_source_id)
            .map(|(_, id)| id)
    }
}

/// One main heading and the institutions that use it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NameEntry {
    pub name: String,
    pub sources: Vec<NameSource>,
}

/// One VIAF cluster as parsed from a search response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cluster {
    pub viaf_id: String,
    pub name_type: Option<NameType>,
    pub name_entries: Vec<NameEntry>,
}

impl Cluster {
    /// Attach institution record ids from the cluster's `sources` mapping to
    /// every name source
    ///
    /// An exact composite-key match always wins. Otherwise the first key in
    /// `mappings` whose code equals the source's code is used, once per
    /// source.
    pub fn associate_source_ids(&mut self, mappings: &SourceIdMap) {
        for source in self.name_entries.iter_mut().flat_map(|e| e.sources.iter_mut()) {
            let exact = source
                .viaf_source_id
                .as_deref()
                .and_then(|key| mappings.get(key));

            if let Some(id) = exact {
                source.source_name_id = Some(id.clone());
                continue;
            }

            let fallback = mappings.iter().find(|(key, _)| {
                split_source_id(key).is_some_and(|(code, _)| code == source.code)
            });

            if let Some((key, id)) = fallback {
                source.source_name_id = Some(id.clone());
                if source.viaf_source_id.is_none() {
                    source.viaf_source_id = Some(key.clone());
                }
            }
        }
    }

    fn source_for(&self, code: &str) -> Option<(&NameEntry, &NameSource)> {
        self.name_entries.iter().find_map(|entry| {
            entry
                .sources
                .iter()
                .find(|s| s.code == code)
                .map(|source| (entry, source))
        })
    }

    /// First heading attributed to `code`
    pub fn name_by_source(&self, code: &str) -> Option<&str> {
        self.source_for(code).map(|(entry, _)| entry.name.as_str())
    }

    /// Institution's own record id for `code`
    pub fn source_name_id(&self, code: &str) -> Option<&str> {
        self.source_for(code)
            .and_then(|(_, source)| source.source_name_id.as_deref())
    }

    /// VIAF's record id for `code` (from the composite key)
    pub fn name_id(&self, code: &str) -> Option<&str> {
        self.source_for(code).and_then(|(_, source)| source.name_id())
    }

    /// Heading equal to `query_text`, else the one with the most sources
    ///
    /// Ties go to the heading seen first.
    pub fn exact_or_most_common_name(&self, query_text: &str) -> Option<&str> {
        let mut best: Option<&NameEntry> = None;
        for entry in &self.name_entries {
            if entry.name == query_text {
                return Some(&entry.name);
            }
            if best.map_or(true, |b| entry.sources.len() > b.sources.len()) {
                best = Some(entry);
            }
        }
        best.map(|entry| entry.name.as_str())
    }
}
