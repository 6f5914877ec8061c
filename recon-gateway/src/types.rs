//! Core request and result types shared by the engine and every source adapter

use serde::{Deserialize, Serialize};

/// Default number of candidates requested when a client does not say
pub const DEFAULT_LIMIT: usize = 3;

/// Default `type_strict` value sent by reconciliation clients
pub const DEFAULT_STRICTNESS: &str = "should";

// ============================================================================
// Entity types
// ============================================================================

/// Entity type a query may be restricted to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameType {
    Person,
    Organization,
    Location,
    Book,
    Edition,
}

impl NameType {
    pub const ALL: [NameType; 5] = [
        NameType::Person,
        NameType::Organization,
        NameType::Location,
        NameType::Book,
        NameType::Edition,
    ];

    /// Type identifier used on the wire (e.g. `/people/person`)
    pub fn id(&self) -> &'static str {
        match self {
            NameType::Person => "/people/person",
            NameType::Organization => "/organization/organization",
            NameType::Location => "/location/location",
            NameType::Book => "/book/book",
            NameType::Edition => "/book/book edition",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            NameType::Person => "Person",
            NameType::Organization => "Corporate Name",
            NameType::Location => "Geographic Name",
            NameType::Book => "Work",
            NameType::Edition => "Expression",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.id() == id)
    }

    pub fn as_type_tag(&self) -> TypeTag {
        TypeTag::new(self.id(), self.display_name())
    }
}

/// Type attached to a result; equality compares both fields
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeTag {
    pub id: String,
    pub name: String,
}

impl TypeTag {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

// ============================================================================
// Query
// ============================================================================

/// A single reconciliation query
///
/// Built once from request parameters and never modified afterwards; every
/// field participates in [`Query::fingerprint`].
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Name text to match (trimmed)
    pub text: String,
    /// Maximum number of candidates
    pub limit: usize,
    pub type_hint: Option<NameType>,
    pub strictness: Option<String>,
    /// Restrict VIAF clusters to those containing this institution code
    pub source_filter: Option<String>,
    /// Return the institution's own identifiers instead of VIAF ids
    pub proxy_mode: bool,
    /// Source-specific alternate search mode (ORCID smart names)
    pub extra_mode_flags: bool,
}

impl Query {
    pub fn new(text: impl AsRef<str>) -> Self {
        Self {
            text: text.as_ref().trim().to_string(),
            limit: DEFAULT_LIMIT,
            type_hint: None,
            strictness: Some(DEFAULT_STRICTNESS.to_string()),
            source_filter: None,
            proxy_mode: false,
            extra_mode_flags: false,
        }
    }

    /// Set the limit; 0 falls back to the default
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = if limit == 0 { DEFAULT_LIMIT } else { limit };
        self
    }

    pub fn with_type_hint(mut self, type_hint: Option<NameType>) -> Self {
        self.type_hint = type_hint;
        self
    }

    pub fn with_strictness(mut self, strictness: Option<String>) -> Self {
        self.strictness = strictness;
        self
    }

    /// Apply the route-level scope (source filter and mode flags)
    pub fn with_scope(mut self, scope: &RequestScope) -> Self {
        self.source_filter = scope.source.clone();
        self.proxy_mode = scope.proxy_mode;
        self.extra_mode_flags = scope.extra_mode;
        self
    }

    /// Deterministic cache key covering every field
    ///
    /// Segments are joined with `|`; `\` and `|` inside a segment are
    /// backslash-escaped so client text cannot forge a separator.
    pub fn fingerprint(&self) -> String {
        [
            self.text.as_str(),
            &self.limit.to_string(),
            self.type_hint.map(|t| t.id()).unwrap_or(""),
            self.strictness.as_deref().unwrap_or(""),
            self.source_filter.as_deref().unwrap_or(""),
            if self.proxy_mode { "proxy" } else { "" },
            if self.extra_mode_flags { "extra" } else { "" },
        ]
        .iter()
        .map(|segment| escape_segment(segment))
        .collect::<Vec<_>>()
        .join("|")
    }
}

fn escape_segment(segment: &str) -> String {
    let mut escaped = String::with_capacity(segment.len());
    for c in segment.chars() {
        if c == '\\' || c == '|' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Route-level parameters applied to every query in a request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestScope {
    /// Institution code from the request path (`/reconcile/viaf/LC`)
    pub source: Option<String>,
    pub proxy_mode: bool,
    pub extra_mode: bool,
}

// ============================================================================
// Results
// ============================================================================

/// Normalized candidate returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    /// Display name; empty when the source record carried none
    pub name: String,
    #[serde(rename = "type")]
    pub types: Vec<TypeTag>,
    /// Confidence in `[0, 1]`
    pub score: f64,
    #[serde(rename = "match")]
    pub is_exact_match: bool,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        types: Vec<TypeTag>,
        score: f64,
        is_exact_match: bool,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            types,
            score: score.clamp(0.0, 1.0),
            is_exact_match,
        }
    }
}

/// Per-query result of a dispatch attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Vec<Record>),
    /// Upstream answered with a rate-limit response
    Throttled,
    /// Transport, parse or any other failure
    Failed,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Records for a success, empty otherwise
    pub fn records(&self) -> &[Record] {
        match self {
            Outcome::Success(records) => records,
            Outcome::Throttled | Outcome::Failed => &[],
        }
    }

    pub fn into_records(self) -> Vec<Record> {
        match self {
            Outcome::Success(records) => records,
            Outcome::Throttled | Outcome::Failed => Vec::new(),
        }
    }

    /// Short status label for logs and diagnostics
    pub fn status(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::Throttled => "throttled",
            Outcome::Failed => "failed",
        }
    }
}

/// Normalized similarity of two names in `[0, 1]` (1.0 = identical)
pub fn name_similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_type_lookup() {
        assert_eq!(NameType::from_id("/people/person"), Some(NameType::Person));
        assert_eq!(NameType::from_id("/book/book edition"), Some(NameType::Edition));
        assert_eq!(NameType::from_id("/music/artist"), None);
        assert_eq!(
            NameType::Organization.as_type_tag(),
            TypeTag::new("/organization/organization", "Corporate Name")
        );
    }

    #[test]
    fn test_query_defaults() {
        let query = Query::new("  wittgenstein ").with_limit(0);
        assert_eq!(query.text, "wittgenstein");
        assert_eq!(query.limit, DEFAULT_LIMIT);
        assert_eq!(query.strictness.as_deref(), Some("should"));
    }

    #[test]
    fn test_fingerprint_covers_every_field() {
        let base = Query::new("steinbeck").with_limit(5);
        let typed = base.clone().with_type_hint(Some(NameType::Person));
        let scoped = base.clone().with_scope(&RequestScope {
            source: Some("LC".to_string()),
            proxy_mode: false,
            extra_mode: false,
        });
        let proxied = base.clone().with_scope(&RequestScope {
            source: Some("LC".to_string()),
            proxy_mode: true,
            extra_mode: false,
        });

        let prints = [
            base.fingerprint(),
            typed.fingerprint(),
            scoped.fingerprint(),
            proxied.fingerprint(),
            base.clone().with_limit(6).fingerprint(),
        ];
        for (i, a) in prints.iter().enumerate() {
            for b in prints.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
        assert_eq!(base.fingerprint(), Query::new("steinbeck").with_limit(5).fingerprint());
    }

    #[test]
    fn test_fingerprint_separator_in_client_text() {
        let piped_text = Query::new("x|5|").with_limit(3);
        let piped_strictness = Query::new("x")
            .with_limit(5)
            .with_strictness(Some("3||should".to_string()));
        assert_ne!(piped_text.fingerprint(), piped_strictness.fingerprint());

        let backslash = Query::new("a\\").with_limit(3);
        let escaped_pipe = Query::new("a\\|3").with_limit(3);
        assert_ne!(backslash.fingerprint(), escaped_pipe.fingerprint());

        assert_eq!(
            Query::new("x|y").with_limit(3).fingerprint(),
            "x\\|y|3||should|||"
        );
    }

    #[test]
    fn test_record_serializes_client_shape() {
        let record = Record::new("27063124", "Wittgenstein, Ludwig", vec![NameType::Person.as_type_tag()], 0.5, false);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["id"], "27063124");
        assert_eq!(json["name"], "Wittgenstein, Ludwig");
        assert_eq!(json["type"][0]["id"], "/people/person");
        assert_eq!(json["type"][0]["name"], "Person");
        assert_eq!(json["match"], false);
        assert_eq!(json["score"], 0.5);
    }

    #[test]
    fn test_outcome_records() {
        let ok = Outcome::Success(vec![Record::new("1", "a", vec![], 1.0, true)]);
        assert_eq!(ok.records().len(), 1);
        assert!(Outcome::Throttled.records().is_empty());
        assert!(Outcome::Failed.into_records().is_empty());
        assert_eq!(Outcome::Throttled.status(), "throttled");
    }

    #[test]
    fn test_name_similarity_bounds() {
        assert_eq!(name_similarity("Steinbeck", "Steinbeck"), 1.0);
        let partial = name_similarity("Wittgenstein, Ludwig, 1889-1951", "wittgenstein");
        assert!(partial > 0.0 && partial < 1.0);
    }
}
