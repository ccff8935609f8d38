//! Baggage parsing and the divert filter.
//!
//! Several diverted deployments can share one physical topic. Each record
//! may carry a `baggage` header (`k1=v1,k2=v2`) whose `okteto-divert` entry
//! names the deployment slice the record belongs to. A worker processes a
//! record only when that slice is its own; the unscoped primary worker
//! processes only untagged traffic.

/// Header carrying propagated baggage.
pub const BAGGAGE_HEADER: &str = "baggage";

/// Baggage key naming the diverted environment.
pub const DIVERT_KEY: &str = "okteto-divert";

// =============================================================================
// Baggage
// =============================================================================

/// Parsed baggage entries in header order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    /// Parse a baggage header.
    ///
    /// Pairs are comma separated and split on the first `=`; keys and values
    /// are whitespace trimmed. Pairs without `=` are ignored.
    pub fn parse(header: &str) -> Self {
        let entries = header
            .split(',')
            .filter_map(|pair| pair.trim().split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();

        Self { entries }
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Number of parsed entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no entries were parsed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// =============================================================================
// Diversion Tag
// =============================================================================

/// The `okteto-divert` entry of a record's baggage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiversionTag {
    /// No baggage header, or no `okteto-divert` entry in it
    Absent,
    /// Entry present (value may be empty)
    Present(String),
}

impl DiversionTag {
    /// Extract the tag from an optional baggage header.
    pub fn from_baggage(header: Option<&str>) -> Self {
        match header.and_then(|h| Baggage::parse(h).get(DIVERT_KEY).map(str::to_string)) {
            Some(value) => DiversionTag::Present(value),
            None => DiversionTag::Absent,
        }
    }

    /// Tag value, empty when absent.
    pub fn value(&self) -> &str {
        match self {
            DiversionTag::Absent => "",
            DiversionTag::Present(value) => value,
        }
    }
}

// =============================================================================
// Divert Filter
// =============================================================================

/// Decides whether this worker instance owns a record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DivertFilter {
    scope: String,
}

impl DivertFilter {
    /// Create a filter for an environment scope (empty = unscoped primary).
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
        }
    }

    /// The worker's environment scope.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Whether this worker is the unscoped primary.
    pub fn is_primary(&self) -> bool {
        self.scope.is_empty()
    }

    /// Apply the diversion rules to a tag.
    ///
    /// | tag       | scope        | admit |
    /// |-----------|--------------|-------|
    /// | non-empty | equal        | yes   |
    /// | non-empty | other/empty  | no    |
    /// | empty     | empty        | yes   |
    /// | empty     | non-empty    | no    |
    pub fn admits(&self, tag: &DiversionTag) -> bool {
        let tag = tag.value();
        if tag.is_empty() {
            self.scope.is_empty()
        } else {
            tag == self.scope
        }
    }

    /// Convenience: extract the tag from a raw header and apply the rules.
    pub fn admits_baggage(&self, header: Option<&str>) -> bool {
        self.admits(&DiversionTag::from_baggage(header))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trims_and_splits_on_first_equals() {
        let baggage = Baggage::parse(" okteto-divert = staging , trace=a=b ,junk");
        assert_eq!(baggage.len(), 2);
        assert_eq!(baggage.get("okteto-divert"), Some("staging"));
        assert_eq!(baggage.get("trace"), Some("a=b"));
        assert_eq!(baggage.get("junk"), None);
    }

    #[test]
    fn test_parse_empty_header() {
        assert!(Baggage::parse("").is_empty());
    }

    #[test]
    fn test_first_entry_wins() {
        let baggage = Baggage::parse("okteto-divert=one,okteto-divert=two");
        assert_eq!(baggage.get(DIVERT_KEY), Some("one"));
    }

    #[test]
    fn test_tag_absent_vs_empty() {
        assert_eq!(DiversionTag::from_baggage(None), DiversionTag::Absent);
        assert_eq!(DiversionTag::from_baggage(Some("user=1")), DiversionTag::Absent);
        assert_eq!(
            DiversionTag::from_baggage(Some("okteto-divert=")),
            DiversionTag::Present(String::new())
        );
        assert_eq!(DiversionTag::Absent.value(), "");
    }

    #[test]
    fn test_divert_truth_table() {
        let staging = DivertFilter::new("staging");
        let primary = DivertFilter::new("");

        assert!(staging.admits_baggage(Some("okteto-divert=staging")));
        assert!(!primary.admits_baggage(Some("okteto-divert=staging")));
        assert!(primary.admits_baggage(None));
        assert!(!staging.admits_baggage(None));
    }

    #[test]
    fn test_divert_other_scope_rejected() {
        let filter = DivertFilter::new("preview");
        assert!(!filter.admits_baggage(Some("okteto-divert=staging")));
    }

    #[test]
    fn test_empty_tag_behaves_like_absent() {
        let primary = DivertFilter::new("");
        let staging = DivertFilter::new("staging");

        assert!(primary.admits_baggage(Some("okteto-divert=")));
        assert!(!staging.admits_baggage(Some("okteto-divert=")));
        assert!(primary.is_primary());
        assert!(!staging.is_primary());
    }
}
