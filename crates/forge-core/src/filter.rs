//! Selection of data items by path or metadata.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use crate::error::{ForgeError, ForgeResult};
use crate::meta::Meta;

/// Predicate over an item's meta.
pub type MetaPredicate = Arc<dyn Fn(&Meta) -> bool + Send + Sync>;

/// Selects items of a [`DataNode`](crate::node::DataNode).
///
/// Filtering keeps the tree structure of the matches. Nodes left without any item are
/// dropped from the result.
#[derive(Clone, Default)]
pub enum DataFilter {
    /// Keep everything
    #[default]
    Identity,
    /// Keep items whose full dot path matches the whole pattern
    Pattern(Regex),
    /// Keep items whose meta satisfies the predicate
    Meta(MetaPredicate),
    /// Keep items accepted by both filters
    And(Box<DataFilter>, Box<DataFilter>),
}

impl DataFilter {
    /// Compile a path pattern. The pattern is anchored at both ends.
    pub fn pattern(pattern: &str) -> ForgeResult<Self> {
        Regex::new(&format!("^(?:{})$", pattern))
            .map(DataFilter::Pattern)
            .map_err(|e| ForgeError::validation(format!("invalid data pattern '{}': {}", pattern, e)))
    }

    /// Filter by item meta.
    pub fn meta<F>(predicate: F) -> Self
    where
        F: Fn(&Meta) -> bool + Send + Sync + 'static,
    {
        DataFilter::Meta(Arc::new(predicate))
    }

    /// Combine with another filter.
    pub fn and(self, other: DataFilter) -> Self {
        match (self, other) {
            (DataFilter::Identity, other) | (other, DataFilter::Identity) => other,
            (a, b) => DataFilter::And(Box::new(a), Box::new(b)),
        }
    }

    /// True if an item at `path` with `meta` is selected.
    pub fn accepts(&self, path: &str, meta: &Meta) -> bool {
        match self {
            DataFilter::Identity => true,
            DataFilter::Pattern(regex) => regex.is_match(path),
            DataFilter::Meta(predicate) => predicate(meta),
            DataFilter::And(a, b) => a.accepts(path, meta) && b.accepts(path, meta),
        }
    }
}

impl fmt::Debug for DataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataFilter::Identity => write!(f, "Identity"),
            DataFilter::Pattern(regex) => write!(f, "Pattern({})", regex.as_str()),
            DataFilter::Meta(_) => write!(f, "Meta(..)"),
            DataFilter::And(a, b) => write!(f, "And({:?}, {:?})", a, b),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_anchored() {
        let filter = DataFilter::pattern(r"raw\.run_\d+").unwrap();
        let meta = Meta::empty();
        assert!(filter.accepts("raw.run_12", &meta));
        assert!(!filter.accepts("raw.run_12.bak", &meta));
        assert!(!filter.accepts("old.raw.run_1", &meta));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = DataFilter::pattern("(").unwrap_err();
        assert!(matches!(err, ForgeError::Validation(_)));
    }

    #[test]
    fn test_and_with_meta() {
        let filter = DataFilter::pattern("a.*")
            .unwrap()
            .and(DataFilter::meta(|m| m.get_bool("good").unwrap_or(false)));
        let good = Meta::builder("m").set("good", true).build();

        assert!(filter.accepts("a1", &good));
        assert!(!filter.accepts("a1", &Meta::empty()));
        assert!(!filter.accepts("b1", &good));
    }

    #[test]
    fn test_identity_and_collapses() {
        let filter = DataFilter::Identity.and(DataFilter::Identity);
        assert!(matches!(filter, DataFilter::Identity));
    }
}
