//! Classification configuration
//!
//! An index carries one payload slot per configured classification (e.g. a
//! taxonomy plus any number of functional classifications). The classifications
//! are a closed, ordered list: the ordinal of a name is its position in the list,
//! and that order is recorded in the data file header so that builder and reader
//! always agree on the shape of a payload.

use std::collections::HashMap;

use auto_impl::auto_impl;

/// Number of characters used for a derived short tag
const SHORT_TAG_LEN: usize = 3;

/// Ordered list of classification names with the short tags used when rendering
/// annotations (e.g. `Taxonomy` -> `tax`, `COG` -> `cog`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classifications {
    names: Vec<String>,
    tags: Vec<String>,
}
impl Classifications {
    /// Creates a classification list, deriving each short tag from the first
    /// three alphanumeric characters of the name (lowercased).
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let tags = names.iter().map(|name| derive_tag(name)).collect();
        Self { names, tags }
    }

    /// Creates a classification list with explicit `(name, tag)` pairs
    pub fn with_tags<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let (names, tags) = pairs
            .into_iter()
            .map(|(name, tag)| (name.into(), tag.into()))
            .unzip();
        Self { names, tags }
    }

    /// An empty classification list (payloads carry only an accession and strand)
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Returns the ordinal of a classification name
    #[must_use]
    pub fn ordinal(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Returns the short tag for an ordinal
    #[must_use]
    pub fn tag(&self, ordinal: usize) -> Option<&str> {
        self.tags.get(ordinal).map(String::as_str)
    }

    /// Iterates over `(ordinal, name)` pairs in configured order
    pub fn iter(&self) -> impl Iterator<Item = (usize, &str)> {
        self.names.iter().map(String::as_str).enumerate()
    }
}

fn derive_tag(name: &str) -> String {
    let tag: String = name
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(SHORT_TAG_LEN)
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if tag.is_empty() {
        name.to_ascii_lowercase()
    } else {
        tag
    }
}

/// Resolves a protein accession to a class identifier within one classification.
///
/// This is the seam to whatever accession mapping service the caller uses; the
/// index itself never interprets class identifiers.
#[auto_impl(&, Box, Arc)]
pub trait ClassificationResolver {
    /// Returns the class id of `accession` in the classification `name`
    /// (with position `ordinal` in the configured list), if any.
    fn resolve(&self, accession: &str, ordinal: usize, name: &str) -> Option<i32>;
}

/// Resolver that never assigns a class
#[derive(Debug, Clone, Copy, Default)]
pub struct NoResolver;
impl ClassificationResolver for NoResolver {
    fn resolve(&self, _accession: &str, _ordinal: usize, _name: &str) -> Option<i32> {
        None
    }
}

/// In-memory resolver backed by one accession table per classification name
#[derive(Debug, Clone, Default)]
pub struct TableResolver {
    tables: HashMap<String, HashMap<String, i32>>,
}
impl TableResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `accession -> class_id` for a classification
    pub fn insert(&mut self, classification: &str, accession: &str, class_id: i32) {
        self.tables
            .entry(classification.to_string())
            .or_default()
            .insert(accession.to_string(), class_id);
    }
}
impl ClassificationResolver for TableResolver {
    fn resolve(&self, accession: &str, _ordinal: usize, name: &str) -> Option<i32> {
        self.tables.get(name)?.get(accession).copied()
    }
}

#[cfg(test)]
mod testing {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_derived_tags() {
        let classes = Classifications::new(["Taxonomy", "COG", "EC", "_x"]);
        assert_eq!(classes.tag(0), Some("tax"));
        assert_eq!(classes.tag(1), Some("cog"));
        assert_eq!(classes.tag(2), Some("ec"));
        assert_eq!(classes.tag(3), Some("x"));
        assert_eq!(classes.tag(4), None);
    }

    #[test]
    fn test_ordinals_follow_order() {
        let classes = Classifications::with_tags([("Taxonomy", "tax"), ("INTERPRO2GO", "ipr")]);
        assert_eq!(classes.ordinal("INTERPRO2GO"), Some(1));
        assert_eq!(classes.ordinal("KEGG"), None);
        assert_eq!(classes.tag(1), Some("ipr"));
        let collected: Vec<_> = classes.iter().collect();
        assert_eq!(collected, vec![(0, "Taxonomy"), (1, "INTERPRO2GO")]);
    }

    #[test]
    fn test_table_resolver_through_arc() {
        let mut table = TableResolver::new();
        table.insert("Taxonomy", "P1", 562);
        let resolver: Arc<TableResolver> = Arc::new(table);
        assert_eq!(resolver.resolve("P1", 0, "Taxonomy"), Some(562));
        assert_eq!(resolver.resolve("P1", 1, "COG"), None);
        assert_eq!(NoResolver.resolve("P1", 0, "Taxonomy"), None);
    }
}
