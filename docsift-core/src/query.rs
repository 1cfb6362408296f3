// src/query.rs
//! Filter queries
//!
//! Matching logic lives in the [`operators`] submodule, one type per
//! operator behind a registry. [`Query`] is a validated filter bundled with
//! the engine settings it should be evaluated under.

pub mod operators;

use crate::config::EngineConfig;
use crate::document::Document;
use crate::error::Result;
use crate::log_warn;

pub use operators::{matches_filter, matches_filter_with, validate_filter, validate_filter_with};

/// A filter that has passed [`validate_filter`]
///
/// ```
/// use docsift_core::document::Document;
/// use docsift_core::query::Query;
/// use serde_json::json;
///
/// let query = Query::from_json(json!({"age": {"$gte": 18}})).unwrap();
/// let adult = Document::from_json(json!({"age": 30})).unwrap();
/// assert!(query.matches(&adult));
/// ```
#[derive(Debug, Clone, Default)]
pub struct Query {
    filter: Document,
    config: EngineConfig,
}

impl Query {
    /// Empty query, matches every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `filter` under default settings
    pub fn from_document(filter: Document) -> Result<Self> {
        Self::with_config(filter, EngineConfig::default())
    }

    /// Validate `filter` under `config` (regex mode matters for validation)
    pub fn with_config(filter: Document, config: EngineConfig) -> Result<Self> {
        validate_filter_with(&filter, &config)?;
        Ok(Query { filter, config })
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Self::from_document(Document::from_json(json)?)
    }

    /// Check if a document matches; evaluation errors count as no match
    pub fn matches(&self, document: &Document) -> bool {
        self.try_matches(document).unwrap_or_else(|err| {
            log_warn!("filter evaluation failed, treating as no match: {}", err);
            false
        })
    }

    /// Check if a document matches, surfacing evaluation errors
    pub fn try_matches(&self, document: &Document) -> Result<bool> {
        matches_filter_with(document, &self.filter, &self.config)
    }

    pub fn is_empty(&self) -> bool {
        self.filter.is_empty()
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn into_filter(self) -> Document {
        self.filter
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegexMode;
    use crate::error::DocSiftError;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn test_query_new_matches_all() {
        let query = Query::new();
        assert!(query.is_empty());
        assert!(query.matches(&doc(json!({"name": "Alice"}))));
    }

    #[test]
    fn test_query_matches_simple_eq() {
        let query = Query::from_json(json!({"name": "Alice"})).unwrap();
        assert!(query.matches(&doc(json!({"name": "Alice"}))));
        assert!(!query.matches(&doc(json!({"name": "Bob"}))));
    }

    #[test]
    fn test_query_matches_comparison_range() {
        let query = Query::from_json(json!({"age": {"$gte": 18, "$lt": 30}})).unwrap();
        assert!(query.matches(&doc(json!({"age": 25}))));
        assert!(!query.matches(&doc(json!({"age": 15}))));
        assert!(!query.matches(&doc(json!({"age": 35}))));
    }

    #[test]
    fn test_query_complex_nested() {
        let query = Query::from_json(json!({
            "$and": [
                {"$or": [{"city": "NYC"}, {"city": "LA"}]},
                {"age": {"$gte": 25}},
                {"active": true}
            ]
        }))
        .unwrap();

        assert!(query.matches(&doc(json!({"city": "NYC", "age": 30, "active": true}))));
        assert!(!query.matches(&doc(json!({"city": "LA", "age": 20, "active": true}))));
        assert!(!query.matches(&doc(json!({"city": "Chicago", "age": 30, "active": true}))));
    }

    #[test]
    fn test_query_rejects_invalid_filter() {
        let err = Query::from_json(json!({"age": {"$between": [1, 2]}})).unwrap_err();
        assert!(matches!(err, DocSiftError::InvalidExpression(_)));
        assert!(Query::from_json(json!([1])).is_err());
    }

    #[test]
    fn test_query_with_config() {
        let config = EngineConfig::default().with_regex_mode(RegexMode::Prefix);
        let query = Query::with_config(doc(json!({"name": {"$regex": "ohn"}})), config).unwrap();
        assert!(!query.matches(&doc(json!({"name": "John"}))));
        let query = Query::from_document(doc(json!({"name": {"$regex": "ohn"}}))).unwrap();
        assert!(query.matches(&doc(json!({"name": "John"}))));
    }

    #[test]
    fn test_query_into_filter() {
        let original = doc(json!({"status": "active"}));
        let query = Query::from_document(original.clone()).unwrap();
        assert_eq!(query.filter(), &original);
        assert_eq!(query.into_filter(), original);
    }
}
