// docsift-core/src/error.rs
// Error types for the document engine

use thiserror::Error;

/// Every failure the engine can report.
///
/// Operations that simply match nothing (`find_one`, `replace_one`,
/// `find_one_and_update` on an empty selection) are not errors: they return
/// `None` or zero counts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocSiftError {
    /// Malformed filter, update, projection or pipeline shape
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Operator applied to a value of an incompatible type (e.g. `$push` on a string)
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Named resource (collection) does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Insert with an `_id` already present in the collection
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// A bulk write stopped at `index`; operations before it stay applied
    #[error("Bulk write failed at operation {index}: {source}")]
    BulkWrite {
        index: usize,
        source: Box<DocSiftError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DocSiftError {
    /// Index of the failing operation for bulk write errors
    pub fn failed_index(&self) -> Option<usize> {
        match self {
            DocSiftError::BulkWrite { index, .. } => Some(*index),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DocSiftError {
    fn from(err: serde_json::Error) -> Self {
        DocSiftError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DocSiftError>;
