// docsift-core/src/lib.rs
// In-process document engine: filters, updates, collections, aggregation

pub mod aggregation;
pub mod collection;
pub mod config;
pub mod database;
pub mod document;
pub mod error;
pub mod find_options;
pub mod logging;
pub mod path;
pub mod query;
pub mod update;
pub mod value;
pub mod value_utils;

// Public exports
pub use aggregation::{Pipeline, Stage};
pub use collection::{
    BulkWriteResult, Collection, DeleteResult, FindOneAndUpdateOptions, InsertManyResult,
    InsertOneResult, ReturnDocument, UpdateResult, WriteModel, WriteOutcome,
};
pub use config::{EngineConfig, IdStrategy, NullArrayPolicy, RegexMode};
pub use database::Database;
pub use document::{Document, DocumentId};
pub use error::{DocSiftError, Result};
pub use find_options::{FindOptions, Projection, SortDirection, SortSpec};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use query::{matches_filter, Query};
pub use update::UpdateSpec;
pub use value::{RegexPattern, Value};
