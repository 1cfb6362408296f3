// docsift-core/src/collection.rs
// In-memory collection store
//
// ├── Result types (UpdateResult, DeleteResult, InsertOneResult, ...)
// ├── WriteModel parsing
// ├── CollectionState: the unlocked operations, shared by the public API
// │   and bulk_write
// └── Collection: RwLock wrapper, one lock acquisition per call

use std::sync::Arc;

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::Serialize;

use crate::aggregation::Pipeline;
use crate::config::{EngineConfig, IdStrategy};
use crate::document::{Document, DocumentId, ID_FIELD};
use crate::error::{DocSiftError, Result};
use crate::find_options::FindOptions;
use crate::query::Query;
use crate::update::UpdateSpec;
use crate::value::Value;
use crate::{log_debug, log_error, log_trace, log_warn};

// ========== RESULT TYPES ==========

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertOneResult {
    pub inserted_id: DocumentId,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsertManyResult {
    pub inserted_ids: Vec<DocumentId>,
    pub inserted_count: usize,
}

/// Which version `find_one_and_update` returns
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReturnDocument {
    #[default]
    Before,
    After,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
}

impl FindOneAndUpdateOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_return_document(mut self, return_document: ReturnDocument) -> Self {
        self.return_document = return_document;
        self
    }
}

/// Result of one operation inside a bulk write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WriteOutcome {
    Inserted { id: DocumentId },
    Updated(UpdateResult),
    Deleted(DeleteResult),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkWriteResult {
    pub outcomes: Vec<WriteOutcome>,
    pub inserted_count: u64,
    pub matched_count: u64,
    pub modified_count: u64,
    pub deleted_count: u64,
}

impl BulkWriteResult {
    fn record(&mut self, outcome: WriteOutcome) {
        match &outcome {
            WriteOutcome::Inserted { .. } => self.inserted_count += 1,
            WriteOutcome::Updated(r) => {
                self.matched_count += r.matched_count;
                self.modified_count += r.modified_count;
            }
            WriteOutcome::Deleted(r) => self.deleted_count += r.deleted_count,
        }
        self.outcomes.push(outcome);
    }

    /// Ids assigned by the insert operations, in batch order
    pub fn inserted_ids(&self) -> Vec<&DocumentId> {
        self.outcomes
            .iter()
            .filter_map(|o| match o {
                WriteOutcome::Inserted { id } => Some(id),
                _ => None,
            })
            .collect()
    }
}

// ========== WRITE MODELS ==========

/// One operation of a bulk write batch
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne { document: Document },
    UpdateOne { filter: Document, update: Document },
    UpdateMany { filter: Document, update: Document },
    ReplaceOne { filter: Document, replacement: Document },
    DeleteOne { filter: Document },
    DeleteMany { filter: Document },
}

fn model_field<'a>(model: &str, body: &'a Document, field: &str) -> Result<&'a Document> {
    match body.get_field(field) {
        Some(Value::Object(doc)) => Ok(doc),
        Some(other) => Err(DocSiftError::InvalidExpression(format!(
            "{}.{} must be an object, got {}",
            model,
            field,
            other.type_name()
        ))),
        None => Err(DocSiftError::InvalidExpression(format!(
            "{} requires '{}'",
            model, field
        ))),
    }
}

impl WriteModel {
    /// Parse the document form, e.g. `{updateMany: {filter: {...}, update: {...}}}`
    pub fn from_document(spec: &Document) -> Result<Self> {
        if spec.len() != 1 {
            return Err(DocSiftError::InvalidExpression(format!(
                "Write model must have exactly one key, got {}",
                spec.len()
            )));
        }
        let (name, body) = spec.iter().next().ok_or_else(|| {
            DocSiftError::InvalidExpression("Write model cannot be empty".to_string())
        })?;
        let body = body.as_document().ok_or_else(|| {
            DocSiftError::InvalidExpression(format!("{} body must be an object", name))
        })?;
        let name = name.as_str();

        let model = match name {
            "insertOne" => WriteModel::InsertOne {
                document: model_field(name, body, "document")?.clone(),
            },
            "updateOne" => WriteModel::UpdateOne {
                filter: model_field(name, body, "filter")?.clone(),
                update: model_field(name, body, "update")?.clone(),
            },
            "updateMany" => WriteModel::UpdateMany {
                filter: model_field(name, body, "filter")?.clone(),
                update: model_field(name, body, "update")?.clone(),
            },
            "replaceOne" => WriteModel::ReplaceOne {
                filter: model_field(name, body, "filter")?.clone(),
                replacement: model_field(name, body, "replacement")?.clone(),
            },
            "deleteOne" => WriteModel::DeleteOne {
                filter: model_field(name, body, "filter")?.clone(),
            },
            "deleteMany" => WriteModel::DeleteMany {
                filter: model_field(name, body, "filter")?.clone(),
            },
            other => {
                return Err(DocSiftError::InvalidExpression(format!(
                    "Unknown write model: {}",
                    other
                )))
            }
        };
        Ok(model)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Self::from_document(&Document::from_json(json)?)
    }

    pub fn name(&self) -> &'static str {
        match self {
            WriteModel::InsertOne { .. } => "insertOne",
            WriteModel::UpdateOne { .. } => "updateOne",
            WriteModel::UpdateMany { .. } => "updateMany",
            WriteModel::ReplaceOne { .. } => "replaceOne",
            WriteModel::DeleteOne { .. } => "deleteOne",
            WriteModel::DeleteMany { .. } => "deleteMany",
        }
    }
}

// ========== STATE ==========

#[derive(Debug, Default)]
struct CollectionState {
    /// Insertion order
    docs: Vec<Document>,
    ids: AHashSet<DocumentId>,
    last_id: u64,
}

impl CollectionState {
    fn next_id(&mut self, strategy: IdStrategy) -> DocumentId {
        match strategy {
            IdStrategy::AutoIncrement => loop {
                let id = DocumentId::new_auto(self.last_id);
                self.last_id += 1;
                if !self.ids.contains(&id) {
                    return id;
                }
            },
            IdStrategy::Uuid => loop {
                let id = DocumentId::new_uuid();
                if !self.ids.contains(&id) {
                    return id;
                }
            },
        }
    }

    fn insert(&mut self, mut document: Document, config: &EngineConfig) -> Result<DocumentId> {
        if let Some(key) = document.keys().find(|k| k.starts_with('$')) {
            return Err(DocSiftError::InvalidExpression(format!(
                "Document field names cannot start with '$': {}",
                key
            )));
        }

        let id = match document.document_id()? {
            Some(id) => {
                if self.ids.contains(&id) {
                    return Err(DocSiftError::DuplicateKey(format!(
                        "_id {} already exists",
                        id
                    )));
                }
                id
            }
            None => {
                let id = self.next_id(config.id_strategy);
                document.insert_at(0, ID_FIELD, id.to_value());
                id
            }
        };

        log_trace!("insert _id {}", id);
        self.ids.insert(id.clone());
        self.docs.push(document);
        Ok(id)
    }

    fn matching_positions(&self, query: &Query, limit: Option<usize>) -> Result<Vec<usize>> {
        let mut positions = Vec::new();
        for (pos, doc) in self.docs.iter().enumerate() {
            if limit.is_some_and(|n| positions.len() >= n) {
                break;
            }
            if query.try_matches(doc)? {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    fn find(&self, query: &Query) -> Result<Vec<Document>> {
        Ok(self
            .matching_positions(query, None)?
            .into_iter()
            .map(|pos| self.docs[pos].clone())
            .collect())
    }

    fn update(
        &mut self,
        query: &Query,
        update: &UpdateSpec,
        multi: bool,
        config: &EngineConfig,
    ) -> Result<UpdateResult> {
        let limit = if multi { None } else { Some(1) };
        let mut result = UpdateResult::default();

        for pos in self.matching_positions(query, limit)? {
            result.matched_count += 1;
            let modified = update.apply_in_place(&mut self.docs[pos], config).map_err(|err| {
                log_warn!(
                    "update aborted at position {} after {} modified: {}",
                    pos,
                    result.modified_count,
                    err
                );
                err
            })?;
            if modified {
                log_trace!("updated document at position {}", pos);
                result.modified_count += 1;
            }
        }
        Ok(result)
    }

    fn replace(&mut self, query: &Query, replacement: &Document) -> Result<UpdateResult> {
        if let Some(key) = replacement.keys().find(|k| k.starts_with('$')) {
            return Err(DocSiftError::InvalidExpression(format!(
                "Replacement document cannot contain update operators: {}",
                key
            )));
        }

        let pos = match self.matching_positions(query, Some(1))?.first() {
            Some(pos) => *pos,
            None => return Ok(UpdateResult::default()),
        };

        let current = &self.docs[pos];
        if let Some(new_id) = replacement.id() {
            if Some(new_id) != current.id() {
                return Err(DocSiftError::InvalidExpression(format!(
                    "Replacement would modify the immutable field '{}'",
                    ID_FIELD
                )));
            }
        }

        let mut replaced = Document::new();
        if let Some(id) = current.id() {
            replaced.insert(ID_FIELD, id.clone());
        }
        for (key, value) in replacement {
            if key != ID_FIELD {
                replaced.insert(key.clone(), value.clone());
            }
        }

        let modified = replaced != *current;
        if modified {
            self.docs[pos] = replaced;
        }
        Ok(UpdateResult {
            matched_count: 1,
            modified_count: u64::from(modified),
        })
    }

    fn delete(&mut self, query: &Query, multi: bool) -> Result<DeleteResult> {
        let limit = if multi { None } else { Some(1) };
        let positions = self.matching_positions(query, limit)?;

        // Back to front so earlier positions stay valid
        for &pos in positions.iter().rev() {
            let removed = self.docs.remove(pos);
            if let Ok(Some(id)) = removed.document_id() {
                self.ids.remove(&id);
            }
        }
        Ok(DeleteResult {
            deleted_count: positions.len() as u64,
        })
    }

    fn execute(&mut self, model: &WriteModel, config: &EngineConfig) -> Result<WriteOutcome> {
        let query = |filter: &Document| Query::with_config(filter.clone(), config.clone());

        match model {
            WriteModel::InsertOne { document } => {
                let id = self.insert(document.clone(), config)?;
                Ok(WriteOutcome::Inserted { id })
            }
            WriteModel::UpdateOne { filter, update } => {
                let spec = UpdateSpec::parse(update)?;
                Ok(WriteOutcome::Updated(self.update(&query(filter)?, &spec, false, config)?))
            }
            WriteModel::UpdateMany { filter, update } => {
                let spec = UpdateSpec::parse(update)?;
                Ok(WriteOutcome::Updated(self.update(&query(filter)?, &spec, true, config)?))
            }
            WriteModel::ReplaceOne {
                filter,
                replacement,
            } => Ok(WriteOutcome::Updated(
                self.replace(&query(filter)?, replacement)?,
            )),
            WriteModel::DeleteOne { filter } => {
                Ok(WriteOutcome::Deleted(self.delete(&query(filter)?, false)?))
            }
            WriteModel::DeleteMany { filter } => {
                Ok(WriteOutcome::Deleted(self.delete(&query(filter)?, true)?))
            }
        }
    }
}

// ========== COLLECTION ==========

/// A named, ordered set of documents with unique `_id`s
///
/// Every call holds the collection lock for its whole duration: reads take
/// it shared, mutations exclusive. A reader never sees a half-applied
/// `update_many` or `bulk_write`.
#[derive(Debug)]
pub struct Collection {
    name: String,
    config: Arc<EngineConfig>,
    state: RwLock<CollectionState>,
}

impl Collection {
    pub fn new(name: impl Into<String>, config: Arc<EngineConfig>) -> Self {
        Collection {
            name: name.into(),
            config,
            state: RwLock::new(CollectionState::default()),
        }
    }

    /// Collection with default engine settings
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(name, Arc::new(EngineConfig::default()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn query(&self, filter: &Document) -> Result<Query> {
        Query::with_config(filter.clone(), (*self.config).clone())
    }

    // ========== READS ==========

    /// All matching documents in insertion order
    pub fn find(&self, filter: &Document) -> Result<Vec<Document>> {
        let query = self.query(filter)?;
        log_debug!("find on '{}' with filter {}", self.name, filter);
        self.state.read().find(&query)
    }

    /// Matching documents after sort, skip, limit and projection
    pub fn find_with_options(&self, filter: &Document, options: &FindOptions) -> Result<Vec<Document>> {
        let query = self.query(filter)?;
        log_debug!("find_with_options on '{}' with filter {}", self.name, filter);
        let matched = self.state.read().find(&query)?;
        options.apply(matched)
    }

    /// First match in insertion order
    pub fn find_one(&self, filter: &Document) -> Result<Option<Document>> {
        let query = self.query(filter)?;
        let state = self.state.read();
        let first = state.matching_positions(&query, Some(1))?;
        Ok(first.first().map(|&pos| state.docs[pos].clone()))
    }

    pub fn count_documents(&self, filter: &Document) -> Result<u64> {
        let query = self.query(filter)?;
        let count = self.state.read().matching_positions(&query, None)?.len();
        Ok(count as u64)
    }

    pub fn len(&self) -> usize {
        self.state.read().docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().docs.is_empty()
    }

    /// Copy of every document in insertion order
    pub fn snapshot(&self) -> Vec<Document> {
        self.state.read().docs.clone()
    }

    // ========== WRITES ==========

    pub fn insert_one(&self, document: Document) -> Result<InsertOneResult> {
        let inserted_id = self.state.write().insert(document, &self.config)?;
        log_debug!("insert_one into '{}': _id {}", self.name, inserted_id);
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert in order; stops at the first failure, earlier inserts stay
    pub fn insert_many(&self, documents: Vec<Document>) -> Result<InsertManyResult> {
        let mut state = self.state.write();
        let mut result = InsertManyResult::default();
        for document in documents {
            result.inserted_ids.push(state.insert(document, &self.config)?);
            result.inserted_count += 1;
        }
        log_debug!("insert_many into '{}': {} inserted", self.name, result.inserted_count);
        Ok(result)
    }

    pub fn update_one(&self, filter: &Document, update: &Document) -> Result<UpdateResult> {
        let query = self.query(filter)?;
        let spec = UpdateSpec::parse(update)?;
        let result = self.state.write().update(&query, &spec, false, &self.config)?;
        log_debug!(
            "update_one on '{}': matched {}, modified {}",
            self.name,
            result.matched_count,
            result.modified_count
        );
        Ok(result)
    }

    /// Update every match; a failing document aborts the call and
    /// documents already updated stay updated
    pub fn update_many(&self, filter: &Document, update: &Document) -> Result<UpdateResult> {
        let query = self.query(filter)?;
        let spec = UpdateSpec::parse(update)?;
        let result = self.state.write().update(&query, &spec, true, &self.config)?;
        log_debug!(
            "update_many on '{}': matched {}, modified {}",
            self.name,
            result.matched_count,
            result.modified_count
        );
        Ok(result)
    }

    /// Update the first match and return it as it was before or after
    pub fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: FindOneAndUpdateOptions,
    ) -> Result<Option<Document>> {
        let query = self.query(filter)?;
        let spec = UpdateSpec::parse(update)?;
        let mut state = self.state.write();

        let pos = match state.matching_positions(&query, Some(1))?.first() {
            Some(pos) => *pos,
            None => return Ok(None),
        };
        let before = state.docs[pos].clone();
        spec.apply_in_place(&mut state.docs[pos], &self.config)?;
        log_debug!("find_one_and_update on '{}' at position {}", self.name, pos);

        Ok(Some(match options.return_document {
            ReturnDocument::Before => before,
            ReturnDocument::After => state.docs[pos].clone(),
        }))
    }

    /// Replace every field of the first match except `_id`
    pub fn replace_one(&self, filter: &Document, replacement: &Document) -> Result<UpdateResult> {
        let query = self.query(filter)?;
        let result = self.state.write().replace(&query, replacement)?;
        log_debug!(
            "replace_one on '{}': matched {}, modified {}",
            self.name,
            result.matched_count,
            result.modified_count
        );
        Ok(result)
    }

    pub fn delete_one(&self, filter: &Document) -> Result<DeleteResult> {
        let query = self.query(filter)?;
        let result = self.state.write().delete(&query, false)?;
        log_debug!("delete_one on '{}': {} deleted", self.name, result.deleted_count);
        Ok(result)
    }

    pub fn delete_many(&self, filter: &Document) -> Result<DeleteResult> {
        let query = self.query(filter)?;
        let result = self.state.write().delete(&query, true)?;
        log_debug!("delete_many on '{}': {} deleted", self.name, result.deleted_count);
        Ok(result)
    }

    /// Run `models` in order under one exclusive lock
    ///
    /// The first failure is returned as `BulkWrite { index, .. }`; the
    /// operations before it stay applied.
    pub fn bulk_write(&self, models: Vec<WriteModel>) -> Result<BulkWriteResult> {
        let mut state = self.state.write();
        let mut result = BulkWriteResult::default();

        for (index, model) in models.iter().enumerate() {
            log_trace!("bulk_write '{}' op {}: {}", self.name, index, model.name());
            let outcome = state
                .execute(model, &self.config)
                .map_err(|source| {
                    log_error!(
                        "bulk_write on '{}' failed at op {} ({}): {}",
                        self.name,
                        index,
                        model.name(),
                        source
                    );
                    DocSiftError::BulkWrite {
                        index,
                        source: Box::new(source),
                    }
                })?;
            result.record(outcome);
        }

        log_debug!(
            "bulk_write on '{}': {} ops, inserted {}, modified {}, deleted {}",
            self.name,
            models.len(),
            result.inserted_count,
            result.modified_count,
            result.deleted_count
        );
        Ok(result)
    }

    // ========== AGGREGATION ==========

    /// Run `pipeline` over a snapshot; the lock is released before the
    /// pipeline runs
    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Document>> {
        let docs = self.snapshot();
        log_debug!(
            "aggregate on '{}': {} stages over {} documents",
            self.name,
            pipeline.len(),
            docs.len()
        );
        pipeline.execute_with(docs, &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn test_auto_increment_skips_taken_ids() {
        let coll = Collection::with_defaults("users");
        coll.insert_one(doc(json!({"_id": 2, "name": "b"}))).unwrap();
        let first = coll.insert_one(doc(json!({"name": "a"}))).unwrap();
        let second = coll.insert_one(doc(json!({"name": "c"}))).unwrap();
        assert_eq!(first.inserted_id, DocumentId::Int(1));
        assert_eq!(second.inserted_id, DocumentId::Int(3));
    }

    #[test]
    fn test_uuid_strategy() {
        let config = EngineConfig::default().with_id_strategy(IdStrategy::Uuid);
        let coll = Collection::new("users", Arc::new(config));
        let result = coll.insert_one(doc(json!({"name": "a"}))).unwrap();
        assert!(matches!(result.inserted_id, DocumentId::String(ref s) if s.len() == 36));
    }

    #[test]
    fn test_insert_rejects_operator_keys_and_bad_ids() {
        let coll = Collection::with_defaults("users");
        assert!(matches!(
            coll.insert_one(doc(json!({"$set": 1}))),
            Err(DocSiftError::InvalidExpression(_))
        ));
        assert!(matches!(
            coll.insert_one(doc(json!({"_id": 1.5}))),
            Err(DocSiftError::TypeMismatch(_))
        ));
        assert!(coll.is_empty());
    }

    #[test]
    fn test_write_model_parsing() {
        let model = WriteModel::from_json(json!({
            "updateMany": {"filter": {"type": {"$ne": "a"}}, "update": {"$push": {"tags": "x"}}}
        }))
        .unwrap();
        assert_eq!(model.name(), "updateMany");

        assert!(WriteModel::from_json(json!({"insertOne": {}})).is_err());
        assert!(WriteModel::from_json(json!({"upsertOne": {"filter": {}}})).is_err());
        assert!(WriteModel::from_json(json!({"deleteOne": {"filter": {}}, "deleteMany": {"filter": {}}})).is_err());
        assert!(WriteModel::from_json(json!({"deleteOne": {"filter": 3}})).is_err());
    }

    #[test]
    fn test_bulk_write_result_totals() {
        let mut result = BulkWriteResult::default();
        result.record(WriteOutcome::Inserted { id: DocumentId::Int(1) });
        result.record(WriteOutcome::Updated(UpdateResult { matched_count: 2, modified_count: 1 }));
        result.record(WriteOutcome::Deleted(DeleteResult { deleted_count: 3 }));
        assert_eq!(result.inserted_count, 1);
        assert_eq!(result.matched_count, 2);
        assert_eq!(result.modified_count, 1);
        assert_eq!(result.deleted_count, 3);
        assert_eq!(result.inserted_ids(), vec![&DocumentId::Int(1)]);
    }

    #[test]
    fn test_result_serialization() {
        let result = UpdateResult { matched_count: 1, modified_count: 0 };
        assert_eq!(
            serde_json::to_value(result).unwrap(),
            json!({"matchedCount": 1, "modifiedCount": 0})
        );
        let inserted = InsertOneResult { inserted_id: DocumentId::Int(4) };
        assert_eq!(serde_json::to_value(inserted).unwrap(), json!({"insertedId": 4}));
    }
}
