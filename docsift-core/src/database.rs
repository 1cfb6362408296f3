// docsift-core/src/database.rs
//! Named collections sharing one engine configuration

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::collection::Collection;
use crate::config::EngineConfig;
use crate::error::{DocSiftError, Result};
use crate::{log_debug, log_info};

/// In-memory database: a registry of collections keyed by name
///
/// Collections are handed out as `Arc<Collection>`, so callers can keep a
/// handle across threads while the registry itself stays behind a lock.
pub struct Database {
    config: Arc<EngineConfig>,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
}

impl Database {
    pub fn new(config: EngineConfig) -> Self {
        log_info!(
            "Opening database (regex_mode={:?}, null_array_policy={:?}, id_strategy={:?})",
            config.regex_mode,
            config.null_array_policy,
            config.id_strategy
        );
        Database {
            config: Arc::new(config),
            collections: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get a collection, creating it on first use
    pub fn collection(&self, name: &str) -> Arc<Collection> {
        if let Some(existing) = self.collections.read().get(name) {
            return Arc::clone(existing);
        }

        let mut collections = self.collections.write();
        // Another writer may have created it between the two locks
        let entry = collections.entry(name.to_string()).or_insert_with(|| {
            log_debug!("Creating collection '{}'", name);
            Arc::new(Collection::new(name, Arc::clone(&self.config)))
        });
        Arc::clone(entry)
    }

    /// Get an existing collection
    pub fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| DocSiftError::NotFound(format!("Collection '{}' does not exist", name)))
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    /// Collection names in sorted order
    pub fn list_collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Drop a collection; returns false if it did not exist
    ///
    /// Outstanding handles keep working on their own copy of the data.
    pub fn drop_collection(&self, name: &str) -> bool {
        let dropped = self.collections.write().remove(name).is_some();
        if dropped {
            log_debug!("Dropped collection '{}'", name);
        }
        dropped
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdStrategy;
    use crate::document::{Document, DocumentId};
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn test_collection_created_on_first_use() {
        let db = Database::with_defaults();
        assert!(!db.has_collection("users"));

        let users = db.collection("users");
        users.insert_one(doc(json!({"name": "Alice"}))).unwrap();

        let again = db.collection("users");
        assert_eq!(again.len(), 1);
        assert!(Arc::ptr_eq(&users, &again));
    }

    #[test]
    fn test_get_collection_missing() {
        let db = Database::with_defaults();
        let err = db.get_collection("nope").err().unwrap();
        assert!(matches!(err, DocSiftError::NotFound(_)));
    }

    #[test]
    fn test_list_and_drop() {
        let db = Database::with_defaults();
        db.collection("orders");
        db.collection("customers");
        assert_eq!(db.list_collection_names(), vec!["customers", "orders"]);

        assert!(db.drop_collection("orders"));
        assert!(!db.drop_collection("orders"));
        assert_eq!(db.list_collection_names(), vec!["customers"]);
    }

    #[test]
    fn test_collections_share_config() {
        let db = Database::new(EngineConfig::default().with_id_strategy(IdStrategy::Uuid));
        let items = db.collection("items");
        let result = items.insert_one(doc(json!({"sku": "A1"}))).unwrap();
        assert!(matches!(result.inserted_id, DocumentId::String(_)));
        assert_eq!(items.config().id_strategy, IdStrategy::Uuid);
    }
}
