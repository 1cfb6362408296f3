// Fixture loading: `{ "collection_name": [documents...], ... }` into a Database

use anyhow::{Context, Result};
use docsift_core::{Database, Document, EngineConfig};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;

/// Read an engine config file; `None` means defaults
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    EngineConfig::from_json_str(&content)
        .with_context(|| format!("Invalid config in: {}", path.display()))
}

/// Load every collection of a fixture file into a fresh database
pub fn load_fixtures(path: &Path, config: EngineConfig) -> Result<Database> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))?;

    let data: Map<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid JSON in file: {}", path.display()))?;

    let db = Database::new(config);

    for (collection_name, documents) in data {
        let docs = documents
            .as_array()
            .with_context(|| format!("Collection '{}' must be an array", collection_name))?;

        let docs = docs
            .iter()
            .map(|doc| {
                Document::from_json(doc.clone()).with_context(|| {
                    format!("Document in '{}' must be an object", collection_name)
                })
            })
            .collect::<Result<Vec<_>>>()?;

        db.collection(&collection_name)
            .insert_many(docs)
            .with_context(|| format!("Failed to insert documents into {}", collection_name))?;
    }

    Ok(db)
}
