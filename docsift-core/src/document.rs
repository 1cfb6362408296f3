// docsift-core/src/document.rs
use std::fmt;

use indexmap::IndexMap;
use serde::de::{self, Deserialize, Deserializer};
use serde::ser::{Serialize, SerializeMap, Serializer};
use uuid::Uuid;

use crate::error::{DocSiftError, Result};
use crate::path;
use crate::value::Value;

/// Name of the identity field
pub const ID_FIELD: &str = "_id";

/// Typed form of a document's `_id`
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum DocumentId {
    Int(i64),
    String(String),
}

impl DocumentId {
    /// Next auto-increment ID
    pub fn new_auto(last_id: u64) -> Self {
        DocumentId::Int((last_id + 1) as i64)
    }

    /// Random UUID v4 string
    pub fn new_uuid() -> Self {
        DocumentId::String(Uuid::new_v4().to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            DocumentId::Int(n) => Value::from(*n),
            DocumentId::String(s) => Value::String(s.clone()),
        }
    }
}

impl TryFrom<&Value> for DocumentId {
    type Error = DocSiftError;

    fn try_from(value: &Value) -> Result<Self> {
        match value {
            Value::String(s) => Ok(DocumentId::String(s.clone())),
            Value::Number(_) => value.as_i64().map(DocumentId::Int).ok_or_else(|| {
                DocSiftError::TypeMismatch(format!("_id must be an integer, got {}", value))
            }),
            other => Err(DocSiftError::TypeMismatch(format!(
                "_id must be an integer or string, got {}",
                other.type_name()
            ))),
        }
    }
}

impl From<DocumentId> for Value {
    fn from(id: DocumentId) -> Self {
        id.to_value()
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentId::Int(n) => write!(f, "{}", n),
            DocumentId::String(s) => write!(f, "\"{}\"", s),
        }
    }
}

/// Ordered field → value record
///
/// Field order is insertion order and survives serialization. Equality is
/// order-insensitive, so `{a:1, b:2} == {b:2, a:1}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Document {
            fields: IndexMap::new(),
        }
    }

    /// Build from a JSON object
    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        match Value::from(json) {
            Value::Object(doc) => Ok(doc),
            other => Err(DocSiftError::InvalidExpression(format!(
                "Document must be an object, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(json)?;
        Self::from_json(parsed)
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Resolve a dotted path (`address.state`); `None` means absent
    pub fn get(&self, path: &str) -> Option<&Value> {
        path::resolve(self, path)
    }

    /// Top-level field only, no dot handling
    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn get_field_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.fields.get_mut(name)
    }

    /// Insert or replace a top-level field, keeping its position if it existed
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Insert a top-level field at `index` (used to put `_id` first)
    pub fn insert_at(&mut self, index: usize, name: impl Into<String>, value: Value) {
        let index = index.min(self.fields.len());
        self.fields.shift_insert(index, name.into(), value);
    }

    /// Remove a top-level field, preserving the order of the rest
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Set a dotted path in place, creating intermediate objects
    pub fn set_path(&mut self, path: &str, value: Value) -> Result<()> {
        path::set_in_place(self, path, value)
    }

    /// Remove a dotted path in place
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        path::remove(self, path)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    /// Raw `_id` value, if present
    pub fn id(&self) -> Option<&Value> {
        self.fields.get(ID_FIELD)
    }

    /// Typed `_id`; errors if present but not an integer or string
    pub fn document_id(&self) -> Result<Option<DocumentId>> {
        self.id().map(DocumentId::try_from).transpose()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Document {
            fields: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a String, &'a Value);
    type IntoIter = indexmap::map::Iter<'a, String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (k, v) in &self.fields {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Document::from_json(json).map_err(de::Error::custom)
    }
}

impl TryFrom<serde_json::Value> for Document {
    type Error = DocSiftError;

    fn try_from(json: serde_json::Value) -> Result<Self> {
        Document::from_json(json)
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
    fn test_document_id_new_auto() {
        assert_eq!(DocumentId::new_auto(0), DocumentId::Int(1));
        assert_eq!(DocumentId::new_auto(10), DocumentId::Int(11));
    }

    #[test]
    fn test_document_id_uuid() {
        match DocumentId::new_uuid() {
            DocumentId::String(s) => {
                assert_eq!(s.len(), 36);
                assert!(s.contains('-'));
            }
            other => panic!("Expected String id, got {:?}", other),
        }
    }

    #[test]
    fn test_document_id_from_value() {
        assert_eq!(
            DocumentId::try_from(&Value::from(7)).unwrap(),
            DocumentId::Int(7)
        );
        assert_eq!(
            DocumentId::try_from(&Value::from("abc")).unwrap(),
            DocumentId::String("abc".to_string())
        );
        assert!(DocumentId::try_from(&Value::from(1.5)).is_err());
        assert!(DocumentId::try_from(&Value::Array(vec![])).is_err());
    }

    #[test]
    fn test_from_json_requires_object() {
        assert!(Document::from_json(json!([1, 2])).is_err());
        assert!(Document::from_json(json!("x")).is_err());
    }

    #[test]
    fn test_field_order_preserved() {
        let d = doc(json!({"zeta": 1, "alpha": 2, "mid": 3}));
        let keys: Vec<&String> = d.keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
        assert_eq!(
            d.to_json_string().unwrap(),
            r#"{"zeta":1,"alpha":2,"mid":3}"#
        );
    }

    #[test]
    fn test_insert_at_front() {
        let mut d = doc(json!({"name": "Ann"}));
        d.insert_at(0, ID_FIELD, Value::from(1));
        let keys: Vec<&String> = d.keys().collect();
        assert_eq!(keys, vec!["_id", "name"]);
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut d = doc(json!({"a": 1, "b": 2, "c": 3}));
        assert_eq!(d.remove("b"), Some(Value::from(2)));
        let keys: Vec<&String> = d.keys().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_get_nested() {
        let d = doc(json!({"address": {"state": "CA", "city": "LA"}}));
        assert_eq!(d.get("address.state"), Some(&Value::from("CA")));
        assert_eq!(d.get("address.zip"), None);
        assert_eq!(d.get_field("address.state"), None);
    }

    #[test]
    fn test_document_id_accessor() {
        let d = doc(json!({"_id": 5, "x": 1}));
        assert_eq!(d.document_id().unwrap(), Some(DocumentId::Int(5)));
        let no_id = doc(json!({"x": 1}));
        assert_eq!(no_id.document_id().unwrap(), None);
        let bad = doc(json!({"_id": [1]}));
        assert!(bad.document_id().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let original = doc(json!({"_id": 1, "tags": ["a", "b"], "meta": {"v": 2}}));
        let text = serde_json::to_string(&original).unwrap();
        let restored: Document = serde_json::from_str(&text).unwrap();
        assert_eq!(restored, original);
    }

    #[test]
    fn test_deserialize_rejects_non_object() {
        let result: std::result::Result<Document, _> = serde_json::from_str("[1]");
        assert!(result.is_err());
    }
}
