// docsift-core/src/update.rs
//! Field update operators: `$set`, `$push`, `$addToSet`, `$pull`
//!
//! An update document is parsed once into an [`UpdateSpec`] and then applied
//! to any number of documents. Operators always run in the order
//! `$set` → `$push` → `$addToSet` → `$pull`, whatever their order in the
//! update document. Within one operator every target reads the document as
//! it was before that operator started.

use crate::config::{EngineConfig, NullArrayPolicy};
use crate::document::{Document, ID_FIELD};
use crate::error::{DocSiftError, Result};
use crate::path;
use crate::value::Value;

/// Supported update operators, in application order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum UpdateOperator {
    Set,
    Push,
    AddToSet,
    Pull,
}

impl UpdateOperator {
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "$set" => Ok(UpdateOperator::Set),
            "$push" => Ok(UpdateOperator::Push),
            "$addToSet" => Ok(UpdateOperator::AddToSet),
            "$pull" => Ok(UpdateOperator::Pull),
            other => Err(DocSiftError::InvalidExpression(format!(
                "Unknown update operator: {}",
                other
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateOperator::Set => "$set",
            UpdateOperator::Push => "$push",
            UpdateOperator::AddToSet => "$addToSet",
            UpdateOperator::Pull => "$pull",
        }
    }
}

/// A parsed update expression
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    set: Vec<(String, Value)>,
    push: Vec<(String, Vec<Value>)>,
    add_to_set: Vec<(String, Vec<Value>)>,
    pull: Vec<(String, Vec<Value>)>,
}

/// `{$each: [...]}` or a bare value
fn each_items(op: UpdateOperator, field: &str, operand: &Value) -> Result<Vec<Value>> {
    let modifiers = match operand {
        Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![operand.clone()]),
    };

    match (modifiers.len(), modifiers.get_field("$each")) {
        (1, Some(Value::Array(items))) => Ok(items.clone()),
        (1, Some(other)) => Err(DocSiftError::InvalidExpression(format!(
            "{}: $each for field '{}' must be an array, got {}",
            op.as_str(),
            field,
            other.type_name()
        ))),
        _ => Err(DocSiftError::InvalidExpression(format!(
            "{}: unsupported modifier for field '{}' (only $each is allowed)",
            op.as_str(),
            field
        ))),
    }
}

/// `{$in: [...]}` or a bare value to remove
fn pull_items(field: &str, operand: &Value) -> Result<Vec<Value>> {
    let condition = match operand {
        Value::Object(obj) if obj.keys().any(|k| k.starts_with('$')) => obj,
        _ => return Ok(vec![operand.clone()]),
    };

    match (condition.len(), condition.get_field("$in")) {
        (1, Some(Value::Array(items))) => Ok(items.clone()),
        (1, Some(other)) => Err(DocSiftError::InvalidExpression(format!(
            "$pull: $in for field '{}' must be an array, got {}",
            field,
            other.type_name()
        ))),
        _ => Err(DocSiftError::InvalidExpression(format!(
            "$pull: unsupported condition for field '{}' (only $in is allowed)",
            field
        ))),
    }
}

impl UpdateSpec {
    /// Parse an update document
    ///
    /// Empty updates, replacement-style documents (no `$` keys), unknown
    /// operators and non-object operator bodies are all rejected.
    pub fn parse(update: &Document) -> Result<Self> {
        if update.is_empty() {
            return Err(DocSiftError::InvalidExpression(
                "Update document cannot be empty".to_string(),
            ));
        }

        let mut spec = UpdateSpec::default();
        for (op_name, body) in update {
            if !op_name.starts_with('$') {
                return Err(DocSiftError::InvalidExpression(format!(
                    "Update document must only contain update operators, found field '{}'",
                    op_name
                )));
            }
            let op = UpdateOperator::parse(op_name)?;
            let targets = body.as_document().ok_or_else(|| {
                DocSiftError::InvalidExpression(format!(
                    "{} requires an object of field paths, got {}",
                    op_name,
                    body.type_name()
                ))
            })?;

            for (field, operand) in targets {
                path::parse(field)?;
                match op {
                    UpdateOperator::Set => spec.set.push((field.clone(), operand.clone())),
                    UpdateOperator::Push => spec
                        .push
                        .push((field.clone(), each_items(op, field, operand)?)),
                    UpdateOperator::AddToSet => spec
                        .add_to_set
                        .push((field.clone(), each_items(op, field, operand)?)),
                    UpdateOperator::Pull => {
                        spec.pull.push((field.clone(), pull_items(field, operand)?))
                    }
                }
            }
        }
        Ok(spec)
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Self::parse(&Document::from_json(json)?)
    }

    /// Operators present in this update, in application order
    pub fn operators(&self) -> Vec<UpdateOperator> {
        let mut ops = Vec::new();
        if !self.set.is_empty() {
            ops.push(UpdateOperator::Set);
        }
        if !self.push.is_empty() {
            ops.push(UpdateOperator::Push);
        }
        if !self.add_to_set.is_empty() {
            ops.push(UpdateOperator::AddToSet);
        }
        if !self.pull.is_empty() {
            ops.push(UpdateOperator::Pull);
        }
        ops
    }

    /// Return an updated copy of `document`
    pub fn apply(&self, document: &Document, config: &EngineConfig) -> Result<Document> {
        let mut updated = document.clone();
        self.apply_in_place(&mut updated, config)?;
        Ok(updated)
    }

    /// Update `document` in place, reporting whether anything changed
    ///
    /// On error the document is left untouched.
    pub fn apply_in_place(&self, document: &mut Document, config: &EngineConfig) -> Result<bool> {
        let mut working = document.clone();

        self.apply_set(&mut working)?;
        self.apply_push(&mut working, config.null_array_policy)?;
        self.apply_add_to_set(&mut working, config.null_array_policy)?;
        self.apply_pull(&mut working)?;

        if working.id() != document.id() {
            return Err(DocSiftError::InvalidExpression(format!(
                "Performing an update would modify the immutable field '{}'",
                ID_FIELD
            )));
        }

        let modified = working != *document;
        if modified {
            *document = working;
        }
        Ok(modified)
    }

    fn apply_set(&self, document: &mut Document) -> Result<()> {
        for (field, value) in &self.set {
            path::set_in_place(document, field, value.clone())?;
        }
        Ok(())
    }

    fn apply_push(&self, document: &mut Document, policy: NullArrayPolicy) -> Result<()> {
        let snapshot = document.clone();
        for (field, items) in &self.push {
            let mut array = target_array(&snapshot, field, UpdateOperator::Push, policy)?;
            array.extend(items.iter().cloned());
            path::set_in_place(document, field, Value::Array(array))?;
        }
        Ok(())
    }

    fn apply_add_to_set(&self, document: &mut Document, policy: NullArrayPolicy) -> Result<()> {
        let snapshot = document.clone();
        for (field, items) in &self.add_to_set {
            let mut array = target_array(&snapshot, field, UpdateOperator::AddToSet, policy)?;
            for item in items {
                if !array.contains(item) {
                    array.push(item.clone());
                }
            }
            path::set_in_place(document, field, Value::Array(array))?;
        }
        Ok(())
    }

    fn apply_pull(&self, document: &mut Document) -> Result<()> {
        let snapshot = document.clone();
        for (field, remove) in &self.pull {
            match snapshot.get(field) {
                None => continue,
                Some(Value::Array(arr)) => {
                    let kept: Vec<Value> = arr
                        .iter()
                        .filter(|item| !remove.contains(item))
                        .cloned()
                        .collect();
                    if kept.len() != arr.len() {
                        path::set_in_place(document, field, Value::Array(kept))?;
                    }
                }
                Some(other) => {
                    return Err(DocSiftError::TypeMismatch(format!(
                        "$pull: field '{}' is not an array (found {})",
                        field,
                        other.type_name()
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Current array at `field`, or a fresh one when absent (or null under
/// `NullArrayPolicy::Initialize`)
fn target_array(
    snapshot: &Document,
    field: &str,
    op: UpdateOperator,
    policy: NullArrayPolicy,
) -> Result<Vec<Value>> {
    match snapshot.get(field) {
        None => Ok(Vec::new()),
        Some(Value::Array(arr)) => Ok(arr.clone()),
        Some(Value::Null) if policy == NullArrayPolicy::Initialize => Ok(Vec::new()),
        Some(other) => Err(DocSiftError::TypeMismatch(format!(
            "{}: field '{}' is not an array (found {})",
            op.as_str(),
            field,
            other.type_name()
        ))),
    }
}

/// Parse and apply `update` to a copy of `document` with default settings
pub fn apply(document: &Document, update: &Document) -> Result<Document> {
    UpdateSpec::parse(update)?.apply(document, &EngineConfig::default())
}
