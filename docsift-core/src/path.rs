// docsift-core/src/path.rs
//! Dotted field paths (`address.state`)
//!
//! Resolution only descends through objects. Arrays are not dot-indexed:
//! `tags.0` on an array resolves to absent.

use crate::document::Document;
use crate::error::{DocSiftError, Result};
use crate::value::Value;

/// Split and check a dotted path; empty paths and empty segments are rejected
pub fn parse(path: &str) -> Result<Vec<&str>> {
    if path.is_empty() {
        return Err(DocSiftError::InvalidExpression(
            "Field path cannot be empty".to_string(),
        ));
    }
    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(DocSiftError::InvalidExpression(format!(
            "Field path '{}' contains an empty segment",
            path
        )));
    }
    Ok(segments)
}

/// Strip the `$` of a field reference (`"$scores.score"` → `"scores.score"`)
pub fn field_reference(value: &Value) -> Option<&str> {
    value
        .as_str()
        .and_then(|s| s.strip_prefix('$'))
        .filter(|s| !s.is_empty())
}

/// Resolve `path` against `doc`; `None` is absent, distinct from `Value::Null`
pub fn resolve<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get_field(path);
    }

    let mut segments = path.split('.');
    let mut current = doc.get_field(segments.next()?)?;
    for segment in segments {
        match current {
            Value::Object(child) => current = child.get_field(segment)?,
            _ => return None,
        }
    }
    Some(current)
}

/// Resolve against an arbitrary value (the value itself for an object root)
pub fn resolve_value<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    match value {
        Value::Object(doc) => resolve(doc, path),
        _ => None,
    }
}

/// Return a copy of `doc` with `path` set to `value`
pub fn set(doc: &Document, path: &str, value: Value) -> Result<Document> {
    let mut updated = doc.clone();
    set_in_place(&mut updated, path, value)?;
    Ok(updated)
}

/// Set `path` to `value`, creating intermediate objects as needed.
/// An existing non-object intermediate is a type mismatch.
pub fn set_in_place(doc: &mut Document, path: &str, value: Value) -> Result<()> {
    let segments = parse(path)?;
    set_segments(doc, &segments, path, value)
}

fn set_segments(doc: &mut Document, segments: &[&str], full_path: &str, value: Value) -> Result<()> {
    let (head, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return Ok(()),
    };

    if rest.is_empty() {
        doc.insert(*head, value);
        return Ok(());
    }

    match doc.get_field_mut(head) {
        Some(Value::Object(child)) => set_segments(child, rest, full_path, value),
        Some(other) => Err(DocSiftError::TypeMismatch(format!(
            "Cannot create field '{}' in '{}': existing value is {} (path '{}')",
            rest[0],
            head,
            other.type_name(),
            full_path
        ))),
        None => {
            let mut child = Document::new();
            set_segments(&mut child, rest, full_path, value)?;
            doc.insert(*head, Value::Object(child));
            Ok(())
        }
    }
}

/// Remove `path` from `doc`, returning the removed value
pub fn remove(doc: &mut Document, path: &str) -> Option<Value> {
    let segments = parse(path).ok()?;
    remove_segments(doc, &segments)
}

fn remove_segments(doc: &mut Document, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    if rest.is_empty() {
        return doc.remove(head);
    }
    match doc.get_field_mut(head)? {
        Value::Object(child) => remove_segments(child, rest),
        _ => None,
    }
}
