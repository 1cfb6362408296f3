// docsift-core/src/find_options.rs
// Find query options: projection, sort, limit, skip

use std::cmp::Ordering;

use crate::document::{Document, ID_FIELD};
use crate::error::{DocSiftError, Result};
use crate::path;
use crate::value::Value;
use crate::value_utils::compare_values_with_none;

/// Sort direction: `1` / `"ascending"` or `-1` / `"descending"`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn from_value(value: &Value) -> Result<Self> {
        let direction = match value {
            Value::String(s) => Self::parse(s),
            _ => match value.as_i64() {
                Some(1) => Some(SortDirection::Ascending),
                Some(-1) => Some(SortDirection::Descending),
                _ => None,
            },
        };
        direction.ok_or_else(|| {
            DocSiftError::InvalidExpression(format!(
                "Sort direction must be 1, -1, \"ascending\" or \"descending\", got {}",
                value
            ))
        })
    }

    /// Parse a textual direction (`asc`, `ascending`, `desc`, `descending`, `1`, `-1`)
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "1" | "asc" | "ascending" => Some(SortDirection::Ascending),
            "-1" | "desc" | "descending" => Some(SortDirection::Descending),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            SortDirection::Ascending => 1,
            SortDirection::Descending => -1,
        }
    }
}

/// Multi-key sort, applied as one stable sort
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SortSpec {
    keys: Vec<(String, SortDirection)>,
}

impl SortSpec {
    pub fn new(keys: Vec<(String, SortDirection)>) -> Self {
        SortSpec { keys }
    }

    /// Single-key sort; chain [`SortSpec::then_by`] for more keys
    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        SortSpec {
            keys: vec![(field.into(), direction)],
        }
    }

    pub fn then_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push((field.into(), direction));
        self
    }

    /// Parse `{field: 1, other: -1}`; key order is sort priority
    pub fn from_document(spec: &Document) -> Result<Self> {
        let keys = spec
            .iter()
            .map(|(field, dir)| -> Result<(String, SortDirection)> {
                path::parse(field)?;
                Ok((field.clone(), SortDirection::from_value(dir)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SortSpec { keys })
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[(String, SortDirection)] {
        &self.keys
    }

    pub fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for (field, direction) in &self.keys {
            let cmp = compare_values_with_none(a.get(field), b.get(field));
            if cmp != Ordering::Equal {
                return match direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    }

    /// Stable sort: ties keep their incoming order
    pub fn apply(&self, docs: &mut [Document]) {
        if self.keys.is_empty() {
            return;
        }
        docs.sort_by(|a, b| self.compare(a, b));
    }
}

/// What a projection does with one field
#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionField {
    Include,
    Exclude,
    /// Value taken from another path (`{name: "$_id"}`)
    Computed(String),
}

impl ProjectionField {
    fn from_value(field: &str, value: &Value) -> Result<Self> {
        match value {
            Value::Bool(true) => Ok(ProjectionField::Include),
            Value::Bool(false) => Ok(ProjectionField::Exclude),
            Value::Number(n) if *n == 0.0 => Ok(ProjectionField::Exclude),
            Value::Number(_) => Ok(ProjectionField::Include),
            Value::String(_) => match path::field_reference(value) {
                Some(source) => {
                    path::parse(source)?;
                    Ok(ProjectionField::Computed(source.to_string()))
                }
                None => Err(DocSiftError::InvalidExpression(format!(
                    "Projection for '{}' must be 0, 1 or a \"$field\" reference, got {}",
                    field, value
                ))),
            },
            other => Err(DocSiftError::InvalidExpression(format!(
                "Invalid projection value for '{}': {}",
                field, other
            ))),
        }
    }
}

/// Field projection
///
/// Inclusion mode keeps only the listed fields (plus `_id`); exclusion mode
/// drops the listed fields. Mixing the two is an error, except that `_id`
/// may always be excluded.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection {
    id: ProjectionField,
    fields: Vec<(String, ProjectionField)>,
    exclusion: bool,
}

impl Projection {
    pub fn from_document(spec: &Document) -> Result<Self> {
        check_path_collisions(spec)?;

        let mut id = ProjectionField::Include;
        let mut fields = Vec::new();

        for (field, value) in spec {
            let action = ProjectionField::from_value(field, value)?;
            if field == ID_FIELD {
                id = action;
            } else {
                path::parse(field)?;
                fields.push((field.clone(), action));
            }
        }

        let excludes = fields
            .iter()
            .filter(|(_, a)| *a == ProjectionField::Exclude)
            .count();
        let exclusion = excludes > 0 || (fields.is_empty() && id == ProjectionField::Exclude);

        if excludes > 0 && excludes < fields.len() {
            return Err(DocSiftError::InvalidExpression(
                "Projection cannot mix inclusion and exclusion (except for _id)".to_string(),
            ));
        }
        if exclusion && matches!(id, ProjectionField::Computed(_)) {
            return Err(DocSiftError::InvalidExpression(
                "Projection cannot compute _id in exclusion mode".to_string(),
            ));
        }

        Ok(Projection {
            id,
            fields,
            exclusion,
        })
    }

    pub fn from_json(json: serde_json::Value) -> Result<Self> {
        Self::from_document(&Document::from_json(json)?)
    }

    pub fn is_exclusion(&self) -> bool {
        self.exclusion
    }

    /// Project one document
    pub fn apply(&self, doc: &Document) -> Result<Document> {
        if self.exclusion {
            let mut result = doc.clone();
            for (field, _) in &self.fields {
                result.remove_path(field);
            }
            if self.id == ProjectionField::Exclude {
                result.remove(ID_FIELD);
            }
            return Ok(result);
        }

        let mut result = Document::new();
        let id = match &self.id {
            ProjectionField::Include => doc.id().cloned(),
            ProjectionField::Computed(source) => doc.get(source).cloned(),
            ProjectionField::Exclude => None,
        };
        if let Some(id) = id {
            result.insert(ID_FIELD, id);
        }

        for (field, action) in &self.fields {
            let value = match action {
                ProjectionField::Include => doc.get(field),
                ProjectionField::Computed(source) => doc.get(source),
                ProjectionField::Exclude => None,
            };
            if let Some(value) = value {
                result.set_path(field, value.clone())?;
            }
        }
        Ok(result)
    }
}

/// Reject projections naming both a path and one of its descendants
fn check_path_collisions(spec: &Document) -> Result<()> {
    let paths: Vec<&String> = spec.keys().collect();
    for (i, outer) in paths.iter().enumerate() {
        for inner in &paths[i + 1..] {
            let (short, long) = if outer.len() <= inner.len() {
                (outer.as_str(), inner.as_str())
            } else {
                (inner.as_str(), outer.as_str())
            };
            if long.strip_prefix(short).is_some_and(|rest| rest.starts_with('.')) {
                return Err(DocSiftError::InvalidExpression(format!(
                    "Projection path collision between '{}' and '{}'",
                    outer, inner
                )));
            }
        }
    }
    Ok(())
}

/// Options for find queries
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub projection: Option<Projection>,

    /// Applied before skip/limit
    pub sort: Option<SortSpec>,

    /// Maximum number of documents to return; `0` means no limit
    pub limit: Option<usize>,

    /// Number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    pub fn with_sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Sort, skip, limit, then project
    pub fn apply(&self, mut docs: Vec<Document>) -> Result<Vec<Document>> {
        if let Some(sort) = &self.sort {
            sort.apply(&mut docs);
        }
        let docs = apply_skip_limit(docs, self.skip, self.limit);
        match &self.projection {
            Some(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
            None => Ok(docs),
        }
    }
}

/// Apply skip then limit; a limit of `0` is the same as none
pub fn apply_skip_limit(docs: Vec<Document>, skip: Option<usize>, limit: Option<usize>) -> Vec<Document> {
    let limit = match limit {
        None | Some(0) => usize::MAX,
        Some(n) => n,
    };
    docs.into_iter().skip(skip.unwrap_or(0)).take(limit).collect()
}
