// src/aggregation.rs
// Aggregation pipeline implementation

use ahash::AHashMap;

use crate::config::EngineConfig;
use crate::document::{Document, ID_FIELD};
use crate::error::{DocSiftError, Result};
use crate::find_options::{Projection, SortSpec};
use crate::path;
use crate::query::{matches_filter_with, validate_filter};
use crate::value::Value;
use crate::value_utils::canonical_key;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

/// Parse a field reference (e.g., "$scores.score" -> "scores.score")
fn parse_field_reference(value: &Value, context: &str) -> Result<String> {
    let reference = path::field_reference(value).ok_or_else(|| {
        DocSiftError::InvalidExpression(format!(
            "{} must be a \"$field\" reference, got {}",
            context, value
        ))
    })?;
    path::parse(reference)?;
    Ok(reference.to_string())
}

fn expect_object<'a>(value: &'a Value, context: &str) -> Result<&'a Document> {
    value.as_document().ok_or_else(|| {
        DocSiftError::InvalidExpression(format!(
            "{} must be an object, got {}",
            context,
            value.type_name()
        ))
    })
}

/// Aggregation pipeline
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

/// Pipeline stage
#[derive(Debug, Clone)]
pub enum Stage {
    Unwind(UnwindStage),
    Match(MatchStage),
    Group(GroupStage),
    Sort(SortStage),
    Limit(LimitStage),
    Project(ProjectStage),
}

/// $unwind stage - one output document per array element
#[derive(Debug, Clone)]
pub struct UnwindStage {
    path: String,
}

/// $match stage - filter documents
#[derive(Debug, Clone)]
pub struct MatchStage {
    filter: Document,
}

/// $group stage - partition documents and reduce each partition
#[derive(Debug, Clone)]
pub struct GroupStage {
    id: GroupId,
    /// Declaration order is output order
    accumulators: Vec<(String, Accumulator)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupId {
    /// "$type"
    Field(String),
    /// Any literal (`null`, `0`, ...): one group for everything
    Constant(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Accumulator {
    Min(String),
    Avg(String),
}

/// $sort stage
#[derive(Debug, Clone)]
pub struct SortStage {
    sort: SortSpec,
}

/// $limit stage
#[derive(Debug, Clone)]
pub struct LimitStage {
    limit: usize,
}

/// $project stage
#[derive(Debug, Clone)]
pub struct ProjectStage {
    projection: Projection,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    /// Parse stage documents; an empty list is a valid no-op pipeline
    pub fn from_documents(stages: &[Document]) -> Result<Self> {
        let stages = stages
            .iter()
            .map(Stage::from_document)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    /// Parse a JSON array of stage objects
    pub fn from_json(pipeline_json: serde_json::Value) -> Result<Self> {
        match Value::from(pipeline_json) {
            Value::Array(stages) => {
                let docs = stages
                    .iter()
                    .map(|s| expect_object(s, "Pipeline stage").cloned())
                    .collect::<Result<Vec<_>>>()?;
                Self::from_documents(&docs)
            }
            other => Err(DocSiftError::InvalidExpression(format!(
                "Pipeline must be an array, got {}",
                other.type_name()
            ))),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Execute with default engine settings
    pub fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        self.execute_with(docs, &EngineConfig::default())
    }

    /// Run stages left to right, each over the full output of the previous one
    pub fn execute_with(&self, mut docs: Vec<Document>, config: &EngineConfig) -> Result<Vec<Document>> {
        for stage in &self.stages {
            docs = stage.execute(docs, config)?;
        }
        Ok(docs)
    }
}

impl Stage {
    /// Parse stage from its document form (`{"$unwind": "$scores"}`)
    pub fn from_document(stage: &Document) -> Result<Self> {
        // Each stage should have exactly one key
        if stage.len() != 1 {
            return Err(DocSiftError::InvalidExpression(format!(
                "Each stage must have exactly one operator, got {}",
                stage.len()
            )));
        }
        let (stage_name, spec) = stage.iter().next().ok_or_else(|| {
            DocSiftError::InvalidExpression("Pipeline stage cannot be empty".to_string())
        })?;

        match stage_name.as_str() {
            "$unwind" => Ok(Stage::Unwind(UnwindStage::from_value(spec)?)),
            "$match" => Ok(Stage::Match(MatchStage::from_value(spec)?)),
            "$group" => Ok(Stage::Group(GroupStage::from_value(spec)?)),
            "$sort" => Ok(Stage::Sort(SortStage::from_value(spec)?)),
            "$limit" => Ok(Stage::Limit(LimitStage::from_value(spec)?)),
            "$project" => Ok(Stage::Project(ProjectStage::from_value(spec)?)),
            _ => Err(DocSiftError::InvalidExpression(format!(
                "Unknown pipeline stage: {}",
                stage_name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Unwind(_) => "$unwind",
            Stage::Match(_) => "$match",
            Stage::Group(_) => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Limit(_) => "$limit",
            Stage::Project(_) => "$project",
        }
    }

    fn execute(&self, docs: Vec<Document>, config: &EngineConfig) -> Result<Vec<Document>> {
        match self {
            Stage::Unwind(stage) => stage.execute(docs),
            Stage::Match(stage) => stage.execute(docs, config),
            Stage::Group(stage) => stage.execute(docs),
            Stage::Sort(stage) => Ok(stage.execute(docs)),
            Stage::Limit(stage) => Ok(stage.execute(docs)),
            Stage::Project(stage) => stage.execute(docs),
        }
    }
}

impl UnwindStage {
    pub fn new(path: impl Into<String>) -> Self {
        UnwindStage { path: path.into() }
    }

    /// `"$path"` or `{path: "$path"}`
    fn from_value(spec: &Value) -> Result<Self> {
        let reference = match spec {
            Value::Object(obj) => {
                if let Some(key) = obj.keys().find(|k| k.as_str() != "path") {
                    return Err(DocSiftError::InvalidExpression(format!(
                        "Unsupported $unwind option: {}",
                        key
                    )));
                }
                obj.get_field("path").ok_or_else(|| {
                    DocSiftError::InvalidExpression("$unwind requires 'path'".to_string())
                })?
            }
            other => other,
        };
        Ok(UnwindStage {
            path: parse_field_reference(reference, "$unwind path")?,
        })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        let mut results = Vec::with_capacity(docs.len());

        for doc in docs {
            let elements = match doc.get(&self.path) {
                Some(Value::Array(arr)) => arr.clone(),
                // Non-array or absent: pass through unchanged
                _ => {
                    results.push(doc);
                    continue;
                }
            };
            for elem in elements {
                let mut unwound = doc.clone();
                unwound.set_path(&self.path, elem)?;
                results.push(unwound);
            }
        }
        Ok(results)
    }
}

impl MatchStage {
    pub fn new(filter: Document) -> Result<Self> {
        validate_filter(&filter)?;
        Ok(MatchStage { filter })
    }

    fn from_value(spec: &Value) -> Result<Self> {
        Self::new(expect_object(spec, "$match")?.clone())
    }

    fn execute(&self, docs: Vec<Document>, config: &EngineConfig) -> Result<Vec<Document>> {
        let mut results = Vec::new();
        for doc in docs {
            if matches_filter_with(&doc, &self.filter, config)? {
                results.push(doc);
            }
        }
        Ok(results)
    }
}

/// Running state of one accumulator within one group
#[derive(Debug, Clone, Default)]
struct AccumulatorState {
    min: Option<f64>,
    sum: f64,
    count: u64,
}

impl AccumulatorState {
    fn add(&mut self, value: Option<&Value>) {
        // Non-numeric and absent values are skipped by both accumulators
        if let Some(n) = value.and_then(Value::as_f64) {
            self.min = Some(self.min.map_or(n, |m| m.min(n)));
            self.sum += n;
            self.count += 1;
        }
    }

    fn finish(&self, accumulator: &Accumulator) -> Value {
        match accumulator {
            Accumulator::Min(_) => self.min.map(Value::Number).unwrap_or(Value::Null),
            Accumulator::Avg(_) if self.count == 0 => Value::Null,
            Accumulator::Avg(_) => Value::Number(self.sum / self.count as f64),
        }
    }
}

impl Accumulator {
    fn from_value(field: &str, spec: &Value) -> Result<Self> {
        let obj = expect_object(spec, &format!("Accumulator '{}'", field))?;
        if obj.len() != 1 {
            return Err(DocSiftError::InvalidExpression(format!(
                "Accumulator '{}' must have exactly one operator",
                field
            )));
        }
        let (op, value) = obj.iter().next().ok_or_else(|| {
            DocSiftError::InvalidExpression(format!("Accumulator '{}' is empty", field))
        })?;

        match op.as_str() {
            "$min" => Ok(Accumulator::Min(parse_field_reference(value, "$min")?)),
            "$avg" => Ok(Accumulator::Avg(parse_field_reference(value, "$avg")?)),
            _ => Err(DocSiftError::InvalidExpression(format!(
                "Unknown accumulator: {}",
                op
            ))),
        }
    }

    fn field(&self) -> &str {
        match self {
            Accumulator::Min(field) | Accumulator::Avg(field) => field,
        }
    }
}

impl GroupStage {
    pub fn new(id: GroupId, accumulators: Vec<(String, Accumulator)>) -> Self {
        GroupStage { id, accumulators }
    }

    fn from_value(spec: &Value) -> Result<Self> {
        let obj = expect_object(spec, "$group")?;

        let id = match obj.get_field(ID_FIELD) {
            None => {
                return Err(DocSiftError::InvalidExpression(
                    "$group must have an _id field".to_string(),
                ))
            }
            Some(value) if value.as_str().is_some_and(|s| s.starts_with('$')) => {
                GroupId::Field(parse_field_reference(value, "$group _id")?)
            }
            Some(value) => GroupId::Constant(value.clone()),
        };

        let accumulators = obj
            .iter()
            .filter(|(field, _)| field.as_str() != ID_FIELD)
            .map(|(field, value)| -> Result<(String, Accumulator)> {
                Ok((field.clone(), Accumulator::from_value(field, value)?))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(GroupStage { id, accumulators })
    }

    fn group_key(&self, doc: &Document) -> Value {
        match &self.id {
            // Absent groups with null
            GroupId::Field(field) => doc.get(field).cloned().unwrap_or(Value::Null),
            GroupId::Constant(value) => value.clone(),
        }
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        // Partitions in first-seen order
        let mut index: AHashMap<String, usize> = AHashMap::new();
        let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

        for doc in &docs {
            let key = self.group_key(doc);
            let slot = *index.entry(canonical_key(&key)).or_insert_with(|| {
                groups.push((key, vec![AccumulatorState::default(); self.accumulators.len()]));
                groups.len() - 1
            });

            let states = &mut groups[slot].1;
            for (state, (_, accumulator)) in states.iter_mut().zip(&self.accumulators) {
                state.add(doc.get(accumulator.field()));
            }
        }

        Ok(groups
            .into_iter()
            .map(|(key, states)| {
                let mut result = Document::new();
                result.insert(ID_FIELD, key);
                for (state, (name, accumulator)) in states.iter().zip(&self.accumulators) {
                    result.insert(name.clone(), state.finish(accumulator));
                }
                result
            })
            .collect())
    }
}

impl SortStage {
    pub fn new(sort: SortSpec) -> Self {
        SortStage { sort }
    }

    fn from_value(spec: &Value) -> Result<Self> {
        let sort = SortSpec::from_document(expect_object(spec, "$sort")?)?;
        if sort.is_empty() {
            return Err(DocSiftError::InvalidExpression(
                "$sort requires at least one field".to_string(),
            ));
        }
        Ok(SortStage { sort })
    }

    fn execute(&self, mut docs: Vec<Document>) -> Vec<Document> {
        self.sort.apply(&mut docs);
        docs
    }
}

impl LimitStage {
    pub fn new(limit: usize) -> Result<Self> {
        if limit == 0 {
            return Err(DocSiftError::InvalidExpression(
                "$limit must be positive".to_string(),
            ));
        }
        Ok(LimitStage { limit })
    }

    fn from_value(spec: &Value) -> Result<Self> {
        match spec.as_i64() {
            Some(n) if n > 0 => Self::new(n as usize),
            _ => Err(DocSiftError::InvalidExpression(format!(
                "$limit must be a positive integer, got {}",
                spec
            ))),
        }
    }

    fn execute(&self, mut docs: Vec<Document>) -> Vec<Document> {
        docs.truncate(self.limit);
        docs
    }
}

impl ProjectStage {
    pub fn new(projection: Projection) -> Self {
        ProjectStage { projection }
    }

    fn from_value(spec: &Value) -> Result<Self> {
        let obj = expect_object(spec, "$project")?;
        if obj.is_empty() {
            return Err(DocSiftError::InvalidExpression(
                "$project requires at least one field".to_string(),
            ));
        }
        Ok(ProjectStage {
            projection: Projection::from_document(obj)?,
        })
    }

    fn execute(&self, docs: Vec<Document>) -> Result<Vec<Document>> {
        docs.iter().map(|d| self.projection.apply(d)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    fn docs(json: serde_json::Value) -> Vec<Document> {
        json.as_array().unwrap().iter().map(|d| doc(d.clone())).collect()
    }

    fn run(pipeline: serde_json::Value, input: serde_json::Value) -> Vec<serde_json::Value> {
        Pipeline::from_json(pipeline)
            .unwrap()
            .execute(docs(input))
            .unwrap()
            .iter()
            .map(Document::to_json)
            .collect()
    }

    // ========== Parsing ==========

    #[test]
    fn test_pipeline_not_array() {
        assert!(Pipeline::from_json(json!({"$match": {}})).is_err());
    }

    #[test]
    fn test_pipeline_empty_returns_input() {
        let out = run(json!([]), json!([{"a": 1}, {"a": 2}]));
        assert_eq!(out, vec![json!({"a": 1}), json!({"a": 2})]);
    }

    #[test]
    fn test_stage_shape_errors() {
        assert!(Pipeline::from_json(json!([1])).is_err());
        assert!(Pipeline::from_json(json!([{"$match": {}, "$limit": 1}])).is_err());
        assert!(Pipeline::from_json(json!([{"$bucket": {}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$skip": 1}])).is_err());
    }

    // ========== $unwind ==========

    #[test]
    fn test_unwind_array() {
        let out = run(
            json!([{"$unwind": "$scores"}]),
            json!([{"_id": 1, "scores": [{"type": "exam"}, {"type": "quiz"}]}]),
        );
        assert_eq!(
            out,
            vec![
                json!({"_id": 1, "scores": {"type": "exam"}}),
                json!({"_id": 1, "scores": {"type": "quiz"}})
            ]
        );
    }

    #[test]
    fn test_unwind_empty_non_array_and_absent() {
        let out = run(
            json!([{"$unwind": {"path": "$tags"}}]),
            json!([{"n": 1, "tags": []}, {"n": 2, "tags": "solo"}, {"n": 3}]),
        );
        assert_eq!(out, vec![json!({"n": 2, "tags": "solo"}), json!({"n": 3})]);
    }

    #[test]
    fn test_unwind_invalid() {
        assert!(Pipeline::from_json(json!([{"$unwind": "scores"}])).is_err());
        assert!(Pipeline::from_json(json!([{"$unwind": {"path": "$a", "preserveNullAndEmptyArrays": true}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$unwind": {}}])).is_err());
    }

    // ========== $group ==========

    #[test]
    fn test_group_constant_id_avg() {
        let out = run(
            json!([{"$group": {"_id": 0, "avg": {"$avg": "$score"}}}]),
            json!([{"score": 80}, {"score": 60}]),
        );
        assert_eq!(out, vec![json!({"_id": 0, "avg": 70})]);
    }

    #[test]
    fn test_group_by_field_first_seen_order() {
        let out = run(
            json!([{"$group": {"_id": "$type", "low": {"$min": "$score"}, "avg": {"$avg": "$score"}}}]),
            json!([
                {"type": "quiz", "score": 50},
                {"type": "exam", "score": 90},
                {"type": "quiz", "score": 70},
                {"score": 10}
            ]),
        );
        assert_eq!(
            out,
            vec![
                json!({"_id": "quiz", "low": 50, "avg": 60}),
                json!({"_id": "exam", "low": 90, "avg": 90}),
                json!({"_id": null, "low": 10, "avg": 10})
            ]
        );
    }

    #[test]
    fn test_group_output_field_order() {
        let out = Pipeline::from_json(json!([{"$group": {"_id": null, "b": {"$min": "$x"}, "a": {"$avg": "$x"}}}]))
            .unwrap()
            .execute(docs(json!([{"x": 1}])))
            .unwrap();
        let keys: Vec<&String> = out[0].keys().collect();
        assert_eq!(keys, vec!["_id", "b", "a"]);
    }

    #[test]
    fn test_group_non_numeric_values() {
        let out = run(
            json!([{"$group": {"_id": null, "low": {"$min": "$v"}, "avg": {"$avg": "$v"}}}]),
            json!([{"v": "text"}, {"v": null}, {}]),
        );
        assert_eq!(out, vec![json!({"_id": null, "low": null, "avg": null})]);
    }

    #[test]
    fn test_group_empty_input() {
        assert!(run(json!([{"$group": {"_id": 0, "avg": {"$avg": "$x"}}}]), json!([])).is_empty());
    }

    #[test]
    fn test_group_object_keys_partition_by_value() {
        let out = run(
            json!([{"$group": {"_id": "$k", "n": {"$min": "$n"}}}]),
            json!([{"k": {"a": 1, "b": 2}, "n": 3}, {"k": {"b": 2, "a": 1}, "n": 1}]),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["n"], json!(1));
    }

    #[test]
    fn test_group_invalid() {
        assert!(Pipeline::from_json(json!([{"$group": {"avg": {"$avg": "$x"}}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$group": {"_id": 0, "s": {"$sum": 1}}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$group": {"_id": 0, "s": {"$avg": "x"}}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$group": {"_id": 0, "s": 5}}])).is_err());
    }

    // ========== $sort / $limit / $project ==========

    #[test]
    fn test_sort_then_limit() {
        let out = run(
            json!([{"$sort": {"age": 1}}, {"$limit": 3}]),
            json!([{"age": 40}, {"age": 10}, {"age": 30}, {"age": 20}, {"age": 50}]),
        );
        assert_eq!(out, vec![json!({"age": 10}), json!({"age": 20}), json!({"age": 30})]);
    }

    #[test]
    fn test_limit_invalid() {
        assert!(Pipeline::from_json(json!([{"$limit": 0}])).is_err());
        assert!(Pipeline::from_json(json!([{"$limit": -2}])).is_err());
        assert!(Pipeline::from_json(json!([{"$limit": 1.5}])).is_err());
        assert!(LimitStage::new(0).is_err());
    }

    #[test]
    fn test_project_rename_id() {
        let out = run(
            json!([{"$project": {"_id": 0, "type": "$_id", "avg": 1}}]),
            json!([{"_id": "exam", "avg": 70}]),
        );
        assert_eq!(out, vec![json!({"type": "exam", "avg": 70})]);
    }

    #[test]
    fn test_project_invalid() {
        assert!(Pipeline::from_json(json!([{"$project": {}}])).is_err());
        assert!(Pipeline::from_json(json!([{"$project": {"a": 1, "b": 0}}])).is_err());
    }

    // ========== Full pipelines ==========

    #[test]
    fn test_unwind_match_group_sort() {
        let students = json!([
            {"_id": 1, "scores": [{"type": "homework", "score": 80}, {"type": "exam", "score": 90}]},
            {"_id": 2, "scores": [{"type": "homework", "score": 60}, {"type": "exam", "score": 70}]}
        ]);
        let out = run(
            json!([
                {"$unwind": "$scores"},
                {"$match": {"scores.type": "homework"}},
                {"$group": {"_id": 0, "avg": {"$avg": "$scores.score"}}}
            ]),
            students.clone(),
        );
        assert_eq!(out, vec![json!({"_id": 0, "avg": 70})]);

        let out = run(
            json!([
                {"$unwind": "$scores"},
                {"$group": {"_id": "$scores.type", "lowest": {"$min": "$scores.score"}}},
                {"$sort": {"_id": 1}}
            ]),
            students,
        );
        assert_eq!(
            out,
            vec![json!({"_id": "exam", "lowest": 70}), json!({"_id": "homework", "lowest": 60})]
        );
    }

    #[test]
    fn test_match_uses_config_regex_mode() {
        use crate::config::RegexMode;
        let pipeline = Pipeline::from_json(json!([{"$match": {"name": {"$regex": "ohn"}}}])).unwrap();
        let input = docs(json!([{"name": "John"}]));
        assert_eq!(pipeline.execute(input.clone()).unwrap().len(), 1);
        let prefix = EngineConfig::default().with_regex_mode(RegexMode::Prefix);
        assert!(pipeline.execute_with(input, &prefix).unwrap().is_empty());
    }
}
