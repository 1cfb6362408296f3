// aggregation_tests.rs
// Pipelines over the students collection: $unwind, $match, $group, $sort, $limit, $project

use docsift_core::{Collection, DocSiftError, Document, Pipeline};
use serde_json::{json, Value};

fn students() -> Collection {
    let coll = Collection::with_defaults("students");
    let docs = [
        json!({"name": "Alice", "scores": [
            {"type": "exam", "score": 90}, {"type": "quiz", "score": 85}, {"type": "homework", "score": 80}]}),
        json!({"name": "Bob", "scores": [
            {"type": "exam", "score": 70}, {"type": "quiz", "score": 60}, {"type": "homework", "score": 60}]}),
    ];
    coll.insert_many(docs.into_iter().map(|d| Document::from_json(d).unwrap()).collect())
        .unwrap();
    coll
}

fn run(coll: &Collection, pipeline: Value) -> Result<Value, DocSiftError> {
    let pipeline = Pipeline::from_json(pipeline)?;
    let docs = coll.aggregate(&pipeline)?;
    Ok(Value::Array(docs.iter().map(Document::to_json).collect()))
}

// ========== REFERENCE PIPELINES ==========

#[test]
fn test_worst_homework_score() {
    let result = run(
        &students(),
        json!([
            {"$unwind": "$scores"},
            {"$match": {"scores.type": "homework"}},
            {"$group": {"_id": "$name", "worst_homework_score": {"$min": "$scores.score"}}},
            {"$sort": {"worst_homework_score": 1}},
            {"$limit": 1},
            {"$project": {"_id": 0, "name": "$_id", "worst_homework_score": 1}}
        ]),
    )
    .unwrap();
    assert_eq!(result, json!([{"name": "Bob", "worst_homework_score": 60}]));
}

#[test]
fn test_average_homework_score() {
    let result = run(
        &students(),
        json!([
            {"$unwind": "$scores"},
            {"$match": {"scores.type": "homework"}},
            {"$group": {"_id": 0, "avg_score": {"$avg": "$scores.score"}}},
            {"$project": {"_id": 0, "avg_score": 1}}
        ]),
    )
    .unwrap();
    assert_eq!(result, json!([{"avg_score": 70}]));
}

#[test]
fn test_average_per_student_descending() {
    let result = run(
        &students(),
        json!([
            {"$unwind": "$scores"},
            {"$group": {"_id": "$name", "avg_score": {"$avg": "$scores.score"}}},
            {"$sort": {"avg_score": -1}},
            {"$project": {"_id": 0, "name": "$_id", "avg_score": 1}}
        ]),
    )
    .unwrap();
    let rows = result.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0], json!({"name": "Alice", "avg_score": 85}));
    assert_eq!(rows[1]["name"], json!("Bob"));
    let bob_avg = rows[1]["avg_score"].as_f64().unwrap();
    assert!((bob_avg - 190.0 / 3.0).abs() < 1e-9);
}

// ========== STAGE BEHAVIOR ==========

#[test]
fn test_aggregate_does_not_mutate_collection() {
    let coll = students();
    run(&coll, json!([{"$unwind": "$scores"}, {"$limit": 1}])).unwrap();
    assert_eq!(coll.len(), 2);
    let alice = coll
        .find_one(&Document::from_json(json!({"name": "Alice"})).unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(alice.to_json()["scores"].as_array().unwrap().len(), 3);
}

#[test]
fn test_unwind_counts() {
    let result = run(&students(), json!([{"$unwind": "$scores"}])).unwrap();
    assert_eq!(result.as_array().unwrap().len(), 6);
    assert_eq!(result[0]["scores"], json!({"type": "exam", "score": 90}));
    assert_eq!(result[0]["_id"], result[2]["_id"]);
}

#[test]
fn test_empty_pipeline_returns_all() {
    let result = run(&students(), json!([])).unwrap();
    assert_eq!(result.as_array().unwrap().len(), 2);
}

#[test]
fn test_group_with_no_input_yields_nothing() {
    let result = run(
        &students(),
        json!([
            {"$match": {"name": "Nobody"}},
            {"$group": {"_id": 0, "avg": {"$avg": "$x"}}}
        ]),
    )
    .unwrap();
    assert_eq!(result, json!([]));
}

#[test]
fn test_invalid_pipelines() {
    let coll = students();
    let bad = [
        json!({"$limit": 1}),
        json!([{"$limit": 0}]),
        json!([{"$limit": -3}]),
        json!([{"$sort": {}}]),
        json!([{"$group": {"avg": {"$avg": "$x"}}}]),
        json!([{"$group": {"_id": 0, "total": {"$sum": "$x"}}}]),
        json!([{"$unwind": "scores"}]),
        json!([{"$match": {"a": {"$bogus": 1}}}]),
        json!([{"$project": {}}]),
        json!([{"$facet": {}}]),
        json!([{"$limit": 1, "$sort": {"a": 1}}]),
    ];
    for pipeline in bad {
        let err = run(&coll, pipeline.clone()).unwrap_err();
        assert!(
            matches!(err, DocSiftError::InvalidExpression(_)),
            "expected InvalidExpression for {}",
            pipeline
        );
    }
}
