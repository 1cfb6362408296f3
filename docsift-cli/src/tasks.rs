// Reference task script over the `users`, `articles` and `students` collections
//
// Each task runs independently: a failing task is reported and the script
// moves on to the next one, so one bad fixture doesn't hide later results.

use anyhow::Result;
use docsift_core::{
    Database, Document, FindOneAndUpdateOptions, FindOptions, Pipeline, Projection,
    ReturnDocument, SortSpec, WriteModel,
};
use serde_json::{json, Value};

type Task = fn(&Database) -> Result<Value>;

const SCRIPT: &[(&str, Task)] = &[
    ("example", users_example),
    ("task 1", youngest_users),
    ("task 2", add_skills_field),
    ("task 3", push_skills_and_return),
    ("task 4", replace_john_in_ca),
    ("task 5", pull_tag_from_jason),
    ("task 6", add_tag_to_jason_once),
    ("task 7", delete_support_users),
    ("task 8", bulk_write_articles),
    ("task 9", find_tagged_articles),
    ("task 10", worst_homework_score),
    ("task 11", average_homework_score),
    ("task 12", average_score_per_student),
];

/// Outcome of one script entry
pub struct TaskReport {
    pub label: &'static str,
    pub outcome: Result<Value>,
}

/// Run every task in order against `db`
pub fn run_script(db: &Database) -> Vec<TaskReport> {
    SCRIPT
        .iter()
        .map(|&(label, task)| TaskReport {
            label,
            outcome: task(db),
        })
        .collect()
}

fn doc(json: Value) -> Result<Document> {
    Ok(Document::from_json(json)?)
}

fn docs_to_json(docs: &[Document]) -> Value {
    Value::Array(docs.iter().map(Document::to_json).collect())
}

fn aggregate(db: &Database, collection: &str, pipeline: Value) -> Result<Value> {
    let pipeline = Pipeline::from_json(pipeline)?;
    let results = db.collection(collection).aggregate(&pipeline)?;
    Ok(docs_to_json(&results))
}

// ========== USERS ==========

fn users_example(db: &Database) -> Result<Value> {
    let users = db.collection("users");
    let all_users = users.find(&Document::new())?;
    let first_user = users.find_one(&Document::new())?;
    Ok(json!({
        "allUsers": docs_to_json(&all_users),
        "firstUser": first_user.map(|d| d.to_json()),
    }))
}

/// Five youngest users, names and age only
fn youngest_users(db: &Database) -> Result<Value> {
    let options = FindOptions::new()
        .with_projection(Projection::from_json(
            json!({"_id": 0, "firstName": 1, "lastName": 1, "age": 1}),
        )?)
        .with_sort(SortSpec::from_document(&doc(json!({"age": "ascending"}))?)?)
        .with_limit(5);
    let users = db.collection("users").find_with_options(&Document::new(), &options)?;
    Ok(docs_to_json(&users))
}

/// `skills: []` for users aged 25..30 or tagged Engineering
fn add_skills_field(db: &Database) -> Result<Value> {
    let filter = doc(json!({
        "$or": [
            {"age": {"$gte": 25, "$lt": 30}},
            {"tags": {"$in": ["Engineering"]}}
        ]
    }))?;
    let result = db
        .collection("users")
        .update_many(&filter, &doc(json!({"$set": {"skills": []}}))?)?;
    Ok(serde_json::to_value(result)?)
}

fn push_skills_and_return(db: &Database) -> Result<Value> {
    let updated = db.collection("users").find_one_and_update(
        &doc(json!({"skills": {"$exists": true}}))?,
        &doc(json!({"$push": {"skills": {"$each": ["js", "git"]}}}))?,
        FindOneAndUpdateOptions::new().with_return_document(ReturnDocument::After),
    )?;
    Ok(updated.map(|d| d.to_json()).unwrap_or(Value::Null))
}

fn replace_john_in_ca(db: &Database) -> Result<Value> {
    let result = db.collection("users").replace_one(
        &doc(json!({"email": {"$regex": "^john"}, "address.state": "CA"}))?,
        &doc(json!({
            "firstName": "Jason",
            "lastName": "Wood",
            "tags": ["a", "b", "c"],
            "department": "Support"
        }))?,
    )?;
    Ok(serde_json::to_value(result)?)
}

fn pull_tag_from_jason(db: &Database) -> Result<Value> {
    let result = db.collection("users").update_one(
        &doc(json!({"firstName": "Jason", "lastName": "Wood"}))?,
        &doc(json!({"$pull": {"tags": {"$in": ["c"]}}}))?,
    )?;
    Ok(serde_json::to_value(result)?)
}

fn add_tag_to_jason_once(db: &Database) -> Result<Value> {
    let result = db.collection("users").update_one(
        &doc(json!({"firstName": "Jason", "lastName": "Wood"}))?,
        &doc(json!({"$addToSet": {"tags": {"$each": ["b"]}}}))?,
    )?;
    Ok(serde_json::to_value(result)?)
}

fn delete_support_users(db: &Database) -> Result<Value> {
    let result = db
        .collection("users")
        .delete_many(&doc(json!({"department": "Support"}))?)?;
    Ok(serde_json::to_value(result)?)
}

// ========== ARTICLES ==========

fn bulk_write_articles(db: &Database) -> Result<Value> {
    let models = [
        json!({"insertOne": {"document": {"type": "a"}}}),
        json!({"insertOne": {"document": {"type": "b"}}}),
        json!({"insertOne": {"document": {"type": "c"}}}),
        json!({"updateMany": {
            "filter": {"type": "a"},
            "update": {"$set": {"tags": ["tag1-a", "tag2-a", "tag3"]}}
        }}),
        json!({"updateMany": {
            "filter": {"type": {"$ne": "a"}},
            "update": {"$push": {"tags": {"$each": ["tag2", "tag3", "super"]}}}
        }}),
        json!({"updateMany": {
            "filter": {},
            "update": {"$pull": {"tags": {"$in": ["tag2", "tag1-a"]}}}
        }}),
    ]
    .into_iter()
    .map(WriteModel::from_json)
    .collect::<docsift_core::Result<Vec<_>>>()?;

    let result = db.collection("articles").bulk_write(models)?;
    Ok(serde_json::to_value(result)?)
}

fn find_tagged_articles(db: &Database) -> Result<Value> {
    let articles = db
        .collection("articles")
        .find(&doc(json!({"tags": {"$in": ["super", "tag2-a"]}}))?)?;
    Ok(docs_to_json(&articles))
}

// ========== STUDENTS ==========

fn worst_homework_score(db: &Database) -> Result<Value> {
    aggregate(
        db,
        "students",
        json!([
            {"$unwind": "$scores"},
            {"$match": {"scores.type": "homework"}},
            {"$group": {"_id": "$name", "worst_homework_score": {"$min": "$scores.score"}}},
            {"$sort": {"worst_homework_score": 1}},
            {"$limit": 1},
            {"$project": {"_id": 0, "name": "$_id", "worst_homework_score": 1}}
        ]),
    )
}

fn average_homework_score(db: &Database) -> Result<Value> {
    aggregate(
        db,
        "students",
        json!([
            {"$unwind": "$scores"},
            {"$match": {"scores.type": "homework"}},
            {"$group": {"_id": 0, "avg_score": {"$avg": "$scores.score"}}},
            {"$project": {"_id": 0, "avg_score": 1}}
        ]),
    )
}

fn average_score_per_student(db: &Database) -> Result<Value> {
    aggregate(
        db,
        "students",
        json!([
            {"$unwind": "$scores"},
            {"$group": {"_id": "$name", "avg_score": {"$avg": "$scores.score"}}},
            {"$sort": {"avg_score": -1}},
            {"$project": {"_id": 0, "name": "$_id", "avg_score": 1}}
        ]),
    )
}
