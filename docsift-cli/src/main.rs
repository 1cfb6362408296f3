use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use docsift_core::{
    set_log_level, Database, Document, FindOptions, LogLevel, Pipeline, Projection,
    SortDirection, SortSpec,
};
use serde_json::Value;
use std::path::PathBuf;

mod fixtures;
mod tasks;

use fixtures::{load_config, load_fixtures};

#[derive(Parser)]
#[command(name = "docsift")]
#[command(about = "docsift CLI - run queries, updates and aggregations over JSON fixtures")]
#[command(version)]
struct Cli {
    /// Engine config file (regex_mode, null_array_policy, id_strategy)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Log level: off, error, warn, info, debug, trace
    #[arg(long, global = true, default_value = "off", value_parser = parse_log_level)]
    log_level: LogLevel,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load fixtures and replay the reference task script
    Run {
        /// Fixture file: { "collection": [documents...], ... }
        fixtures: PathBuf,
    },
    /// Query one collection
    Find {
        fixtures: PathBuf,
        #[arg(long)]
        collection: String,
        /// Filter as JSON
        #[arg(long, default_value = "{}")]
        filter: String,
        /// Projection as JSON
        #[arg(long)]
        projection: Option<String>,
        /// Sort key as FIELD or FIELD:DIR (asc, desc, 1, -1); repeatable
        #[arg(long)]
        sort: Vec<String>,
        #[arg(long)]
        skip: Option<usize>,
        /// Maximum documents to print; 0 means no limit
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Run an aggregation pipeline over one collection
    Aggregate {
        fixtures: PathBuf,
        #[arg(long)]
        collection: String,
        /// Pipeline as a JSON array of stages
        #[arg(long)]
        pipeline: String,
    },
}

fn parse_log_level(s: &str) -> std::result::Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level '{}'", s))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    set_log_level(cli.log_level);

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { fixtures } => {
            let db = load_fixtures(&fixtures, config)?;
            run_tasks(&db)
        }
        Commands::Find {
            fixtures,
            collection,
            filter,
            projection,
            sort,
            skip,
            limit,
        } => {
            let db = load_fixtures(&fixtures, config)?;
            let options = find_options(projection.as_deref(), &sort, skip, limit)?;
            let found = find(&db, &collection, &filter, &options)?;
            print_json(&found)
        }
        Commands::Aggregate {
            fixtures,
            collection,
            pipeline,
        } => {
            let db = load_fixtures(&fixtures, config)?;
            let results = aggregate(&db, &collection, &pipeline)?;
            print_json(&results)
        }
    }
}

fn run_tasks(db: &Database) -> Result<()> {
    let mut failed = 0;
    for report in tasks::run_script(db) {
        match report.outcome {
            Ok(value) => {
                println!("result of {}", report.label);
                print_json(&value)?;
            }
            Err(err) => {
                eprintln!("{} failed: {:#}", report.label, err);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} task(s) failed", failed);
    }
    Ok(())
}

fn print_json(value: &Value) -> Result<()> {
    let json = serde_json::to_string_pretty(value).with_context(|| "Failed to serialize to JSON")?;
    println!("{}", json);
    Ok(())
}

fn parse_json_document(arg: &str, what: &str) -> Result<Document> {
    let json: Value =
        serde_json::from_str(arg).with_context(|| format!("Invalid JSON in --{}", what))?;
    Document::from_json(json).with_context(|| format!("--{} must be a JSON object", what))
}

/// `age`, `age:desc`, `age:-1`
fn parse_sort_key(arg: &str) -> Result<(String, SortDirection)> {
    let (field, direction) = match arg.rsplit_once(':') {
        Some((field, dir)) => {
            let direction = SortDirection::parse(dir)
                .ok_or_else(|| anyhow!("Invalid sort direction '{}' in '{}'", dir, arg))?;
            (field, direction)
        }
        None => (arg, SortDirection::Ascending),
    };
    if field.is_empty() {
        bail!("Empty sort field in '{}'", arg);
    }
    Ok((field.to_string(), direction))
}

fn find_options(
    projection: Option<&str>,
    sort: &[String],
    skip: Option<usize>,
    limit: Option<usize>,
) -> Result<FindOptions> {
    let mut options = FindOptions::new();
    if let Some(projection) = projection {
        let spec = parse_json_document(projection, "projection")?;
        options = options.with_projection(Projection::from_document(&spec)?);
    }
    if !sort.is_empty() {
        let keys = sort
            .iter()
            .map(|s| parse_sort_key(s))
            .collect::<Result<Vec<_>>>()?;
        options = options.with_sort(SortSpec::new(keys));
    }
    if let Some(skip) = skip {
        options = options.with_skip(skip);
    }
    if let Some(limit) = limit {
        options = options.with_limit(limit);
    }
    Ok(options)
}

fn find(db: &Database, collection: &str, filter: &str, options: &FindOptions) -> Result<Value> {
    let filter = parse_json_document(filter, "filter")?;
    let coll = db
        .get_collection(collection)
        .with_context(|| format!("Unknown collection '{}'", collection))?;
    let docs = coll
        .find_with_options(&filter, options)
        .with_context(|| format!("Failed to query collection: {}", collection))?;
    Ok(Value::Array(docs.iter().map(Document::to_json).collect()))
}

fn aggregate(db: &Database, collection: &str, pipeline: &str) -> Result<Value> {
    let json: Value = serde_json::from_str(pipeline).with_context(|| "Invalid JSON in --pipeline")?;
    let pipeline = Pipeline::from_json(json)?;
    let coll = db
        .get_collection(collection)
        .with_context(|| format!("Unknown collection '{}'", collection))?;
    let docs = coll
        .aggregate(&pipeline)
        .with_context(|| format!("Failed to aggregate collection: {}", collection))?;
    Ok(Value::Array(docs.iter().map(Document::to_json).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsift_core::EngineConfig;
    use serde_json::json;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn fixture_db() -> Database {
        let mut file = NamedTempFile::new().unwrap();
        let data = json!({
            "people": [
                {"name": "Ann", "age": 40},
                {"name": "Ben", "age": 10},
                {"name": "Cat", "age": 30},
                {"name": "Dan", "age": 20},
                {"name": "Eve", "age": 50}
            ]
        });
        file.write_all(data.to_string().as_bytes()).unwrap();
        load_fixtures(file.path(), EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();

        let cli = Cli::try_parse_from([
            "docsift", "find", "f.json", "--collection", "people", "--sort", "age:desc",
            "--sort", "name", "--limit", "2", "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, LogLevel::Debug);
        assert!(matches!(cli.command, Commands::Find { ref sort, limit: Some(2), .. } if sort.len() == 2));

        assert!(Cli::try_parse_from(["docsift", "run", "f.json", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_parse_sort_key() {
        assert_eq!(parse_sort_key("age").unwrap(), ("age".to_string(), SortDirection::Ascending));
        assert_eq!(parse_sort_key("age:desc").unwrap().1, SortDirection::Descending);
        assert_eq!(parse_sort_key("a.b:-1").unwrap(), ("a.b".to_string(), SortDirection::Descending));
        assert!(parse_sort_key("age:sideways").is_err());
        assert!(parse_sort_key(":asc").is_err());
    }

    #[test]
    fn test_find_sort_limit() {
        let db = fixture_db();
        let options = find_options(Some(r#"{"_id": 0, "age": 1}"#), &["age".to_string()], None, Some(3)).unwrap();
        let found = find(&db, "people", "{}", &options).unwrap();
        assert_eq!(found, json!([{"age": 10}, {"age": 20}, {"age": 30}]));
    }

    #[test]
    fn test_find_filter_and_skip() {
        let db = fixture_db();
        let options = find_options(None, &["age:desc".to_string()], Some(1), None).unwrap();
        let found = find(&db, "people", r#"{"age": {"$gte": 20}}"#, &options).unwrap();
        let names: Vec<&Value> = found.as_array().unwrap().iter().map(|d| &d["name"]).collect();
        assert_eq!(names, vec![&json!("Ann"), &json!("Cat"), &json!("Dan")]);
    }

    #[test]
    fn test_find_errors() {
        let db = fixture_db();
        let options = FindOptions::new();
        assert!(find(&db, "nobody", "{}", &options).is_err());
        assert!(find(&db, "people", "not json", &options).is_err());
        assert!(find(&db, "people", "[1]", &options).is_err());
        assert!(find(&db, "people", r#"{"age": {"$near": 1}}"#, &options).is_err());
        assert!(find_options(Some(r#"{"a": 1, "b": 0}"#), &[], None, None).is_err());
    }

    #[test]
    fn test_aggregate_command() {
        let db = fixture_db();
        let results = aggregate(
            &db,
            "people",
            r#"[{"$match": {"age": {"$lt": 35}}}, {"$group": {"_id": 0, "avg": {"$avg": "$age"}}}]"#,
        )
        .unwrap();
        assert_eq!(results, json!([{"_id": 0, "avg": 20}]));

        assert!(aggregate(&db, "people", r#"{"$limit": 1}"#).is_err());
        assert!(aggregate(&db, "people", r#"[{"$bucket": {}}]"#).is_err());
    }
}
