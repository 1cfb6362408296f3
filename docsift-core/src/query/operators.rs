// src/query/operators.rs
//! Query operator trait definitions and implementations
//!
//! Each filter operator is a separate type implementing [`OperatorMatcher`],
//! looked up by name in a registry.
//!
//! ```text
//! OperatorMatcher trait
//!     ↓
//! ┌──────────────────────┬────────────────┬────────────────┐
//! │ Comparison           │ Logical        │ Element        │
//! │ ($eq, $gt, $in...)   │ ($and, $or)    │ ($exists)      │
//! └──────────────────────┴────────────────┴────────────────┘
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;

use lazy_static::lazy_static;
use lru::LruCache;
use parking_lot::Mutex;
use regex::Regex;

use crate::config::{EngineConfig, RegexMode};
use crate::document::Document;
use crate::error::{DocSiftError, Result};
use crate::path;
use crate::value::{RegexPattern, Value};
use crate::value_utils::numeric_cmp;

// ============================================================================
// REGEX SUPPORT
// ============================================================================

const REGEX_CACHE_CAPACITY: usize = 100;

lazy_static! {
    /// Global cache for compiled regex patterns
    /// Key format: "mode:options:pattern"
    static ref REGEX_CACHE: Mutex<LruCache<String, Regex>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
    ));
}

fn check_regex_options(options: &str) -> Result<()> {
    match options.chars().find(|c| !matches!(c, 'i' | 'm' | 's' | 'x')) {
        Some(bad) => Err(DocSiftError::InvalidExpression(format!(
            "Unsupported $options flag '{}' (allowed: i, m, s, x)",
            bad
        ))),
        None => Ok(()),
    }
}

/// Build the pattern string handed to the regex crate
///
/// Options become inline flags. In prefix mode a pattern that does not start
/// with `^` is anchored at the start of the input.
fn build_regex_pattern(pattern: &str, options: &str, mode: RegexMode) -> String {
    let mut regex_str = String::new();

    if !options.is_empty() {
        regex_str.push_str("(?");
        regex_str.push_str(options);
        regex_str.push(')');
    }

    match mode {
        RegexMode::Prefix if !pattern.starts_with('^') => {
            regex_str.push_str(r"\A(?:");
            regex_str.push_str(pattern);
            regex_str.push(')');
        }
        _ => regex_str.push_str(pattern),
    }
    regex_str
}

/// Get or compile a regex, going through the LRU cache
pub(crate) fn compile_regex(regex: &RegexPattern, mode: RegexMode) -> Result<Regex> {
    check_regex_options(&regex.options)?;
    let cache_key = format!("{:?}:{}:{}", mode, regex.options, regex.pattern);

    if let Some(compiled) = REGEX_CACHE.lock().get(&cache_key) {
        return Ok(compiled.clone());
    }

    let source = build_regex_pattern(&regex.pattern, &regex.options, mode);
    let compiled = Regex::new(&source).map_err(|e| {
        DocSiftError::InvalidExpression(format!("Invalid regex pattern '{}': {}", regex.pattern, e))
    })?;

    REGEX_CACHE.lock().put(cache_key, compiled.clone());
    Ok(compiled)
}

/// Regex operand of `$regex`: a string pattern or a regex value
fn regex_operand(operand: &Value) -> Result<RegexPattern> {
    match operand {
        Value::String(pattern) => Ok(RegexPattern::new(pattern.clone())),
        Value::Regex(re) => Ok(re.clone()),
        other => Err(DocSiftError::InvalidExpression(format!(
            "$regex requires a string pattern, got {}",
            other.type_name()
        ))),
    }
}

/// Does `value` match `regex`? Strings match by pattern, arrays if any
/// string element matches, anything else never matches.
fn value_matches_regex(value: &Value, regex: &Regex) -> bool {
    match value {
        Value::String(s) => regex.is_match(s),
        Value::Array(arr) => arr
            .iter()
            .any(|elem| matches!(elem, Value::String(s) if regex.is_match(s))),
        _ => false,
    }
}

// ============================================================================
// TRAIT DEFINITION
// ============================================================================

/// Evaluation context handed to every operator
pub struct MatchContext<'a> {
    /// The whole document (logical operators recurse into it)
    pub document: &'a Document,
    pub config: &'a EngineConfig,
}

/// Trait for all query operators
///
/// ```rust
/// use docsift_core::config::EngineConfig;
/// use docsift_core::document::Document;
/// use docsift_core::query::operators::{EqOperator, MatchContext, OperatorMatcher};
/// use docsift_core::value::Value;
///
/// let doc = Document::new();
/// let config = EngineConfig::default();
/// let ctx = MatchContext { document: &doc, config: &config };
/// let matches = EqOperator.matches(Some(&Value::from("Ann")), &Value::from("Ann"), &ctx).unwrap();
/// assert!(matches);
/// ```
pub trait OperatorMatcher: Send + Sync {
    /// Returns the operator name (e.g., "$eq", "$gt", "$and")
    fn name(&self) -> &'static str;

    /// Check the operand's shape without a document
    fn validate(&self, _operand: &Value, _config: &EngineConfig) -> Result<()> {
        Ok(())
    }

    /// Checks if a document value matches the filter criteria
    ///
    /// - `doc_value`: the resolved field value (`None` if the field is absent)
    /// - `operand`: the operator's argument from the filter
    /// - `ctx`: the document being matched and the engine config
    fn matches(
        &self,
        doc_value: Option<&Value>,
        operand: &Value,
        ctx: &MatchContext<'_>,
    ) -> Result<bool>;
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// `$eq`: deep equality, no array element matching
pub struct EqOperator;

impl OperatorMatcher for EqOperator {
    fn name(&self) -> &'static str {
        "$eq"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(doc_value == Some(operand))
    }
}

/// `$ne`: matches when the field differs or is absent
pub struct NeOperator;

impl OperatorMatcher for NeOperator {
    fn name(&self) -> &'static str {
        "$ne"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(doc_value != Some(operand))
    }
}

/// Numeric comparison helper for $gt, $gte, $lt, $lte
///
/// Absent fields and non-numbers on either side never match.
fn compare_numeric<F>(doc_value: Option<&Value>, operand: &Value, predicate: F) -> Result<bool>
where
    F: Fn(std::cmp::Ordering) -> bool,
{
    Ok(doc_value
        .and_then(|v| numeric_cmp(v, operand))
        .map(predicate)
        .unwrap_or(false))
}

pub struct GtOperator;

impl OperatorMatcher for GtOperator {
    fn name(&self) -> &'static str {
        "$gt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        compare_numeric(doc_value, operand, |ord| ord.is_gt())
    }
}

pub struct GteOperator;

impl OperatorMatcher for GteOperator {
    fn name(&self) -> &'static str {
        "$gte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        compare_numeric(doc_value, operand, |ord| ord.is_ge())
    }
}

pub struct LtOperator;

impl OperatorMatcher for LtOperator {
    fn name(&self) -> &'static str {
        "$lt"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        compare_numeric(doc_value, operand, |ord| ord.is_lt())
    }
}

pub struct LteOperator;

impl OperatorMatcher for LteOperator {
    fn name(&self) -> &'static str {
        "$lte"
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        compare_numeric(doc_value, operand, |ord| ord.is_le())
    }
}

// ============================================================================
// ARRAY / ELEMENT OPERATORS
// ============================================================================

/// `$in`: the value, or any element of an array value, equals a candidate
///
/// Regex candidates match strings by pattern.
pub struct InOperator;

impl InOperator {
    fn candidates(operand: &Value) -> Result<&Vec<Value>> {
        operand.as_array().ok_or_else(|| {
            DocSiftError::InvalidExpression(format!(
                "$in requires an array, got {}",
                operand.type_name()
            ))
        })
    }

    fn candidate_matches(candidate: &Value, value: &Value, mode: RegexMode) -> Result<bool> {
        match (candidate, value) {
            (Value::Regex(re), Value::String(s)) => Ok(compile_regex(re, mode)?.is_match(s)),
            _ => Ok(candidate == value),
        }
    }
}

impl OperatorMatcher for InOperator {
    fn name(&self) -> &'static str {
        "$in"
    }

    fn validate(&self, operand: &Value, config: &EngineConfig) -> Result<()> {
        for candidate in Self::candidates(operand)? {
            if let Value::Regex(re) = candidate {
                compile_regex(re, config.regex_mode)?;
            }
        }
        Ok(())
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let candidates = Self::candidates(operand)?;
        let value = match doc_value {
            Some(v) => v,
            None => return Ok(false),
        };
        let mode = ctx.config.regex_mode;

        for candidate in candidates {
            if Self::candidate_matches(candidate, value, mode)? {
                return Ok(true);
            }
            if let Value::Array(elements) = value {
                for elem in elements {
                    if Self::candidate_matches(candidate, elem, mode)? {
                        return Ok(true);
                    }
                }
            }
        }
        Ok(false)
    }
}

/// `$exists`: presence (`true`) or absence (`false`) of the field
pub struct ExistsOperator;

impl ExistsOperator {
    fn expected(operand: &Value) -> Result<bool> {
        operand.as_bool().ok_or_else(|| {
            DocSiftError::InvalidExpression(format!(
                "$exists requires a boolean, got {}",
                operand.type_name()
            ))
        })
    }
}

impl OperatorMatcher for ExistsOperator {
    fn name(&self) -> &'static str {
        "$exists"
    }

    fn validate(&self, operand: &Value, _config: &EngineConfig) -> Result<()> {
        Self::expected(operand).map(|_| ())
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, _ctx: &MatchContext<'_>) -> Result<bool> {
        Ok(doc_value.is_some() == Self::expected(operand)?)
    }
}

/// `$regex`: operand is a string pattern or a regex value
///
/// A sibling `$options` is folded into the operand before this runs.
pub struct RegexOperator;

impl OperatorMatcher for RegexOperator {
    fn name(&self) -> &'static str {
        "$regex"
    }

    fn validate(&self, operand: &Value, config: &EngineConfig) -> Result<()> {
        compile_regex(&regex_operand(operand)?, config.regex_mode).map(|_| ())
    }

    fn matches(&self, doc_value: Option<&Value>, operand: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        let regex = compile_regex(&regex_operand(operand)?, ctx.config.regex_mode)?;
        Ok(doc_value.map(|v| value_matches_regex(v, &regex)).unwrap_or(false))
    }
}

// ============================================================================
// LOGICAL OPERATORS
// ============================================================================

fn sub_filters<'a>(name: &str, operand: &'a Value) -> Result<Vec<&'a Document>> {
    let conditions = operand.as_array().ok_or_else(|| {
        DocSiftError::InvalidExpression(format!("{} requires an array", name))
    })?;
    if conditions.is_empty() {
        return Err(DocSiftError::InvalidExpression(format!(
            "{} requires a non-empty array",
            name
        )));
    }
    conditions
        .iter()
        .map(|c| {
            c.as_document().ok_or_else(|| {
                DocSiftError::InvalidExpression(format!(
                    "{} entries must be filter objects, got {}",
                    name,
                    c.type_name()
                ))
            })
        })
        .collect()
}

/// `$and`: every sub-filter matches
pub struct AndOperator;

impl OperatorMatcher for AndOperator {
    fn name(&self) -> &'static str {
        "$and"
    }

    fn validate(&self, operand: &Value, config: &EngineConfig) -> Result<()> {
        sub_filters(self.name(), operand)?
            .into_iter()
            .try_for_each(|f| validate_filter_with(f, config))
    }

    fn matches(&self, _doc_value: Option<&Value>, operand: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        for condition in sub_filters(self.name(), operand)? {
            if !matches_filter_with(ctx.document, condition, ctx.config)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// `$or`: at least one sub-filter matches
pub struct OrOperator;

impl OperatorMatcher for OrOperator {
    fn name(&self) -> &'static str {
        "$or"
    }

    fn validate(&self, operand: &Value, config: &EngineConfig) -> Result<()> {
        sub_filters(self.name(), operand)?
            .into_iter()
            .try_for_each(|f| validate_filter_with(f, config))
    }

    fn matches(&self, _doc_value: Option<&Value>, operand: &Value, ctx: &MatchContext<'_>) -> Result<bool> {
        for condition in sub_filters(self.name(), operand)? {
            if matches_filter_with(ctx.document, condition, ctx.config)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

// ============================================================================
// OPERATOR REGISTRY
// ============================================================================

lazy_static! {
    /// Field-level operators (`{field: {$op: operand}}`)
    pub static ref OPERATOR_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();

        registry.insert("$eq", Box::new(EqOperator));
        registry.insert("$ne", Box::new(NeOperator));
        registry.insert("$gt", Box::new(GtOperator));
        registry.insert("$gte", Box::new(GteOperator));
        registry.insert("$lt", Box::new(LtOperator));
        registry.insert("$lte", Box::new(LteOperator));
        registry.insert("$in", Box::new(InOperator));
        registry.insert("$exists", Box::new(ExistsOperator));
        registry.insert("$regex", Box::new(RegexOperator));

        registry
    };

    /// Top-level logical operators (`{$or: [...]}`)
    pub static ref LOGICAL_REGISTRY: HashMap<&'static str, Box<dyn OperatorMatcher>> = {
        let mut registry: HashMap<&'static str, Box<dyn OperatorMatcher>> = HashMap::new();
        registry.insert("$and", Box::new(AndOperator));
        registry.insert("$or", Box::new(OrOperator));
        registry
    };
}

fn field_operator(name: &str) -> Result<&'static dyn OperatorMatcher> {
    OPERATOR_REGISTRY
        .get(name)
        .map(|op| op.as_ref())
        .ok_or_else(|| DocSiftError::InvalidExpression(format!("Unknown operator: {}", name)))
}

fn logical_operator(name: &str) -> Result<&'static dyn OperatorMatcher> {
    LOGICAL_REGISTRY.get(name).map(|op| op.as_ref()).ok_or_else(|| {
        DocSiftError::InvalidExpression(format!("Unknown top-level operator: {}", name))
    })
}

// ============================================================================
// FILTER EVALUATION
// ============================================================================

/// One field condition, classified
enum Condition<'a> {
    /// `{field: literal}`; object literals without `$` keys land here too
    Literal(&'a Value),
    /// `{field: /re/}`
    RegexLiteral(&'a Value),
    /// `{field: {$op: .., ...}}`
    Operators(&'a Document),
}

fn classify(condition: &Value) -> Result<Condition<'_>> {
    match condition {
        Value::Regex(_) => Ok(Condition::RegexLiteral(condition)),
        Value::Object(obj) if !obj.is_empty() => {
            let operator_keys = obj.keys().filter(|k| k.starts_with('$')).count();
            if operator_keys == 0 {
                Ok(Condition::Literal(condition))
            } else if operator_keys == obj.len() {
                Ok(Condition::Operators(obj))
            } else {
                Err(DocSiftError::InvalidExpression(
                    "Cannot mix operators and plain fields in one condition".to_string(),
                ))
            }
        }
        _ => Ok(Condition::Literal(condition)),
    }
}

/// `$regex` operand with a sibling `$options` folded in
fn regex_with_options(conditions: &Document) -> Result<Option<Value>> {
    let options = match conditions.get_field("$options") {
        None => None,
        Some(Value::String(o)) => Some(o.as_str()),
        Some(other) => {
            return Err(DocSiftError::InvalidExpression(format!(
                "$options must be a string, got {}",
                other.type_name()
            )))
        }
    };

    match (conditions.get_field("$regex"), options) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(DocSiftError::InvalidExpression(
            "$options requires $regex".to_string(),
        )),
        (Some(operand), None) => Ok(Some(operand.clone())),
        (Some(operand), Some(options)) => {
            let mut regex = regex_operand(operand)?;
            for flag in options.chars() {
                if !regex.options.contains(flag) {
                    regex.options.push(flag);
                }
            }
            Ok(Some(Value::Regex(regex)))
        }
    }
}

fn matches_operators(
    doc_value: Option<&Value>,
    conditions: &Document,
    ctx: &MatchContext<'_>,
) -> Result<bool> {
    let regex = regex_with_options(conditions)?;

    for (op_name, operand) in conditions {
        let op_name = op_name.as_str();
        if op_name == "$options" {
            continue;
        }
        let operand = match (op_name, &regex) {
            ("$regex", Some(folded)) => folded,
            _ => operand,
        };
        if !field_operator(op_name)?.matches(doc_value, operand, ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(
    doc_value: Option<&Value>,
    condition: &Value,
    ctx: &MatchContext<'_>,
) -> Result<bool> {
    match classify(condition)? {
        Condition::Literal(literal) => EqOperator.matches(doc_value, literal, ctx),
        Condition::RegexLiteral(regex) => RegexOperator.matches(doc_value, regex, ctx),
        Condition::Operators(conditions) => matches_operators(doc_value, conditions, ctx),
    }
}

/// Main entry point for filter matching, with default engine settings
///
/// - `Ok(true)` if the document matches
/// - `Ok(false)` if it doesn't
/// - `Err(InvalidExpression)` if the filter is malformed
pub fn matches_filter(document: &Document, filter: &Document) -> Result<bool> {
    matches_filter_with(document, filter, &EngineConfig::default())
}

/// Filter matching under an explicit engine config
pub fn matches_filter_with(
    document: &Document,
    filter: &Document,
    config: &EngineConfig,
) -> Result<bool> {
    let ctx = MatchContext { document, config };

    for (key, condition) in filter {
        let matched = if key.starts_with('$') {
            logical_operator(key)?.matches(None, condition, &ctx)?
        } else {
            matches_condition(path::resolve(document, key), condition, &ctx)?
        };
        if !matched {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Check a filter's shape (operator names, operand types, regex syntax)
/// without evaluating it against any document
pub fn validate_filter(filter: &Document) -> Result<()> {
    validate_filter_with(filter, &EngineConfig::default())
}

pub fn validate_filter_with(filter: &Document, config: &EngineConfig) -> Result<()> {
    for (key, condition) in filter {
        if key.starts_with('$') {
            logical_operator(key)?.validate(condition, config)?;
            continue;
        }

        path::parse(key)?;
        match classify(condition)? {
            Condition::Literal(_) => {}
            Condition::RegexLiteral(regex) => RegexOperator.validate(regex, config)?,
            Condition::Operators(conditions) => {
                let regex = regex_with_options(conditions)?;
                for (op_name, operand) in conditions {
                    if op_name == "$options" {
                        continue;
                    }
                    let operand = match (op_name.as_str(), &regex) {
                        ("$regex", Some(folded)) => folded,
                        _ => operand,
                    };
                    field_operator(op_name)?.validate(operand, config)?;
                }
            }
        }
    }
    Ok(())
}
