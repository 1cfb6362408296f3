//! Value utility functions shared across modules
//!
//! Ordering and identity helpers used by the matcher, sorting, grouping and
//! `$addToSet`.

use std::cmp::Ordering;

use crate::value::Value;

/// Compare two values numerically
///
/// Returns `None` unless both sides are numbers. Comparison operators in
/// filters only ever match numbers against numbers.
///
/// # Examples
///
/// ```
/// use std::cmp::Ordering;
/// use docsift_core::value::Value;
/// use docsift_core::value_utils::numeric_cmp;
///
/// assert_eq!(numeric_cmp(&Value::from(10), &Value::from(5)), Some(Ordering::Greater));
/// assert_eq!(numeric_cmp(&Value::from("10"), &Value::from(5)), None);
/// ```
pub fn numeric_cmp(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y),
        _ => None,
    }
}

/// Sort rank of a possibly-absent value
///
/// Absent < Null < Number < String < Object < Array < Bool < Regex
pub fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Object(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Bool(_)) => 6,
        Some(Value::Regex(_)) => 7,
    }
}

/// Total order over values, used by `$sort` and `find` sorting
pub fn total_cmp(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(Some(a)).cmp(&type_rank(Some(b)));
    if rank != Ordering::Equal {
        return rank;
    }

    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.partial_cmp(y).unwrap_or_else(|| {
            // NaN sorts below every other number
            x.is_nan().cmp(&y.is_nan()).reverse()
        }),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y.iter())
            .map(|(l, r)| total_cmp(l, r))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y.iter())
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| total_cmp(lv, rv)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Regex(x), Value::Regex(y)) => x
            .pattern
            .cmp(&y.pattern)
            .then_with(|| x.options.cmp(&y.options)),
        _ => Ordering::Equal,
    }
}

/// Compare two optional values with None handling
///
/// Missing values sort before everything, including `null`.
///
/// ```
/// use std::cmp::Ordering;
/// use docsift_core::value::Value;
/// use docsift_core::value_utils::compare_values_with_none;
///
/// assert_eq!(compare_values_with_none(None, Some(&Value::Null)), Ordering::Less);
/// assert_eq!(compare_values_with_none(Some(&Value::from(10)), None), Ordering::Greater);
/// ```
pub fn compare_values_with_none(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => total_cmp(av, bv),
    }
}

/// Creates a canonical string representation of a value
/// where object keys are always sorted alphabetically.
///
/// Two values have the same key exactly when they are deep-equal, so this is
/// used as the partition key of `$group`. Numbers that differ only in
/// representation (`1` and `1.0`) share a key; `1` and `"1"` do not.
pub fn canonical_key(value: &Value) -> String {
    match value {
        Value::Object(doc) => {
            let mut pairs: Vec<_> = doc.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));

            let inner: String = pairs
                .iter()
                .map(|(k, v)| format!("{}:{}", quote(k), canonical_key(v)))
                .collect::<Vec<_>>()
                .join(",");

            format!("{{{}}}", inner)
        }
        Value::Array(arr) => {
            let inner: String = arr
                .iter()
                .map(canonical_key)
                .collect::<Vec<_>>()
                .join(",");
            format!("[{}]", inner)
        }
        Value::String(s) => quote(s),
        Value::Regex(re) => format!("/{}/{}", re.pattern, re.options),
        // Null, Bool and Number render unambiguously as JSON
        other => other.to_json().to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(json: serde_json::Value) -> Value {
        Value::from(json)
    }

    #[test]
    fn test_numeric_cmp() {
        assert_eq!(numeric_cmp(&v(json!(3.5)), &v(json!(2.5))), Some(Ordering::Greater));
        assert_eq!(numeric_cmp(&v(json!(5)), &v(json!(5))), Some(Ordering::Equal));
        assert_eq!(numeric_cmp(&v(json!("a")), &v(json!(1))), None);
        assert_eq!(numeric_cmp(&v(json!(true)), &v(json!(1))), None);
        assert_eq!(numeric_cmp(&v(json!(null)), &v(json!(1))), None);
    }

    #[test]
    fn test_type_rank_order() {
        let ordered = vec![
            None,
            Some(v(json!(null))),
            Some(v(json!(5))),
            Some(v(json!("s"))),
            Some(v(json!({"a": 1}))),
            Some(v(json!([1]))),
            Some(v(json!(false))),
            Some(Value::regex("x")),
        ];
        for pair in ordered.windows(2) {
            assert!(type_rank(pair[0].as_ref()) < type_rank(pair[1].as_ref()));
        }
    }

    #[test]
    fn test_total_cmp_same_type() {
        assert_eq!(total_cmp(&v(json!(10)), &v(json!(2))), Ordering::Greater);
        assert_eq!(total_cmp(&v(json!("apple")), &v(json!("banana"))), Ordering::Less);
        assert_eq!(total_cmp(&v(json!(false)), &v(json!(true))), Ordering::Less);
        assert_eq!(total_cmp(&v(json!([1, 2])), &v(json!([1, 3]))), Ordering::Less);
        assert_eq!(total_cmp(&v(json!([1, 2])), &v(json!([1]))), Ordering::Greater);
    }

    #[test]
    fn test_total_cmp_across_types() {
        assert_eq!(total_cmp(&v(json!(null)), &v(json!(0))), Ordering::Less);
        assert_eq!(total_cmp(&v(json!(100)), &v(json!("1"))), Ordering::Less);
        assert_eq!(total_cmp(&v(json!(true)), &v(json!([1]))), Ordering::Greater);
    }

    #[test]
    fn test_total_cmp_nan_lowest_number() {
        assert_eq!(
            total_cmp(&Value::Number(f64::NAN), &Value::Number(-1e300)),
            Ordering::Less
        );
        assert_eq!(
            total_cmp(&Value::Number(f64::NAN), &Value::Number(f64::NAN)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_compare_values_with_none() {
        assert_eq!(compare_values_with_none(None, None), Ordering::Equal);
        assert_eq!(compare_values_with_none(None, Some(&Value::Null)), Ordering::Less);
        assert_eq!(
            compare_values_with_none(Some(&v(json!(5))), None),
            Ordering::Greater
        );
        assert_eq!(
            compare_values_with_none(Some(&v(json!(10))), Some(&v(json!(5)))),
            Ordering::Greater
        );
    }

    // ========== canonical_key tests ==========

    #[test]
    fn test_canonical_key_object_key_order() {
        let v1 = v(json!({"a": 1, "b": 2}));
        let v2 = v(json!({"b": 2, "a": 1}));
        assert_eq!(canonical_key(&v1), canonical_key(&v2));
        assert_eq!(canonical_key(&v1), r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_canonical_key_distinguishes_types() {
        assert_ne!(canonical_key(&v(json!(1))), canonical_key(&v(json!("1"))));
        assert_ne!(canonical_key(&v(json!(null))), canonical_key(&v(json!("null"))));
        assert_ne!(canonical_key(&Value::regex("a")), canonical_key(&v(json!("/a/"))));
        assert_eq!(canonical_key(&v(json!(1))), canonical_key(&v(json!(1.0))));
    }

    #[test]
    fn test_canonical_key_escapes_strings() {
        let tricky = v(json!({"a\",\"b": 1}));
        let plain = v(json!({"a": 1, "b": 1}));
        assert_ne!(canonical_key(&tricky), canonical_key(&plain));
    }
}
