//! Semantic structural validation of model output.
//!
//! Compares arbitrary JSON values against an expected value with
//! domain-aware rules rather than byte equality:
//!
//! - integer- and fractional-valued numbers are mutually compatible, with
//!   a relative tolerance of 1e-3 on fractional comparisons
//! - object key sets must match exactly (extra and missing keys both fail)
//! - arrays compare element-by-element, except at configured
//!   order-insensitive paths where they compare as multisets
//!
//! Comparison is depth-first and short-circuits on the first failing
//! sub-path; the failing path is reported in dotted/`[i]` notation. The
//! validator holds only the static order-insensitive path set and is safe
//! to share across concurrent evaluations.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::{Number, Value};
use thiserror::Error;
use tracing::warn;

/// Relative tolerance for fractional number comparison.
const REL_TOLERANCE: f64 = 1e-3;

/// Nesting depth past which comparison gives up instead of recursing.
const MAX_DEPTH: usize = 64;

/// Outcome of a single comparison. Produced fresh per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub passed: bool,
    /// Dotted path of the failing node; empty for the root or on success.
    pub path: String,
    pub message: Option<String>,
}

impl ValidationOutcome {
    fn pass() -> Self {
        ValidationOutcome {
            passed: true,
            path: String::new(),
            message: None,
        }
    }

    fn fail(path: &str, message: String) -> Self {
        ValidationOutcome {
            passed: false,
            path: path.to_string(),
            message: Some(message),
        }
    }
}

/// Sentinel for text that could not be parsed as a JSON value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("parse failure: {message}")]
pub struct ParseFailure {
    pub message: String,
}

/// Parse text into a JSON value, stripping a single leading/trailing
/// Markdown code fence first. A parse failure is a sentinel value, never a
/// panic or a propagated fault.
pub fn parse_lenient(text: &str) -> Result<Value, ParseFailure> {
    let mut cleaned = text.trim();
    if let Some(rest) = cleaned.strip_prefix("```json") {
        cleaned = rest;
    } else if let Some(rest) = cleaned.strip_prefix("```") {
        cleaned = rest;
    }
    if let Some(rest) = cleaned.strip_suffix("```") {
        cleaned = rest;
    }
    serde_json::from_str(cleaned.trim()).map_err(|err| ParseFailure {
        message: err.to_string(),
    })
}

/// Rules file schema: `{"unordered_paths": ["filters.tags", ...]}`.
#[derive(Debug, Default, Deserialize)]
struct ValidationRules {
    #[serde(default)]
    unordered_paths: Vec<String>,
}

/// Load the order-insensitive path set from an optional rules file.
/// A missing or malformed file degrades to the empty set.
pub fn load_validation_rules(path: &Path) -> HashSet<String> {
    if !path.exists() {
        return HashSet::new();
    }
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            warn!("failed to read validation rules {}: {err}", path.display());
            return HashSet::new();
        }
    };
    match serde_json::from_str::<ValidationRules>(&content) {
        Ok(rules) => rules.unordered_paths.into_iter().collect(),
        Err(err) => {
            warn!("failed to parse validation rules {}: {err}", path.display());
            HashSet::new()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SemanticValidator {
    unordered_paths: HashSet<String>,
}

impl SemanticValidator {
    pub fn new(unordered_paths: HashSet<String>) -> Self {
        Self { unordered_paths }
    }

    pub fn validate(&self, actual: &Value, expected: &Value) -> ValidationOutcome {
        self.validate_at(actual, expected, "", 0)
    }

    fn validate_at(
        &self,
        actual: &Value,
        expected: &Value,
        path: &str,
        depth: usize,
    ) -> ValidationOutcome {
        if depth > MAX_DEPTH {
            return ValidationOutcome::fail(
                path,
                format!("nesting depth exceeds {MAX_DEPTH} at '{path}'"),
            );
        }

        match (expected, actual) {
            (Value::Object(expected_map), Value::Object(actual_map)) => {
                let expected_keys: BTreeSet<&str> =
                    expected_map.keys().map(String::as_str).collect();
                let actual_keys: BTreeSet<&str> = actual_map.keys().map(String::as_str).collect();
                if expected_keys != actual_keys {
                    let missing: Vec<&str> =
                        expected_keys.difference(&actual_keys).copied().collect();
                    let extra: Vec<&str> = actual_keys.difference(&expected_keys).copied().collect();
                    return ValidationOutcome::fail(
                        path,
                        format!("key mismatch at '{path}': missing {missing:?}, extra {extra:?}"),
                    );
                }
                for (key, expected_child) in expected_map {
                    let child_path = if path.is_empty() {
                        key.clone()
                    } else {
                        format!("{path}.{key}")
                    };
                    if let Some(actual_child) = actual_map.get(key) {
                        let outcome =
                            self.validate_at(actual_child, expected_child, &child_path, depth + 1);
                        if !outcome.passed {
                            return outcome;
                        }
                    }
                }
                ValidationOutcome::pass()
            }
            (Value::Array(expected_items), Value::Array(actual_items)) => {
                if expected_items.len() != actual_items.len() {
                    return ValidationOutcome::fail(
                        path,
                        format!(
                            "array length mismatch at '{path}': expected {}, got {}",
                            expected_items.len(),
                            actual_items.len()
                        ),
                    );
                }
                if self.unordered_paths.contains(path) {
                    self.compare_as_multiset(expected_items, actual_items, path)
                } else {
                    for (index, (expected_item, actual_item)) in
                        expected_items.iter().zip(actual_items).enumerate()
                    {
                        let child_path = format!("{path}[{index}]");
                        let outcome =
                            self.validate_at(actual_item, expected_item, &child_path, depth + 1);
                        if !outcome.passed {
                            return outcome;
                        }
                    }
                    ValidationOutcome::pass()
                }
            }
            (Value::Number(expected_num), Value::Number(actual_num)) => {
                compare_numbers(expected_num, actual_num, path)
            }
            (Value::String(expected_str), Value::String(actual_str)) => {
                if expected_str == actual_str {
                    ValidationOutcome::pass()
                } else {
                    ValidationOutcome::fail(
                        path,
                        format!(
                            "value mismatch at '{path}': expected '{expected_str}', got '{actual_str}'"
                        ),
                    )
                }
            }
            (Value::Bool(expected_bool), Value::Bool(actual_bool)) => {
                if expected_bool == actual_bool {
                    ValidationOutcome::pass()
                } else {
                    ValidationOutcome::fail(
                        path,
                        format!(
                            "value mismatch at '{path}': expected {expected_bool}, got {actual_bool}"
                        ),
                    )
                }
            }
            (Value::Null, Value::Null) => ValidationOutcome::pass(),
            (expected, actual) => ValidationOutcome::fail(
                path,
                format!(
                    "type mismatch at '{path}': expected {}, got {}",
                    type_name(expected),
                    type_name(actual)
                ),
            ),
        }
    }

    /// Order-insensitive, duplicate-sensitive comparison: render every
    /// element to its canonical string and compare the sorted sequences.
    fn compare_as_multiset(
        &self,
        expected_items: &[Value],
        actual_items: &[Value],
        path: &str,
    ) -> ValidationOutcome {
        let mut expected_rendered: Vec<String> =
            expected_items.iter().map(Value::to_string).collect();
        let mut actual_rendered: Vec<String> = actual_items.iter().map(Value::to_string).collect();
        expected_rendered.sort();
        actual_rendered.sort();
        if expected_rendered != actual_rendered {
            return ValidationOutcome::fail(
                path,
                format!(
                    "set content mismatch at '{path}': {expected_rendered:?} != {actual_rendered:?}"
                ),
            );
        }
        ValidationOutcome::pass()
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn compare_numbers(expected: &Number, actual: &Number, path: &str) -> ValidationOutcome {
    let matches = if expected.is_f64() {
        // Fractional expectation: relative tolerance.
        match (expected.as_f64(), actual.as_f64()) {
            (Some(e), Some(a)) => approx_eq(a, e),
            _ => false,
        }
    } else if actual.is_f64() {
        // Exact integer expected against a fractional actual: the values
        // must agree exactly (1 == 1.0 passes, 1 != 1.5).
        expected.as_f64().zip(actual.as_f64()).map_or(false, |(e, a)| e == a)
    } else {
        integer_value(expected) == integer_value(actual)
    };
    if matches {
        ValidationOutcome::pass()
    } else {
        ValidationOutcome::fail(
            path,
            format!("number mismatch at '{path}': expected {expected}, got {actual}"),
        )
    }
}

fn integer_value(number: &Number) -> Option<i128> {
    number
        .as_i64()
        .map(i128::from)
        .or_else(|| number.as_u64().map(i128::from))
}

fn approx_eq(a: f64, b: f64) -> bool {
    if a == b {
        return true;
    }
    (a - b).abs() <= REL_TOLERANCE * a.abs().max(b.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> SemanticValidator {
        SemanticValidator::default()
    }

    #[test]
    fn test_reflexivity() {
        let values = [
            json!(null),
            json!(true),
            json!(42),
            json!(1.5),
            json!("text"),
            json!([1, "two", [3.0, null]]),
            json!({"a": {"b": [1, 2]}, "c": "d"}),
        ];
        for value in &values {
            let outcome = validator().validate(value, value);
            assert!(outcome.passed, "reflexivity failed for {value}: {outcome:?}");
        }
    }

    #[test]
    fn test_key_set_strictness() {
        let expected = json!({"a": 1, "b": 2});
        let actual = json!({"a": 1, "c": 2});
        let outcome = validator().validate(&actual, &expected);
        assert!(!outcome.passed);
        let message = outcome.message.unwrap();
        assert!(message.contains("missing"));
        assert!(message.contains("\"b\""));
        assert!(message.contains("extra"));
        assert!(message.contains("\"c\""));
    }

    #[test]
    fn test_subset_object_fails() {
        let expected = json!({"a": 1});
        let actual = json!({"a": 1, "b": 2});
        assert!(!validator().validate(&actual, &expected).passed);
    }

    #[test]
    fn test_unordered_path_passes_as_multiset() {
        let validator = SemanticValidator::new(
            ["filters.tags".to_string()].into_iter().collect(),
        );
        let expected = json!({"filters": {"tags": ["x", "y"]}});
        let actual = json!({"filters": {"tags": ["y", "x"]}});
        assert!(validator.validate(&actual, &expected).passed);
    }

    #[test]
    fn test_same_inputs_fail_at_ordered_path() {
        let validator = SemanticValidator::new(
            ["filters.tags".to_string()].into_iter().collect(),
        );
        let expected = json!({"filters": {"ids": ["x", "y"]}});
        let actual = json!({"filters": {"ids": ["y", "x"]}});
        let outcome = validator.validate(&actual, &expected);
        assert!(!outcome.passed);
        assert_eq!(outcome.path, "filters.ids[0]");
    }

    #[test]
    fn test_multiset_is_duplicate_sensitive() {
        let validator = SemanticValidator::new(["tags".to_string()].into_iter().collect());
        let expected = json!({"tags": ["x", "x", "y"]});
        let actual = json!({"tags": ["x", "y", "y"]});
        assert!(!validator.validate(&actual, &expected).passed);
    }

    #[test]
    fn test_numeric_tolerance() {
        let expected = json!(1.0);
        assert!(validator().validate(&json!(1.0009), &expected).passed);
        assert!(!validator().validate(&json!(1.01), &expected).passed);
    }

    #[test]
    fn test_integer_and_float_are_compatible() {
        assert!(validator().validate(&json!(1.0), &json!(1)).passed);
        assert!(validator().validate(&json!(1), &json!(1.0)).passed);
        assert!(!validator().validate(&json!(1.5), &json!(1)).passed);
    }

    #[test]
    fn test_exact_integers() {
        assert!(validator().validate(&json!(7), &json!(7)).passed);
        assert!(!validator().validate(&json!(8), &json!(7)).passed);
    }

    #[test]
    fn test_type_mismatch_names_both_types() {
        let outcome = validator().validate(&json!("1"), &json!(1));
        assert!(!outcome.passed);
        let message = outcome.message.unwrap();
        assert!(message.contains("expected number"));
        assert!(message.contains("got string"));
    }

    #[test]
    fn test_array_length_mismatch_reports_both_lengths() {
        let outcome = validator().validate(&json!([1, 2, 3]), &json!([1, 2]));
        assert!(!outcome.passed);
        let message = outcome.message.unwrap();
        assert!(message.contains("expected 2"));
        assert!(message.contains("got 3"));
    }

    #[test]
    fn test_failure_path_is_dotted() {
        let expected = json!({"a": {"b": [1, {"c": true}]}});
        let actual = json!({"a": {"b": [1, {"c": false}]}});
        let outcome = validator().validate(&actual, &expected);
        assert!(!outcome.passed);
        assert_eq!(outcome.path, "a.b[1].c");
    }

    #[test]
    fn test_depth_bound_fails_instead_of_overflowing() {
        let mut expected = json!(1);
        for _ in 0..200 {
            expected = json!([expected]);
        }
        let actual = expected.clone();
        let outcome = validator().validate(&actual, &expected);
        assert!(!outcome.passed);
        assert!(outcome.message.unwrap().contains("depth"));
    }

    #[test]
    fn test_parse_lenient_strips_fence() {
        let value = parse_lenient("```json\n{\"x\":1}\n```").unwrap();
        assert_eq!(value, json!({"x": 1}));
        let value = parse_lenient("```\n[1, 2]\n```").unwrap();
        assert_eq!(value, json!([1, 2]));
    }

    #[test]
    fn test_parse_lenient_returns_sentinel() {
        assert!(parse_lenient("not json").is_err());
        assert!(parse_lenient("").is_err());
    }

    #[test]
    fn test_load_validation_rules_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let rules = load_validation_rules(&dir.path().join("absent.json"));
        assert!(rules.is_empty());
    }

    #[test]
    fn test_load_validation_rules_reads_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rules.json");
        std::fs::write(&path, r#"{"unordered_paths": ["a.b", "c"]}"#).unwrap();
        let rules = load_validation_rules(&path);
        assert!(rules.contains("a.b"));
        assert!(rules.contains("c"));
    }
}
