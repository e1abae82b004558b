//! Assessment records and the train/holdout partition.

use std::fs;
use std::path::Path;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{OptimizerError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: String,
    pub content: String,
}

/// A single labeled assessment case. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssessmentRecord {
    /// Ordered conversation; the last turn is the input sent to the model.
    pub conversation: Vec<ConversationTurn>,
    /// Expected output: a JSON value, or a JSON-encoded string that is
    /// parsed lazily per evaluation.
    pub expected_json: Value,
}

impl AssessmentRecord {
    pub fn input_text(&self) -> &str {
        self.conversation
            .last()
            .map(|turn| turn.content.as_str())
            .unwrap_or("")
    }

    /// Resolve the expected value, parsing literal text if needed. A parse
    /// failure here is a data error: the item is excluded from the pass
    /// tally but never aborts the run.
    pub fn expected_value(&self) -> Result<Value> {
        match &self.expected_json {
            Value::String(raw) => serde_json::from_str(raw).map_err(|err| {
                OptimizerError::data(format!("expected_json is not valid JSON: {err}"))
            }),
            other => Ok(other.clone()),
        }
    }
}

/// Two disjoint partitions of the assessment set. Produced once per run
/// and never mutated; the holdout side is untouched until the gatekeeper
/// phase.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: Vec<AssessmentRecord>,
    pub holdout: Vec<AssessmentRecord>,
}

/// Load and schema-check an assessment file. Any malformed entry rejects
/// the whole file, naming the offending index.
pub fn load_assessment(path: &Path) -> Result<Vec<AssessmentRecord>> {
    let content = fs::read_to_string(path).map_err(|err| {
        OptimizerError::config(format!("assessment file {}: {err}", path.display()))
    })?;
    let raw: Value = serde_json::from_str(&content)
        .map_err(|err| OptimizerError::data(format!("assessment file is not valid JSON: {err}")))?;
    let items = raw
        .as_array()
        .ok_or_else(|| OptimizerError::data("assessment file must be a JSON array of records"))?;

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let record: AssessmentRecord = serde_json::from_value(item.clone())
            .map_err(|err| OptimizerError::data(format!("record at index {index}: {err}")))?;
        if record.conversation.is_empty() {
            return Err(OptimizerError::data(format!(
                "record at index {index}: conversation is empty"
            )));
        }
        if let Value::String(raw) = &record.expected_json {
            serde_json::from_str::<Value>(raw).map_err(|err| {
                OptimizerError::data(format!(
                    "record at index {index}: expected_json is not valid JSON: {err}"
                ))
            })?;
        }
        records.push(record);
    }
    Ok(records)
}

/// Deterministic shuffle + prefix/suffix split at `floor(len * ratio)`.
/// Same input and seed always yield the identical partition. If the split
/// would leave either side empty while more than one record exists, fall
/// back to an even midpoint split.
pub fn split_dataset(records: &[AssessmentRecord], train_ratio: f64, seed: u64) -> Dataset {
    let mut shuffled = records.to_vec();
    let mut rng = StdRng::seed_from_u64(seed);
    shuffled.shuffle(&mut rng);

    let mut split = ((shuffled.len() as f64) * train_ratio).floor() as usize;
    if shuffled.len() > 1 && (split == 0 || split == shuffled.len()) {
        split = shuffled.len() / 2;
    }

    let holdout = shuffled.split_off(split);
    Dataset {
        train: shuffled,
        holdout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(content: &str) -> AssessmentRecord {
        AssessmentRecord {
            conversation: vec![ConversationTurn {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            expected_json: json!({"ok": true}),
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let records: Vec<AssessmentRecord> =
            (0..10).map(|i| record(&format!("input {i}"))).collect();
        let first = split_dataset(&records, 0.8, 42);
        let second = split_dataset(&records, 0.8, 42);
        let inputs = |set: &[AssessmentRecord]| -> Vec<String> {
            set.iter().map(|r| r.input_text().to_string()).collect()
        };
        assert_eq!(inputs(&first.train), inputs(&second.train));
        assert_eq!(inputs(&first.holdout), inputs(&second.holdout));
        assert_eq!(first.train.len(), 8);
        assert_eq!(first.holdout.len(), 2);
    }

    #[test]
    fn test_split_midpoint_fallback() {
        let records: Vec<AssessmentRecord> = (0..2).map(|i| record(&format!("{i}"))).collect();
        let dataset = split_dataset(&records, 0.99, 7);
        assert_eq!(dataset.train.len(), 1);
        assert_eq!(dataset.holdout.len(), 1);
    }

    #[test]
    fn test_expected_value_parses_literal_text() {
        let mut rec = record("hi");
        rec.expected_json = json!("{\"a\": 1}");
        assert_eq!(rec.expected_value().unwrap(), json!({"a": 1}));

        rec.expected_json = json!("not json");
        assert!(rec.expected_value().is_err());
    }

    #[test]
    fn test_load_rejects_malformed_entry_by_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessment.json");
        fs::write(
            &path,
            r#"[
                {"conversation": [{"role": "user", "content": "ok"}], "expected_json": {"a": 1}},
                {"conversation": [], "expected_json": {"a": 1}}
            ]"#,
        )
        .unwrap();
        let err = load_assessment(&path).unwrap_err();
        assert!(err.to_string().contains("index 1"));
    }

    #[test]
    fn test_load_rejects_bad_expected_string() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessment.json");
        fs::write(
            &path,
            r#"[{"conversation": [{"role": "user", "content": "ok"}], "expected_json": "{{"}]"#,
        )
        .unwrap();
        let err = load_assessment(&path).unwrap_err();
        assert!(err.to_string().contains("index 0"));
    }

    #[test]
    fn test_load_accepts_valid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("assessment.json");
        fs::write(
            &path,
            r#"[{"conversation": [{"role": "user", "content": "ok"}], "expected_json": "{\"a\": 1}"}]"#,
        )
        .unwrap();
        let records = load_assessment(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].expected_value().unwrap(), json!({"a": 1}));
    }
}
