//! Batch evaluation of a prompt against a dataset slice.
//!
//! Records are processed in fixed-size chunks to bound concurrent
//! in-flight generation calls: within a chunk every call is dispatched
//! concurrently and the chunk is awaited as a barrier before the next one
//! starts, so aggregation runs sequentially and race-free. Results are
//! recombined in original record order. Cancellation is cooperative,
//! checked between chunks.
//!
//! No single-item problem aborts the batch: transport errors, truncated or
//! non-JSON output, and malformed expected values all count as failed
//! items.

use futures_util::future::join_all;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::cancel::CancelFlag;
use crate::dataset::AssessmentRecord;
use crate::generation::ChatClient;
use crate::metrics::TokenCounter;
use crate::validator::SemanticValidator;

/// Upper bound on concurrent in-flight generation calls.
const CHUNK_SIZE: usize = 5;

/// A failed item, consumed once by the repair agent and then discarded.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub input: String,
    pub expected: Value,
    pub actual: Value,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    /// Passed items over all items; 0.0 for an empty input.
    pub accuracy: f64,
    pub failures: Vec<FailureRecord>,
    /// Average output tokens over passing items only. Failed items
    /// contribute nothing to this average.
    pub avg_output_tokens: f64,
}

pub struct BatchEvaluator {
    client: ChatClient,
    validator: SemanticValidator,
    token_counter: TokenCounter,
    model: String,
    temperature: f64,
}

impl BatchEvaluator {
    pub fn new(
        client: ChatClient,
        validator: SemanticValidator,
        token_counter: TokenCounter,
        model: String,
        temperature: f64,
    ) -> Self {
        Self {
            client,
            validator,
            token_counter,
            model,
            temperature,
        }
    }

    pub async fn evaluate(
        &self,
        prompt: &str,
        records: &[AssessmentRecord],
        cancel: &CancelFlag,
    ) -> EvalReport {
        let mut passed = 0usize;
        let mut failures = Vec::new();
        let mut passing_output_tokens = 0.0;

        for chunk in records.chunks(CHUNK_SIZE) {
            if cancel.is_cancelled() {
                info!("evaluation cancelled; skipping remaining chunks");
                break;
            }

            let calls = chunk.iter().map(|record| {
                self.client
                    .generate(prompt, record.input_text(), &self.model, self.temperature)
            });
            let results = join_all(calls).await;

            for (record, result) in chunk.iter().zip(results) {
                match result {
                    Ok(generation) => {
                        let expected = match record.expected_value() {
                            Ok(expected) => expected,
                            Err(err) => {
                                error!("data error for input '{}': {err}", record.input_text());
                                failures.push(FailureRecord {
                                    input: record.input_text().to_string(),
                                    expected: Value::Null,
                                    actual: generation.value,
                                    message: err.to_string(),
                                });
                                continue;
                            }
                        };
                        let outcome = self.validator.validate(&generation.value, &expected);
                        if outcome.passed {
                            passed += 1;
                            let tokens = generation.output_tokens.map(|t| t as f64).unwrap_or_else(
                                || self.token_counter.count_value(&generation.value) as f64,
                            );
                            passing_output_tokens += tokens;
                        } else {
                            let message = outcome.message.unwrap_or_default();
                            warn!(
                                "validation failure for input '{}': {message}",
                                record.input_text()
                            );
                            failures.push(FailureRecord {
                                input: record.input_text().to_string(),
                                expected,
                                actual: generation.value,
                                message,
                            });
                        }
                    }
                    Err(err) => {
                        warn!(
                            "generation failed for input '{}' (transient={}): {err}",
                            record.input_text(),
                            err.is_transient()
                        );
                        let actual = match err.raw_output() {
                            Some(raw) => json!({"error": err.to_string(), "raw_output": raw}),
                            None => json!({"error": err.to_string()}),
                        };
                        failures.push(FailureRecord {
                            input: record.input_text().to_string(),
                            expected: record.expected_value().unwrap_or(Value::Null),
                            actual,
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        let accuracy = if records.is_empty() {
            0.0
        } else {
            passed as f64 / records.len() as f64
        };
        let avg_output_tokens = if passed > 0 {
            passing_output_tokens / passed as f64
        } else {
            0.0
        };
        EvalReport {
            accuracy,
            failures,
            avg_output_tokens,
        }
    }
}
