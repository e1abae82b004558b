//! Prompt rewrite agents.
//!
//! One agent shape, two configurations: a repair strategy that reasons
//! over validation failures, and a compression strategy that shrinks a
//! fully-passing prompt. The meta-instruction is loaded from an external
//! asset on every call so it can be edited between iterations.
//!
//! `rewrite` never fails past its own boundary: any load, transport, or
//! parse problem logs a diagnostic and returns the current prompt
//! unchanged, so a broken agent degrades to a no-op iteration.

use std::fs;
use std::path::PathBuf;

use serde_json::Value;
use tracing::warn;

use crate::config::OptimizerConfig;
use crate::evaluator::FailureRecord;
use crate::generation::ChatClient;

/// Failures beyond this count are collapsed into a truncation marker.
const MAX_FAILURES_IN_SUMMARY: usize = 10;

const REPAIR_USER_TEMPLATE: &str = "\
The current system prompt:
{current_prompt}

A summary of testing failures:
{failures}
";

const COMPRESS_USER_TEMPLATE: &str = "\
The current system prompt (fully passing):
{current_prompt}

INSTRUCTIONS:
Apply your optimization strategies to the prompt above.
Goal: reduce token count without altering behavior.
";

#[derive(Debug, Clone)]
pub struct RewriteStrategy {
    /// Short name used in diagnostics.
    pub name: &'static str,
    pub instruction_path: PathBuf,
    pub user_template: &'static str,
    pub model: String,
    pub temperature: f64,
}

impl RewriteStrategy {
    /// Accuracy-focused strategy fed with failure context.
    pub fn repair(config: &OptimizerConfig) -> Self {
        RewriteStrategy {
            name: "repair",
            instruction_path: config.repair_instruction_path.clone(),
            user_template: REPAIR_USER_TEMPLATE,
            model: config.model_smart.clone(),
            temperature: config.temperature_repair,
        }
    }

    /// Cost-focused strategy with no failure context.
    pub fn compress(config: &OptimizerConfig) -> Self {
        RewriteStrategy {
            name: "compress",
            instruction_path: config.compress_instruction_path.clone(),
            user_template: COMPRESS_USER_TEMPLATE,
            model: config.model_smart.clone(),
            temperature: config.temperature_compress,
        }
    }
}

pub struct PromptRewriteAgent {
    client: ChatClient,
    strategy: RewriteStrategy,
}

impl PromptRewriteAgent {
    pub fn new(client: ChatClient, strategy: RewriteStrategy) -> Self {
        Self { client, strategy }
    }

    /// Produce a rewritten prompt, or the current one unchanged on any
    /// failure. A structured response is re-serialized to canonical
    /// indented text; a scalar string response is used directly.
    pub async fn rewrite(&self, current_prompt: &str, failures: &[FailureRecord]) -> String {
        let instructions = match fs::read_to_string(&self.strategy.instruction_path) {
            Ok(instructions) => instructions,
            Err(err) => {
                warn!(
                    "{} agent: could not load instructions from {}: {err}; keeping current prompt",
                    self.strategy.name,
                    self.strategy.instruction_path.display()
                );
                return current_prompt.to_string();
            }
        };

        let user_message = self
            .strategy
            .user_template
            .replace("{current_prompt}", current_prompt)
            .replace("{failures}", &render_failures(failures));

        match self
            .client
            .generate(
                &instructions,
                &user_message,
                &self.strategy.model,
                self.strategy.temperature,
            )
            .await
        {
            Ok(generation) => match generation.value {
                Value::String(text) => text,
                value => serde_json::to_string_pretty(&value)
                    .unwrap_or_else(|_| current_prompt.to_string()),
            },
            Err(err) => {
                warn!(
                    "{} agent: generation failed ({err}); keeping current prompt",
                    self.strategy.name
                );
                current_prompt.to_string()
            }
        }
    }
}

/// Render failures as newline-joined single-line entries, at most
/// [`MAX_FAILURES_IN_SUMMARY`] of them.
fn render_failures(failures: &[FailureRecord]) -> String {
    let mut lines = Vec::new();
    for (index, failure) in failures.iter().enumerate() {
        if index >= MAX_FAILURES_IN_SUMMARY {
            lines.push("... (more failures truncated) ...".to_string());
            break;
        }
        // Collapse newlines so one failure stays one line.
        let input = failure.input.replace('\n', " ");
        let message = failure.message.replace('\n', " ");
        lines.push(format!(
            "- failure #{}: input='{input}', error='{message}', actual output={}",
            index + 1,
            failure.actual
        ));
    }
    lines.join("\n")
}
