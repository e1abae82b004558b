//! Optimizer configuration.
//!
//! All knobs are gathered once at startup into an immutable
//! [`OptimizerConfig`] and passed by reference into the components that
//! need them; no component reads ambient global state after construction.

use std::env;
use std::fs;
use std::path::PathBuf;

use crate::errors::{OptimizerError, Result};

/// Immutable run configuration, built once from the environment.
#[derive(Debug, Clone)]
pub struct OptimizerConfig {
    /// Chat-completions endpoint base, including the version segment
    /// (e.g. `https://api.openai.com/v1`).
    pub api_base_url: String,
    pub api_key: String,

    /// Model used for batch evaluation of candidate prompts.
    pub model_fast: String,
    /// Model used by the rewrite agents.
    pub model_smart: String,

    /// Accuracy weight in the Pareto score.
    pub alpha: f64,
    /// Per-token penalty in the Pareto score.
    pub beta: f64,
    /// Minimum score improvement a compression candidate must exceed.
    pub score_threshold: f64,

    /// Repair iterations tolerated before accepting imperfect accuracy.
    pub repair_patience: u32,
    /// Consecutive rejected compression candidates before the phase ends.
    pub compress_patience: u32,

    pub train_ratio: f64,
    pub split_seed: u64,

    pub temperature_eval: f64,
    pub temperature_repair: f64,
    pub temperature_compress: f64,

    pub assets_dir: PathBuf,
    pub output_dir: PathBuf,
    pub system_prompt_path: PathBuf,
    pub assessment_path: PathBuf,
    pub repair_instruction_path: PathBuf,
    pub compress_instruction_path: PathBuf,
    pub validation_rules_path: PathBuf,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl OptimizerConfig {
    /// Build a config from environment variables, with the same defaults
    /// for every tunable the optimizer has always shipped with.
    pub fn from_env() -> Self {
        let assets_dir = PathBuf::from(env_or("REFINE_ASSETS_DIR", "assets"));
        let output_dir = PathBuf::from(env_or("REFINE_OUTPUT_DIR", "optimized"));
        OptimizerConfig {
            api_base_url: env_or("OPENAI_BASE_URL", "https://api.openai.com/v1"),
            api_key: env::var("OPENAI_API_KEY").unwrap_or_default(),
            model_fast: env_or("REFINE_MODEL_FAST", "gpt-4o-mini"),
            model_smart: env_or("REFINE_MODEL_SMART", "gpt-4o"),
            alpha: env_f64("REFINE_ALPHA", 100.0),
            beta: env_f64("REFINE_BETA", 0.01),
            score_threshold: env_f64("REFINE_SCORE_THRESHOLD", 0.1),
            repair_patience: env_u32("REFINE_REPAIR_PATIENCE", 6),
            compress_patience: env_u32("REFINE_COMPRESS_PATIENCE", 3),
            train_ratio: env_f64("REFINE_TRAIN_RATIO", 0.8),
            split_seed: env_u64("REFINE_SPLIT_SEED", 42),
            temperature_eval: env_f64("REFINE_EVAL_TEMPERATURE", 0.0),
            temperature_repair: env_f64("REFINE_REPAIR_TEMPERATURE", 0.1),
            temperature_compress: env_f64("REFINE_COMPRESS_TEMPERATURE", 0.5),
            system_prompt_path: assets_dir.join("system_prompt.txt"),
            assessment_path: assets_dir.join("assessment.json"),
            repair_instruction_path: assets_dir.join("repair_instructions.txt"),
            compress_instruction_path: assets_dir.join("compress_instructions.txt"),
            validation_rules_path: assets_dir.join("validation_rules.json"),
            assets_dir,
            output_dir,
        }
    }

    /// Reject out-of-range knobs and missing required assets, and make
    /// sure the output directory exists. Runs before the loop starts;
    /// nothing past this point aborts the run.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("REFINE_EVAL_TEMPERATURE", self.temperature_eval),
            ("REFINE_REPAIR_TEMPERATURE", self.temperature_repair),
            ("REFINE_COMPRESS_TEMPERATURE", self.temperature_compress),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(OptimizerError::config(format!(
                    "{name} must be between 0.0 and 1.0, got {value}"
                )));
            }
        }
        if !(0.0 < self.train_ratio && self.train_ratio < 1.0) {
            return Err(OptimizerError::config(format!(
                "REFINE_TRAIN_RATIO must be strictly between 0 and 1, got {}",
                self.train_ratio
            )));
        }
        if self.repair_patience == 0 || self.compress_patience == 0 {
            return Err(OptimizerError::config(
                "patience limits must be at least 1",
            ));
        }
        for (what, path) in [
            ("system prompt", &self.system_prompt_path),
            ("assessment file", &self.assessment_path),
            ("repair instructions", &self.repair_instruction_path),
            ("compression instructions", &self.compress_instruction_path),
        ] {
            if !path.exists() {
                return Err(OptimizerError::config(format!(
                    "{what} not found at {}",
                    path.display()
                )));
            }
        }
        fs::create_dir_all(&self.output_dir)?;
        Ok(())
    }
}
