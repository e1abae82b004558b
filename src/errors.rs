//! Run-fatal error types.
//!
//! Only configuration and load-time problems abort a run. Everything the
//! loop hits per item (transport failures, truncated or non-JSON model
//! output, bad expected values) is folded into failed items by the batch
//! evaluator; see [`crate::generation::GenerationError`] for that taxonomy.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, OptimizerError>;

#[derive(Debug, Error)]
pub enum OptimizerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OptimizerError {
    pub fn config(message: impl Into<String>) -> Self {
        OptimizerError::Config(message.into())
    }

    pub fn data(message: impl Into<String>) -> Self {
        OptimizerError::Data(message.into())
    }
}
