//! # prompt-refine
//!
//! Pareto-guided optimization of an LLM system prompt against a labeled
//! assessment set. The pipeline runs three strictly-forward phases:
//!
//! - **repair**: rewrite the prompt until it passes the training set
//! - **compress**: shrink it while holding accuracy at 100%, ranked by the
//!   Pareto score `accuracy * alpha - tokens * beta`
//! - **gatekeep**: classify the final prompt against an untouched holdout
//!
//! Model responses are checked by a semantic validator (strict key sets,
//! numeric tolerance, configurable order-insensitive array paths) rather
//! than byte equality.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use prompt_refine::{
//!     BatchEvaluator, CancelFlag, ChatClient, Orchestrator, OptimizerConfig,
//!     PromptRewriteAgent, RewriteStrategy, SemanticValidator, TokenCounter,
//! };
//!
//! let config = OptimizerConfig::from_env();
//! config.validate()?;
//! let records = prompt_refine::load_assessment(&config.assessment_path)?;
//! let dataset = prompt_refine::split_dataset(&records, config.train_ratio, config.split_seed);
//! // ... wire the client, evaluator and agents, then:
//! // let report = orchestrator.run(&CancelFlag::new()).await;
//! ```

pub mod agents;
pub mod cancel;
pub mod config;
pub mod dataset;
pub mod errors;
pub mod evaluator;
pub mod generation;
pub mod metrics;
pub mod orchestrator;
pub mod validator;

pub use agents::{PromptRewriteAgent, RewriteStrategy};
pub use cancel::CancelFlag;
pub use config::OptimizerConfig;
pub use dataset::{
    load_assessment, split_dataset, AssessmentRecord, ConversationTurn, Dataset,
};
pub use errors::{OptimizerError, Result};
pub use evaluator::{BatchEvaluator, EvalReport, FailureRecord};
pub use generation::{ChatClient, Generation, GenerationError};
pub use metrics::{FitnessWeights, TokenCounter};
pub use orchestrator::{
    accepts_candidate, GateVerdict, Orchestrator, Phase, PromptCandidate, RunReport,
};
pub use validator::{
    load_validation_rules, parse_lenient, ParseFailure, SemanticValidator, ValidationOutcome,
};
