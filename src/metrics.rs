//! Fitness scoring and token accounting.

use std::sync::Arc;

use serde_json::Value;

/// Pareto scalarization weights.
///
/// `score = accuracy * alpha - total_tokens * beta`: strictly increasing in
/// accuracy for fixed tokens, strictly decreasing in tokens for fixed
/// accuracy. `total_tokens` for a candidate is its input-prompt token count
/// plus the average output token count over passing items only.
#[derive(Debug, Clone, Copy)]
pub struct FitnessWeights {
    pub alpha: f64,
    pub beta: f64,
}

impl FitnessWeights {
    pub fn new(alpha: f64, beta: f64) -> Self {
        Self { alpha, beta }
    }

    pub fn pareto_score(&self, accuracy: f64, total_tokens: f64) -> f64 {
        accuracy * self.alpha - total_tokens * self.beta
    }
}

/// Pluggable token counter.
///
/// Different models use different tokenizers; the loop only needs the
/// numeric contract. Pass a closure backed by your tokenizer of choice, or
/// use the character-based estimator when precision doesn't matter.
#[derive(Clone)]
pub struct TokenCounter {
    counter: Arc<dyn Fn(&str) -> usize + Send + Sync>,
}

impl TokenCounter {
    pub fn new(counter: Arc<dyn Fn(&str) -> usize + Send + Sync>) -> Self {
        Self { counter }
    }

    /// Character-based estimator (1 token ~= 4 chars).
    pub fn with_char_estimator() -> Self {
        Self::new(Arc::new(|s: &str| (s.len() + 3) / 4))
    }

    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (self.counter)(text)
    }

    /// Count tokens of a value's canonical serialized form.
    pub fn count_value(&self, value: &Value) -> usize {
        self.count(&value.to_string())
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCounter").finish_non_exhaustive()
    }
}
