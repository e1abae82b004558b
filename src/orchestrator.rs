//! The optimization control loop.
//!
//! A three-phase state machine over a single mutable best prompt:
//!
//! 1. **Repair** — evaluate on the training set and ask the repair agent
//!    for a rewrite until accuracy reaches 1.0 or patience runs out. The
//!    rewrite replaces the best prompt unconditionally, even when it turns
//!    out worse; there is deliberately no rollback in this phase.
//! 2. **Compress** — ask the compression agent for candidates and accept
//!    one only when it keeps accuracy at 1.0 *and* improves the Pareto
//!    score by strictly more than the configured threshold. Rejected
//!    candidates are discarded; the phase ends after a run of consecutive
//!    rejections.
//! 3. **Gatekeep** — score the final prompt on the holdout set, which no
//!    earlier phase has touched, and classify the result.
//!
//! Transitions are strictly forward. A cancellation flag is honored
//! between chunks and phases, and the current best prompt is persisted
//! before the loop returns, interrupted or not.

use std::fs;

use tracing::{error, info, warn};

use crate::agents::PromptRewriteAgent;
use crate::cancel::CancelFlag;
use crate::config::OptimizerConfig;
use crate::dataset::Dataset;
use crate::evaluator::BatchEvaluator;
use crate::metrics::{FitnessWeights, TokenCounter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Repair,
    Compress,
    Gatekeep,
    Done,
}

/// Holdout classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateVerdict {
    Pass,
    PassWithWarnings,
    Fail,
}

impl GateVerdict {
    pub fn from_accuracy(accuracy: f64) -> Self {
        if accuracy >= 1.0 {
            GateVerdict::Pass
        } else if accuracy >= 0.95 {
            GateVerdict::PassWithWarnings
        } else {
            GateVerdict::Fail
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GateVerdict::Pass => "PASS",
            GateVerdict::PassWithWarnings => "PASS (with warnings)",
            GateVerdict::Fail => "FAIL",
        }
    }
}

/// The single "current best" prompt and its derived measurements.
#[derive(Debug, Clone)]
pub struct PromptCandidate {
    pub text: String,
    pub input_tokens: usize,
    pub accuracy: f64,
    pub avg_output_tokens: f64,
    pub score: f64,
}

impl PromptCandidate {
    fn seed(text: String, token_counter: &TokenCounter) -> Self {
        let input_tokens = token_counter.count(&text);
        PromptCandidate {
            text,
            input_tokens,
            accuracy: 0.0,
            avg_output_tokens: 0.0,
            score: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    /// Holdout classification; absent when the run was interrupted before
    /// the gatekeeper phase.
    pub verdict: Option<GateVerdict>,
    pub holdout_accuracy: Option<f64>,
    pub best: PromptCandidate,
    pub interrupted: bool,
}

/// Compression acceptance gate: accuracy must be exactly 1.0 and the score
/// improvement strictly greater than the threshold.
pub fn accepts_candidate(accuracy: f64, score_diff: f64, threshold: f64) -> bool {
    accuracy >= 1.0 && score_diff > threshold
}

pub struct Orchestrator {
    config: OptimizerConfig,
    dataset: Dataset,
    evaluator: BatchEvaluator,
    repair_agent: PromptRewriteAgent,
    compress_agent: PromptRewriteAgent,
    token_counter: TokenCounter,
    weights: FitnessWeights,
    best: PromptCandidate,
    phase: Phase,
    snapshot_seq: u32,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OptimizerConfig,
        dataset: Dataset,
        evaluator: BatchEvaluator,
        repair_agent: PromptRewriteAgent,
        compress_agent: PromptRewriteAgent,
        token_counter: TokenCounter,
        initial_prompt: String,
    ) -> Self {
        let weights = FitnessWeights::new(config.alpha, config.beta);
        let best = PromptCandidate::seed(initial_prompt, &token_counter);
        Self {
            config,
            dataset,
            evaluator,
            repair_agent,
            compress_agent,
            token_counter,
            weights,
            best,
            phase: Phase::Repair,
            snapshot_seq: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn best(&self) -> &PromptCandidate {
        &self.best
    }

    /// Drive all three phases and persist a final snapshot. Always
    /// completes (bounded by the patience limits) and always leaves a
    /// snapshot behind, even under interruption.
    pub async fn run(&mut self, cancel: &CancelFlag) -> RunReport {
        self.phase_repair(cancel).await;

        if !cancel.is_cancelled() {
            self.phase = Phase::Compress;
            self.phase_compress(cancel).await;
        }

        let mut verdict = None;
        let mut holdout_accuracy = None;
        if !cancel.is_cancelled() {
            self.phase = Phase::Gatekeep;
            let (gate, accuracy) = self.phase_gatekeep(cancel).await;
            verdict = Some(gate);
            holdout_accuracy = Some(accuracy);
        }

        self.phase = Phase::Done;
        if cancel.is_cancelled() {
            warn!("run interrupted; saving current best prompt before exit");
        }
        self.save_snapshot();

        RunReport {
            verdict,
            holdout_accuracy,
            best: self.best.clone(),
            interrupted: cancel.is_cancelled(),
        }
    }

    async fn phase_repair(&mut self, cancel: &CancelFlag) {
        info!(
            "=== phase 1: repair loop ({} training records) ===",
            self.dataset.train.len()
        );
        let mut iteration = 0u32;
        while !cancel.is_cancelled() {
            iteration += 1;
            let report = self
                .evaluator
                .evaluate(&self.best.text, &self.dataset.train, cancel)
                .await;
            self.best.accuracy = report.accuracy;
            self.best.avg_output_tokens = report.avg_output_tokens;
            info!(
                "phase 1 iteration {iteration}: accuracy {:.1}% ({} failures)",
                report.accuracy * 100.0,
                report.failures.len()
            );

            if report.accuracy >= 1.0 {
                info!("phase 1 complete: full accuracy reached");
                break;
            }
            if iteration > self.config.repair_patience {
                warn!("repair patience exhausted; continuing with imperfect accuracy");
                break;
            }
            if cancel.is_cancelled() {
                break;
            }

            info!("requesting repairs from the rewrite agent");
            self.best.text = self.repair_agent.rewrite(&self.best.text, &report.failures).await;
        }
    }

    async fn phase_compress(&mut self, cancel: &CancelFlag) {
        self.best.input_tokens = self.token_counter.count(&self.best.text);
        let baseline_total = self.best.input_tokens as f64 + self.best.avg_output_tokens;
        self.best.score = self.weights.pareto_score(self.best.accuracy, baseline_total);
        info!(
            "=== phase 2: compression loop (baseline {:.1} tokens, score {:.4}) ===",
            baseline_total, self.best.score
        );

        let mut rejections = 0u32;
        while rejections < self.config.compress_patience {
            if cancel.is_cancelled() {
                return;
            }

            let candidate_text = self.compress_agent.rewrite(&self.best.text, &[]).await;
            let candidate_input_tokens = self.token_counter.count(&candidate_text);
            let report = self
                .evaluator
                .evaluate(&candidate_text, &self.dataset.train, cancel)
                .await;
            let candidate_total = candidate_input_tokens as f64 + report.avg_output_tokens;
            let candidate_score = self.weights.pareto_score(report.accuracy, candidate_total);
            let score_diff = candidate_score - self.best.score;

            if accepts_candidate(report.accuracy, score_diff, self.config.score_threshold) {
                info!(
                    "pareto improvement: score {:.4} -> {:.4} (+{score_diff:.4})",
                    self.best.score, candidate_score
                );
                self.best = PromptCandidate {
                    text: candidate_text,
                    input_tokens: candidate_input_tokens,
                    accuracy: report.accuracy,
                    avg_output_tokens: report.avg_output_tokens,
                    score: candidate_score,
                };
                rejections = 0;
                self.save_snapshot();
            } else {
                if report.accuracy < 1.0 {
                    warn!(
                        "candidate rejected: accuracy dropped to {:.1}% (must stay 100%)",
                        report.accuracy * 100.0
                    );
                } else {
                    warn!(
                        "candidate rejected: score diff {score_diff:.4} <= threshold {}",
                        self.config.score_threshold
                    );
                }
                rejections += 1;
            }
        }
    }

    async fn phase_gatekeep(&mut self, cancel: &CancelFlag) -> (GateVerdict, f64) {
        info!(
            "=== phase 3: gatekeeper ({} holdout records) ===",
            self.dataset.holdout.len()
        );
        let report = self
            .evaluator
            .evaluate(&self.best.text, &self.dataset.holdout, cancel)
            .await;
        let verdict = GateVerdict::from_accuracy(report.accuracy);
        match verdict {
            GateVerdict::Pass => info!("holdout accuracy {:.1}%: PASS", report.accuracy * 100.0),
            GateVerdict::PassWithWarnings => warn!(
                "holdout accuracy {:.1}%: PASS with minor generalization errors",
                report.accuracy * 100.0
            ),
            GateVerdict::Fail => warn!(
                "holdout accuracy {:.1}%: FAIL, overfitting detected",
                report.accuracy * 100.0
            ),
        }
        (verdict, report.accuracy)
    }

    /// Persist the current best prompt under a unique timestamped name.
    /// Write failures are logged, never fatal.
    fn save_snapshot(&mut self) {
        self.snapshot_seq += 1;
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let filename = format!(
            "system_prompt_optimized_{timestamp}_{:03}.txt",
            self.snapshot_seq
        );
        let path = self.config.output_dir.join(filename);
        match fs::write(&path, &self.best.text) {
            Ok(()) => info!(
                "saved best prompt to {} ({} tokens)",
                path.display(),
                self.token_counter.count(&self.best.text)
            ),
            Err(err) => error!("failed to save snapshot to {}: {err}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_requires_full_accuracy() {
        // A near-perfect candidate is rejected no matter the improvement.
        assert!(!accepts_candidate(0.99, 50.0, 0.1));
        assert!(accepts_candidate(1.0, 0.2, 0.1));
    }

    #[test]
    fn test_gate_requires_strict_improvement() {
        // Exactly the threshold is not enough.
        assert!(!accepts_candidate(1.0, 0.1, 0.1));
        assert!(!accepts_candidate(1.0, 0.0999, 0.1));
        assert!(accepts_candidate(1.0, 0.1001, 0.1));
    }

    #[test]
    fn test_verdict_bands() {
        assert_eq!(GateVerdict::from_accuracy(1.0), GateVerdict::Pass);
        assert_eq!(
            GateVerdict::from_accuracy(0.97),
            GateVerdict::PassWithWarnings
        );
        assert_eq!(GateVerdict::from_accuracy(0.95), GateVerdict::PassWithWarnings);
        assert_eq!(GateVerdict::from_accuracy(0.80), GateVerdict::Fail);
    }
}
