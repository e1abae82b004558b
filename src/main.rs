//! Optimizer CLI.
//!
//! Wires the pipeline from environment configuration and runs it to
//! completion: load assets, split the dataset, then repair -> compress ->
//! gatekeep. Ctrl-C requests cooperative cancellation; the current best
//! prompt is saved before exit either way.

use tracing::{error, info, warn};

use prompt_refine::{
    load_assessment, load_validation_rules, split_dataset, BatchEvaluator, CancelFlag, ChatClient,
    Orchestrator, OptimizerConfig, PromptRewriteAgent, RewriteStrategy, SemanticValidator,
    TokenCounter,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    if let Err(err) = run().await {
        error!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run() -> prompt_refine::Result<()> {
    info!("--- initializing prompt-refine ---");
    let config = OptimizerConfig::from_env();
    config.validate()?;

    let unordered_paths = load_validation_rules(&config.validation_rules_path);
    info!("loaded {} order-insensitive validation paths", unordered_paths.len());

    let records = load_assessment(&config.assessment_path)?;
    let dataset = split_dataset(&records, config.train_ratio, config.split_seed);
    info!(
        "data loaded: {} training / {} holdout records",
        dataset.train.len(),
        dataset.holdout.len()
    );

    let initial_prompt = std::fs::read_to_string(&config.system_prompt_path)?;
    let token_counter = TokenCounter::with_char_estimator();
    info!(
        "initial prompt size: {} tokens",
        token_counter.count(&initial_prompt)
    );

    let client = ChatClient::new(config.api_base_url.clone(), config.api_key.clone());
    let validator = SemanticValidator::new(unordered_paths);
    let evaluator = BatchEvaluator::new(
        client.clone(),
        validator,
        token_counter.clone(),
        config.model_fast.clone(),
        config.temperature_eval,
    );
    let repair_agent = PromptRewriteAgent::new(client.clone(), RewriteStrategy::repair(&config));
    let compress_agent = PromptRewriteAgent::new(client, RewriteStrategy::compress(&config));

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; draining the active chunk and saving the best prompt");
                cancel.cancel();
            }
        });
    }

    let mut orchestrator = Orchestrator::new(
        config,
        dataset,
        evaluator,
        repair_agent,
        compress_agent,
        token_counter,
        initial_prompt,
    );
    let report = orchestrator.run(&cancel).await;

    match (report.verdict, report.holdout_accuracy) {
        (Some(verdict), Some(accuracy)) => info!(
            "result: {} (holdout accuracy {:.1}%)",
            verdict.as_str(),
            accuracy * 100.0
        ),
        _ => warn!("run interrupted before the gatekeeper phase"),
    }
    Ok(())
}
