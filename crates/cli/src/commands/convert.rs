//! `convert` command: batch-extract trials as fast as the data allow.

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::ConvertArgs;
use crate::commands::{load_experiment, spawn_shutdown_signal};
use crate::pipeline::{Pipeline, PipelineContext};

pub async fn run_convert(args: &ConvertArgs) -> Result<()> {
    let (blueprint, subject, finder) = load_experiment(&args.experiment)?;

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let context = PipelineContext::from_blueprint(&blueprint, subject, finder, false)
        .context("failed to build pipeline from configuration")?;

    let shutdown = spawn_shutdown_signal();
    let trial_file = args.trial_file.clone();
    info!(trial_file = %trial_file.display(), "starting conversion");

    let stats = Pipeline::new(context, shutdown)
        .run(&trial_file)
        .await
        .context("conversion failed")?;

    stats.print_summary();
    info!("conversion finished");
    Ok(())
}
