//! `gui` command: interactive run with plotters and wall-clock pacing.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;

use crate::cli::GuiArgs;
use crate::commands::{load_experiment, spawn_shutdown_signal};
use crate::pipeline::{Pipeline, PipelineContext};
use crate::plotters::build_plotters;

pub async fn run_gui(args: &GuiArgs) -> Result<()> {
    let (blueprint, subject, finder) = load_experiment(&args.experiment)?;

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }
    if let Some(positions) = &args.plot_positions {
        info!(path = %positions.display(), "plot positions file configured");
    }

    let plotters = build_plotters(&blueprint.plotters, &blueprint.experiment)
        .context("failed to build plotters")?;

    // Readers marked simulate_delay pace their data against the wall clock
    // in this mode, so plots track the session as it "replays".
    let context = PipelineContext::from_blueprint(&blueprint, subject, finder, true)
        .context("failed to build pipeline from configuration")?;

    let shutdown = spawn_shutdown_signal();
    let trial_file = args.trial_file.clone();
    info!(trial_file = %trial_file.display(), "starting interactive run");

    let stats = Pipeline::new(context, shutdown)
        .with_plotters(plotters, Duration::from_secs_f64(args.plot_update_period.max(0.001)))
        .run(&trial_file)
        .await
        .context("interactive run failed")?;

    stats.print_summary();
    info!("interactive run finished");
    Ok(())
}
