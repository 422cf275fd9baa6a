//! `graph` command: emit a Graphviz DOT description of the configuration.

use anyhow::{Context, Result};
use serde_json::Map as JsonMap;
use tracing::info;

use crate::cli::GraphArgs;
use crate::commands::load_experiment;
use crate::pipeline::PipelineContext;

pub async fn run_graph(args: &GraphArgs) -> Result<()> {
    let (blueprint, _subject, finder) = load_experiment(&args.experiment)?;

    let context = PipelineContext::from_blueprint(&blueprint, JsonMap::new(), finder, false)
        .context("failed to build pipeline from configuration")?;

    let graph_name = args
        .experiment
        .experiment
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("experiment")
        .to_string();
    let dot = context.to_dot(&graph_name);

    std::fs::write(&args.graph_file, dot)
        .with_context(|| format!("failed to write {}", args.graph_file.display()))?;
    info!(graph_file = %args.graph_file.display(), "wrote configuration graph");
    println!("Wrote {}; render with: dot -Tpng {}", args.graph_file.display(), args.graph_file.display());
    Ok(())
}
