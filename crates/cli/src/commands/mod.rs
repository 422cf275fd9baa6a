//! Command implementations.

mod convert;
mod graph;
mod gui;
mod validate;

pub use convert::run_convert;
pub use graph::run_graph;
pub use gui::run_gui;
pub use validate::run_validate;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use config_loader::ConfigLoader;
use contracts::{ExperimentBlueprint, FileFinder};

use crate::cli::ExperimentArgs;

/// Load the experiment document, apply reader overrides, and load the
/// subject document, the same way for every command.
pub(crate) fn load_experiment(
    args: &ExperimentArgs,
) -> Result<(ExperimentBlueprint, JsonMap<String, JsonValue>, FileFinder)> {
    let finder = FileFinder::new(args.search_path.clone());
    let experiment_path = finder.find(&args.experiment);
    info!(config = %experiment_path.display(), "loading experiment configuration");

    let mut blueprint = ConfigLoader::load_from_path(&experiment_path)
        .with_context(|| format!("failed to load config from {}", experiment_path.display()))?;
    ConfigLoader::apply_reader_overrides(&mut blueprint, &args.readers)
        .context("failed to apply --readers overrides")?;

    let subject = match &args.subject {
        Some(path) => {
            let subject_path = finder.find(path);
            ConfigLoader::load_subject(&subject_path).with_context(|| {
                format!("failed to load subject from {}", subject_path.display())
            })?
        }
        None => JsonMap::new(),
    };

    info!(
        readers = blueprint.readers.len(),
        enhancers = blueprint.trials.enhancers.len(),
        collecters = blueprint.trials.collecters.len(),
        "configuration loaded"
    );
    Ok((blueprint, subject, finder))
}

/// Install Ctrl+C / SIGTERM handling that flips a shared shutdown flag.
pub(crate) fn spawn_shutdown_signal() -> Arc<AtomicBool> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = async {
            if tokio::signal::ctrl_c().await.is_err() {
                warn!("failed to install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(_) => std::future::pending::<()>().await,
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        warn!("shutdown signal received");
        flag.store(true, Ordering::Relaxed);
    });
    shutdown
}
