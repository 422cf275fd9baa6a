//! # Observability
//!
//! Prometheus metrics export and per-trial metric recording.
//!
//! Tracing subscribers are initialized by the CLI from its own flags; this
//! crate only owns the metrics side so library crates can record through
//! the `metrics` facade without caring whether an exporter is installed.

pub mod metrics;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;

pub use crate::metrics::{record_reader_exhausted, record_trial_metrics};

/// Install a Prometheus exporter listening on `0.0.0.0:port`.
///
/// Call at most once per process; the run works fine without it, counters
/// just go nowhere.
pub fn init_metrics_only(port: u16) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus recorder")?;
    tracing::info!(port, "Prometheus metrics endpoint initialized");
    Ok(())
}
