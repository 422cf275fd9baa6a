//! Plotter registry and the built-in summary plotter.
//!
//! Real figure windows come from external plotter implementations
//! registered by name; the pipeline only drives the `Plotter` lifecycle.

use std::collections::BTreeMap;

use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tracing::info;

use contracts::{parse_component_args, ComponentConfig, ContractError, Plotter, Trial};

/// Logs a one-line summary of each extracted trial.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SummaryPlotter {}

impl Plotter for SummaryPlotter {
    fn name(&self) -> &str {
        "summary_plotter"
    }

    fn plot_next(&mut self, trial: &Trial, trial_number: usize) -> Result<(), ContractError> {
        info!(
            trial_number,
            start_time = trial.start_time,
            end_time = ?trial.end_time,
            wrt_time = trial.wrt_time,
            numeric_buffers = trial.numeric_events.len(),
            text_buffers = trial.text_events.len(),
            signals = trial.signals.len(),
            enhancements = trial.enhancements.len(),
            "trial extracted"
        );
        Ok(())
    }
}

type PlotterFactory =
    Box<dyn Fn(&JsonValue) -> Result<Box<dyn Plotter>, ContractError> + Send + Sync>;

/// Name-to-factory table for plotters.
pub struct PlotterRegistry {
    factories: BTreeMap<String, PlotterFactory>,
}

impl PlotterRegistry {
    pub fn with_defaults() -> Self {
        let mut registry = Self { factories: BTreeMap::new() };
        registry.register("SummaryPlotter", |args| {
            let plotter: SummaryPlotter = parse_component_args("SummaryPlotter", args)?;
            Ok(Box::new(plotter))
        });
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn(&JsonValue) -> Result<Box<dyn Plotter>, ContractError> + Send + Sync + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn create(&self, class: &str, args: &JsonValue) -> Result<Box<dyn Plotter>, ContractError> {
        let class_name = class.rsplit('.').next().unwrap_or(class);
        match self.factories.get(class_name) {
            Some(factory) => factory(args),
            None => Err(ContractError::unknown_component("plotter", class)),
        }
    }
}

/// Build every configured plotter, or fall back to the summary plotter so
/// gui mode always shows something.
pub fn build_plotters(
    configs: &[ComponentConfig],
    _experiment: &JsonMap<String, JsonValue>,
) -> Result<Vec<Box<dyn Plotter>>, ContractError> {
    let registry = PlotterRegistry::with_defaults();
    if configs.is_empty() {
        return Ok(vec![Box::new(SummaryPlotter::default())]);
    }
    configs
        .iter()
        .map(|config| registry.create(&config.class, &config.args))
        .collect()
}
