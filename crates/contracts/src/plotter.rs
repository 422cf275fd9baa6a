//! Plotter trait - gui mode visualization hook.
//!
//! The gui command drives plotters on a wall-clock update period and hands
//! each extracted trial to every plotter in order. Implementations own their
//! windowing details; the pipeline only needs these lifecycle hooks.

use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;

use crate::{ContractError, Trial};

pub trait Plotter: Send {
    /// Plotter name (used for logging).
    fn name(&self) -> &str;

    /// Set up figures or windows before the run starts.
    fn open(
        &mut self,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        Ok(())
    }

    /// Present one newly extracted trial.
    fn plot_next(&mut self, trial: &Trial, trial_number: usize) -> Result<(), ContractError>;

    /// Periodic refresh between trials; return `false` to request shutdown
    /// (for example, the user closed the last window).
    fn update(&mut self) -> Result<bool, ContractError> {
        Ok(true)
    }

    /// Tear down figures or windows.
    fn close(&mut self) {}
}
