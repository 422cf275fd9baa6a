//! Collecters: gather data across all trials, then revise each trial.
//!
//! Collecters run after the driver signals end of run. Each sees the full
//! sequence of already-emitted trials in order (`collect`), then revisits
//! each trial in order (`enhance`). Revisions are limited to enhancements,
//! enhancement categories, and the trial's own signal copies; timing and raw
//! event data never change. The whole session's stats must fit in memory.

use serde::Deserialize;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;

use contracts::{json_f64, parse_component_args, ContractError, Trial};

pub trait Collecter: Send {
    /// See one trial during the first, in-order pass over the session.
    fn collect(
        &mut self,
        trial: &Trial,
        trial_number: usize,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError>;

    /// Revise one trial during the second, in-order pass.
    fn enhance(
        &mut self,
        trial: &mut Trial,
        trial_number: usize,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError>;
}

/// Computes each trial's start time as a percentage of the whole session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SessionPercentageCollecter {
    #[serde(skip)]
    max_start_time: f64,
}

impl SessionPercentageCollecter {
    pub fn from_args(args: &JsonValue) -> Result<Self, ContractError> {
        parse_component_args("SessionPercentageCollecter", args)
    }
}

impl Collecter for SessionPercentageCollecter {
    fn collect(
        &mut self,
        trial: &Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        self.max_start_time = self.max_start_time.max(trial.start_time);
        Ok(())
    }

    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let percent = if self.max_start_time > 0.0 {
            100.0 * trial.start_time / self.max_start_time
        } else {
            0.0
        };
        trial.add_enhancement("percent_complete", json_f64(percent), "value");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalNormalizerArgs {
    buffer_name: String,
    #[serde(default)]
    channel_id: Option<String>,
}

/// Rescales a named signal by the global absolute maximum across trials, so
/// the whole session lands in `[-1, 1]` with one common factor.
pub struct SignalNormalizer {
    buffer_name: String,
    channel_id: Option<String>,
    global_max: f64,
}

impl SignalNormalizer {
    pub fn from_args(args: &JsonValue) -> Result<Self, ContractError> {
        let args: SignalNormalizerArgs = parse_component_args("SignalNormalizer", args)?;
        Ok(Self { buffer_name: args.buffer_name, channel_id: args.channel_id, global_max: 0.0 })
    }

    fn channel_of(&self, trial: &Trial) -> Option<usize> {
        let signal = trial.signals.get(&self.buffer_name)?;
        match &self.channel_id {
            Some(id) => signal.channel_index(id),
            None => None,
        }
    }
}

impl Collecter for SignalNormalizer {
    fn collect(
        &mut self,
        trial: &Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let Some(signal) = trial.signals.get(&self.buffer_name) else {
            return Ok(());
        };
        let channel = self.channel_of(trial);
        for row in &signal.sample_data {
            match channel {
                Some(c) => {
                    if let Some(v) = row.get(c) {
                        self.global_max = self.global_max.max(v.abs());
                    }
                }
                None => {
                    for v in row {
                        self.global_max = self.global_max.max(v.abs());
                    }
                }
            }
        }
        Ok(())
    }

    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        if self.global_max <= 0.0 {
            return Ok(());
        }
        let channel = self.channel_of(trial);
        let scale = 1.0 / self.global_max;
        let Some(signal) = trial.signals.get_mut(&self.buffer_name) else {
            return Ok(());
        };
        for row in &mut signal.sample_data {
            match channel {
                Some(c) => {
                    if let Some(v) = row.get_mut(c) {
                        *v *= scale;
                    }
                }
                None => {
                    for v in row.iter_mut() {
                        *v *= scale;
                    }
                }
            }
        }
        trial.add_enhancement("signal_scale", json_f64(scale), "value");
        Ok(())
    }
}
