//! Trial extractor: populate windows with WRT-aligned buffer slices and run
//! the enhancer pipeline.

use std::collections::BTreeMap;

use metrics::counter;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use tracing::{error, instrument};

use contracts::expression::CompiledExpression;
use contracts::{EventValue, Trial};
use neutral_zone::NeutralZone;

use crate::{Collecter, Enhancer};

/// An enhancer with its display name and optional `when` gate.
pub struct ConfiguredEnhancer {
    pub name: String,
    pub enhancer: Box<dyn Enhancer>,
    pub when: Option<CompiledExpression>,
}

/// A collecter with its display name and optional `when` gate.
pub struct ConfiguredCollecter {
    pub name: String,
    pub collecter: Box<dyn Collecter>,
    pub when: Option<CompiledExpression>,
}

/// Populate trials with WRT-aligned data from named buffers.
///
/// The extractor reads every named buffer except the start buffer (the
/// delimiter owns that) and the WRT buffer itself. Per-buffer clock offsets
/// are resolved by the caller once per trial and applied during the copy;
/// live buffers are never modified.
pub struct TrialExtractor {
    wrt_buffer: String,
    wrt_value: EventValue,
    wrt_value_index: usize,
    buffer_names: Vec<String>,
    enhancers: Vec<ConfiguredEnhancer>,
    collecters: Vec<ConfiguredCollecter>,
    enhancer_failures: u64,
}

impl TrialExtractor {
    pub fn new(
        wrt_buffer: impl Into<String>,
        wrt_value: EventValue,
        wrt_value_index: usize,
        buffer_names: Vec<String>,
        enhancers: Vec<ConfiguredEnhancer>,
        collecters: Vec<ConfiguredCollecter>,
    ) -> Self {
        Self {
            wrt_buffer: wrt_buffer.into(),
            wrt_value,
            wrt_value_index,
            buffer_names,
            enhancers,
            collecters,
            enhancer_failures: 0,
        }
    }

    pub fn wrt_buffer(&self) -> &str {
        &self.wrt_buffer
    }

    pub fn buffer_names(&self) -> &[String] {
        &self.buffer_names
    }

    pub fn has_collecters(&self) -> bool {
        !self.collecters.is_empty()
    }

    pub fn enhancer_failures(&self) -> u64 {
        self.enhancer_failures
    }

    /// Fill in the given trial with data from configured buffers, in the
    /// trial's time range. `offsets` maps buffer names to the clock offset
    /// of their owning reader at this trial's start.
    #[instrument(name = "extractor_populate_trial", skip_all, fields(trial_number = trial_number))]
    pub fn populate_trial(
        &mut self,
        trial: &mut Trial,
        trial_number: usize,
        zone: &NeutralZone,
        offsets: &BTreeMap<String, f64>,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) {
        let offset_for = |name: &str| offsets.get(name).copied().unwrap_or(0.0);

        // Resolve the WRT time in the WRT buffer's own clock, then convert.
        let wrt_offset = offset_for(&self.wrt_buffer);
        trial.wrt_time = match zone.get(&self.wrt_buffer) {
            Some(buffer) => {
                let raw_start = trial.start_time - wrt_offset;
                let raw_end = trial.end_time.map(|end| end - wrt_offset);
                buffer
                    .times_of(&self.wrt_value, self.wrt_value_index, Some(raw_start), raw_end)
                    .into_iter()
                    .fold(None::<f64>, |min, t| Some(min.map_or(t, |m| m.min(t))))
                    .map(|raw| raw + wrt_offset)
                    .unwrap_or(0.0)
            }
            None => 0.0,
        };

        // Snapshot each buffer in its own clock, shifting by offset minus
        // WRT in a single pass.
        for name in &self.buffer_names {
            let Some(buffer) = zone.get(name) else {
                continue;
            };
            let offset = offset_for(name);
            let raw_start = trial.start_time - offset;
            let raw_end = trial.end_time.map(|end| end - offset);
            let mut data = buffer.query(Some(raw_start), raw_end);
            data.shift_times(offset - trial.wrt_time);
            trial.add_buffer_data(name.clone(), data);
        }

        self.apply_enhancers(trial, trial_number, experiment, subject);
        counter!("trials_extracted_total").increment(1);
    }

    fn apply_enhancers(
        &mut self,
        trial: &mut Trial,
        trial_number: usize,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) {
        for configured in &mut self.enhancers {
            if let Some(when) = &configured.when {
                if !when.is_true(&*trial) {
                    continue;
                }
            }
            if let Err(e) = configured.enhancer.enhance(trial, trial_number, experiment, subject)
            {
                error!(
                    enhancer = %configured.name,
                    trial_number,
                    error = %e,
                    "enhancer failed, continuing with partial enhancements"
                );
                counter!("enhancer_failures_total", "enhancer" => configured.name.clone())
                    .increment(1);
                self.enhancer_failures += 1;
            }
        }
    }

    /// Collecter pass one: let each collecter see every emitted trial.
    pub fn collect_trials(
        &mut self,
        trials: &[(usize, Trial)],
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) {
        for (trial_number, trial) in trials {
            for configured in &mut self.collecters {
                if let Some(when) = &configured.when {
                    if !when.is_true(trial) {
                        continue;
                    }
                }
                if let Err(e) =
                    configured.collecter.collect(trial, *trial_number, experiment, subject)
                {
                    error!(
                        collecter = %configured.name,
                        trial_number,
                        error = %e,
                        "collecter failed during collect pass"
                    );
                    self.enhancer_failures += 1;
                }
            }
        }
    }

    /// Collecter pass two: let each collecter revise one trial's
    /// enhancements. Returns true when any collecter ran.
    pub fn revise_trial(
        &mut self,
        trial: &mut Trial,
        trial_number: usize,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) -> bool {
        let mut revised = false;
        for configured in &mut self.collecters {
            if let Some(when) = &configured.when {
                if !when.is_true(&*trial) {
                    continue;
                }
            }
            match configured.collecter.enhance(trial, trial_number, experiment, subject) {
                Ok(()) => revised = true,
                Err(e) => {
                    error!(
                        collecter = %configured.name,
                        trial_number,
                        error = %e,
                        "collecter failed during revise pass"
                    );
                    self.enhancer_failures += 1;
                }
            }
        }
        revised
    }

    /// Let the WRT and named buffers release data from before the given
    /// reference time, each converted to its own clock.
    pub fn discard_before(
        &self,
        zone: &mut NeutralZone,
        reference_time: f64,
        offsets: &BTreeMap<String, f64>,
    ) {
        let offset_for = |name: &str| offsets.get(name).copied().unwrap_or(0.0);
        if let Some(buffer) = zone.get_mut(&self.wrt_buffer) {
            buffer.discard_before(reference_time - offset_for(&self.wrt_buffer));
        }
        for name in &self.buffer_names {
            if let Some(buffer) = zone.get_mut(name) {
                buffer.discard_before(reference_time - offset_for(name));
            }
        }
    }
}
