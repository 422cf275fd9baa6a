//! Metric recording helpers for the trial pipeline.

use contracts::Trial;
use metrics::{counter, gauge, histogram};

/// Record per-trial metrics at emission time.
pub fn record_trial_metrics(trial: &Trial, trial_number: usize) {
    counter!("trials_emitted_total").increment(1);
    gauge!("trials_emitted").set(trial_number as f64 + 1.0);
    if let Some(duration) = trial.duration() {
        histogram!("trial_duration_seconds").record(duration);
    }
    histogram!("trial_enhancement_count").record(trial.enhancements.len() as f64);
    let data_names = trial.numeric_events.len() + trial.text_events.len() + trial.signals.len();
    histogram!("trial_buffer_count").record(data_names as f64);
}

/// Record one reader becoming exhausted.
pub fn record_reader_exhausted(reader_name: &str) {
    counter!("readers_exhausted_total", "reader" => reader_name.to_string()).increment(1);
}
