//! TrialSink trait - durable trial output interface.

use crate::{ContractError, Trial};

/// Trial record output.
///
/// Sinks are append-only during the run; collecters may later revise a
/// trial's enhancements, which arrives as a `rewrite` for the same trial
/// number. Writes should leave a well-formed file behind after every call so
/// a crashed run stays readable up to the last complete trial.
#[trait_variant::make(TrialSink: Send)]
pub trait LocalTrialSink {
    /// Sink name (used for logging/metrics).
    fn name(&self) -> &str;

    /// Append one trial record.
    async fn append(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError>;

    /// Replace a previously appended trial record.
    ///
    /// Only `enhancements` and `enhancement_categories` (and trial-local
    /// signal copies) may differ from the appended record.
    async fn rewrite(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError>;

    /// Flush buffered writes, applying any pending rewrites.
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close the sink.
    async fn close(&mut self) -> Result<(), ContractError>;
}
