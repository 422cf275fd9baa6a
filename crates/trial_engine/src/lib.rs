//! # Trial Engine
//!
//! Partition time into trials and populate them from the Neutral Zone.
//!
//! - `SyncRegistry` collects sync events per reader and estimates per-reader
//!   clock offsets against the reference reader.
//! - `TrialDelimiter` watches a start buffer and emits `(start, end)`
//!   windows as delimiting events arrive.
//! - `TrialExtractor` snapshots buffer slices into each window, aligns them
//!   to the per-trial WRT time, and runs the enhancer pipeline.
//! - Collecters revisit the whole trial sequence after the run and may
//!   revise enhancements.

mod collecters;
mod delimiter;
mod enhancers;
mod extractor;
mod registry;
mod sync;

pub use collecters::{Collecter, SessionPercentageCollecter, SignalNormalizer};
pub use delimiter::TrialDelimiter;
pub use enhancers::{
    Enhancer, EventTimesEnhancer, ExpressionEnhancer, PairedCodesEnhancer, SignalSmoother,
    TrialDurationEnhancer,
};
pub use extractor::{ConfiguredCollecter, ConfiguredEnhancer, TrialExtractor};
pub use registry::{CollecterRegistry, EnhancerRegistry};
pub use sync::SyncRegistry;
