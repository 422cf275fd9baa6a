//! # Ingestion
//!
//! Reader implementations and the per-reader routing loop.
//!
//! A `ReaderRouter` polls one reader cooperatively, deals each incremental
//! result into its primary buffer, pushes independent copies through derived
//! transformer pipelines, observes sync events, and tracks the reader's time
//! watermark so the extractor knows when a trial window is complete.

mod csv_readers;
mod delay;
mod queue;
mod registry;
mod router;

pub use csv_readers::{CsvNumericEventReader, CsvSignalReader, CsvTextEventReader};
pub use delay::DelaySimulatorReader;
pub use queue::{queue_pair, QueueProducer, QueueReader};
pub use registry::{ReaderRegistry, TransformerRegistry};
pub use router::{ReaderRoute, ReaderRouter, RouterCounts};
