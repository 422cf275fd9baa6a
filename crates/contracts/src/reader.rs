//! Reader trait - data source abstraction.
//!
//! A reader encapsulates one external source (file, socket, queue) and
//! converts incremental reads into named buffer data. The router polls
//! readers cooperatively; `read_next` must not block beyond its own soft
//! timeout and should return `NoData` when nothing is available yet.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::BufferData;

/// One increment of reader output: result name to new data.
pub type ReaderBatch = BTreeMap<String, BufferData>;

/// Result of one `read_next` poll.
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// New data arrived, keyed by result name.
    Batch(ReaderBatch),
    /// Nothing available this cycle; poll again later.
    NoData,
}

/// Reader failure modes.
///
/// `Retryable` errors are retried with capped backoff; `Permanent` errors
/// (and retry exhaustion) mark the reader exhausted while the run continues
/// with the remaining readers. `EndOfStream` is the orderly end of a source.
#[derive(Debug, Error)]
pub enum ReadError {
    #[error("end of stream")]
    EndOfStream,

    #[error("retryable source error: {0}")]
    Retryable(String),

    #[error("source error: {0}")]
    Permanent(String),
}

impl ReadError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReadError::Retryable(_))
    }
}

/// Pull-based data source.
pub trait Reader: Send {
    /// Connect to the source and acquire resources. Called once before the
    /// first `read_next`.
    fn open(&mut self) -> Result<(), ReadError> {
        Ok(())
    }

    /// Consume one increment of available data.
    fn read_next(&mut self) -> Result<ReadOutcome, ReadError>;

    /// Empty prototype data for each result this reader will produce.
    ///
    /// The router uses these to create buffers of the right variety (and,
    /// for signals, the right frequency and channel ids) before any data
    /// arrives.
    fn initial(&self) -> ReaderBatch;

    /// Release resources. Idempotent.
    fn close(&mut self) {}
}
