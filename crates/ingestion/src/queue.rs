//! Bounded queue handoff between a background producer and the main loop.
//!
//! Live network sources run their own I/O task and push batches into the
//! queue; the cooperative loop pulls with a soft timeout so a silent source
//! reads as "no new data this cycle" rather than blocking the run.

use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

use contracts::{ReadError, ReadOutcome, Reader, ReaderBatch};

pub const DEFAULT_RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Producer half: hand batches to the pipeline from any thread.
#[derive(Clone)]
pub struct QueueProducer {
    sender: Sender<ReaderBatch>,
}

impl QueueProducer {
    /// Send one batch, blocking when the queue is full (backpressure).
    /// Returns `false` once the reader half is gone.
    pub fn send(&self, batch: ReaderBatch) -> bool {
        self.sender.send(batch).is_ok()
    }
}

/// Reader half: polled by the router like any file reader.
///
/// The stream ends when every producer clone has been dropped.
pub struct QueueReader {
    receiver: Receiver<ReaderBatch>,
    timeout: Duration,
    prototypes: ReaderBatch,
}

/// Create a connected producer/reader pair with the given queue capacity.
///
/// `prototypes` plays the role of `Reader::initial`: empty data of the right
/// varieties so buffers can be created before the first live batch arrives.
pub fn queue_pair(
    capacity: usize,
    prototypes: ReaderBatch,
    timeout: Option<Duration>,
) -> (QueueProducer, QueueReader) {
    let (sender, receiver) = bounded(capacity.max(1));
    (
        QueueProducer { sender },
        QueueReader {
            receiver,
            timeout: timeout.unwrap_or(DEFAULT_RECV_TIMEOUT),
            prototypes,
        },
    )
}

impl Reader for QueueReader {
    fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
        match self.receiver.recv_timeout(self.timeout) {
            Ok(batch) => Ok(ReadOutcome::Batch(batch)),
            Err(RecvTimeoutError::Timeout) => Ok(ReadOutcome::NoData),
            Err(RecvTimeoutError::Disconnected) => Err(ReadError::EndOfStream),
        }
    }

    fn initial(&self) -> ReaderBatch {
        self.prototypes.clone()
    }
}
