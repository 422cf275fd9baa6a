//! Wall-clock pacing wrapper, so offline files play back sort of like live
//! sources in gui mode.

use std::time::{Duration, Instant};

use contracts::{ReadError, ReadOutcome, Reader, ReaderBatch};

/// Delay each increment until the wall clock catches up with its data time.
///
/// Data time zero is pinned to the wall-clock instant of `open`, so a file
/// whose latest timestamp is `t` becomes visible `t` seconds into the run.
pub struct DelaySimulatorReader {
    inner: Box<dyn Reader>,
    start: Option<Instant>,
    stashed: Option<ReaderBatch>,
    stash_until: Option<Instant>,
}

impl DelaySimulatorReader {
    pub fn new(inner: Box<dyn Reader>) -> Self {
        Self { inner, start: None, stashed: None, stash_until: None }
    }
}

impl Reader for DelaySimulatorReader {
    fn open(&mut self) -> Result<(), ReadError> {
        self.start = Some(Instant::now());
        self.inner.open()
    }

    fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
        if let Some(until) = self.stash_until {
            if Instant::now() >= until {
                self.stash_until = None;
                let batch = self.stashed.take().unwrap_or_default();
                return Ok(ReadOutcome::Batch(batch));
            }
            return Ok(ReadOutcome::NoData);
        }

        match self.inner.read_next()? {
            ReadOutcome::Batch(batch) => {
                let latest = batch
                    .values()
                    .filter_map(|data| data.end_time())
                    .fold(0.0_f64, f64::max)
                    .max(0.0);
                let start = self.start.unwrap_or_else(Instant::now);
                self.stash_until = Some(start + Duration::from_secs_f64(latest));
                self.stashed = Some(batch);
                Ok(ReadOutcome::NoData)
            }
            ReadOutcome::NoData => Ok(ReadOutcome::NoData),
        }
    }

    fn initial(&self) -> ReaderBatch {
        self.inner.initial()
    }

    fn close(&mut self) {
        self.inner.close();
    }
}
