//! Typed time-ordered buffer with append/query/discard semantics.

use contracts::{BufferData, BufferKind, ContractError, EventValue, NumericEvents, SignalChunk, TextEvents};
use tracing::warn;

/// Slack for merging a signal chunk that continues exactly where the
/// previous one ended.
const CONTIGUITY_EPSILON: f64 = 1e-6;

#[derive(Debug)]
enum Store {
    NumericEvents { events: NumericEvents, arity: Option<usize> },
    TextEvents { events: TextEvents },
    Signal { chunks: Vec<SignalChunk>, sample_frequency: f64, channel_ids: Vec<String> },
}

/// One named, typed, time-ordered container in the Neutral Zone.
///
/// Content evolves monotonically forward in time: appends at the tail,
/// discards at the head, never in the middle. Appends whose data starts
/// earlier than the buffer's end (beyond `tolerance`) are rejected with
/// `OutOfOrder` semantics; the caller decides whether to drop or abort.
#[derive(Debug)]
pub struct Buffer {
    store: Store,
    tolerance: f64,
}

impl Buffer {
    /// Create an empty buffer of the same variety (and, for signals, the
    /// same frequency and channel ids) as the given prototype data.
    pub fn from_prototype(prototype: &BufferData) -> Self {
        let store = match prototype {
            BufferData::NumericEvents(events) => Store::NumericEvents {
                events: NumericEvents::empty(),
                arity: (events.values_per_event() > 0).then(|| events.values_per_event()),
            },
            BufferData::TextEvents(_) => Store::TextEvents { events: TextEvents::empty() },
            BufferData::Signal(chunk) => Store::Signal {
                chunks: Vec::new(),
                sample_frequency: chunk.sample_frequency,
                channel_ids: chunk.channel_ids.clone(),
            },
        };
        Self { store, tolerance: 0.0 }
    }

    /// Accept slightly out-of-order appends within the given slack.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance.max(0.0);
        self
    }

    pub fn kind(&self) -> BufferKind {
        match &self.store {
            Store::NumericEvents { .. } => BufferKind::NumericEvents,
            Store::TextEvents { .. } => BufferKind::TextEvents,
            Store::Signal { .. } => BufferKind::Signal,
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.store {
            Store::NumericEvents { events, .. } => events.event_count() == 0,
            Store::TextEvents { events } => events.event_count() == 0,
            Store::Signal { chunks, .. } => chunks.iter().all(|c| c.sample_count() == 0),
        }
    }

    /// Timestamp of the last item in the buffer, `None` when empty.
    pub fn end_time(&self) -> Option<f64> {
        match &self.store {
            Store::NumericEvents { events, .. } => events.end_time(),
            Store::TextEvents { events } => events.end_time(),
            Store::Signal { chunks, .. } => chunks.last().and_then(|c| c.end_time()),
        }
    }

    pub fn first_time(&self) -> Option<f64> {
        match &self.store {
            Store::NumericEvents { events, .. } => events.first_time(),
            Store::TextEvents { events } => events.first_time(),
            Store::Signal { chunks, .. } => chunks.first().and_then(|c| c.first_time()),
        }
    }

    /// Append new data at the tail.
    ///
    /// Preconditions: variety matches, the data is internally time-ordered,
    /// and its first timestamp is at or after the buffer's current end
    /// (within `tolerance`). Signal chunks must also agree on frequency and
    /// channel ids. Violations return `BufferRejected`; the buffer is left
    /// unchanged.
    pub fn append(&mut self, data: BufferData) -> Result<(), ContractError> {
        if data.is_empty() {
            return Ok(());
        }
        if data.kind() != self.kind() {
            return Err(ContractError::buffer_rejected(
                self.kind().to_string(),
                format!("expected {} data, got {}", self.kind(), data.kind()),
            ));
        }
        self.check_order(&data)?;
        match (&mut self.store, data) {
            (Store::NumericEvents { events, arity }, BufferData::NumericEvents(new)) => {
                let new_arity = new.values_per_event();
                if new.event_data.iter().any(|row| row.len() != new_arity + 1) {
                    return Err(ContractError::buffer_rejected(
                        "numeric_events",
                        "rows have mixed arity",
                    ));
                }
                match arity {
                    Some(expected) if *expected != new_arity => {
                        return Err(ContractError::buffer_rejected(
                            "numeric_events",
                            format!("arity changed from {expected} to {new_arity}"),
                        ));
                    }
                    Some(_) => {}
                    None => *arity = Some(new_arity),
                }
                events.append(new);
            }
            (Store::TextEvents { events }, BufferData::TextEvents(new)) => {
                if new.timestamp_data.len() != new.text_data.len() {
                    return Err(ContractError::buffer_rejected(
                        "text_events",
                        "timestamp and text arrays differ in length",
                    ));
                }
                events.append(new);
            }
            (Store::Signal { chunks, sample_frequency, channel_ids }, BufferData::Signal(new)) => {
                if (new.sample_frequency - *sample_frequency).abs() > f64::EPSILON * sample_frequency.abs() {
                    return Err(ContractError::buffer_rejected(
                        "signal",
                        format!(
                            "sample frequency changed from {} to {}",
                            sample_frequency, new.sample_frequency
                        ),
                    ));
                }
                if !channel_ids.is_empty() && new.channel_ids != *channel_ids {
                    return Err(ContractError::buffer_rejected(
                        "signal",
                        "channel ids changed between chunks",
                    ));
                }
                if channel_ids.is_empty() {
                    *channel_ids = new.channel_ids.clone();
                }
                // Merge a chunk that continues exactly where the last ended,
                // so steady sources keep one growing chunk.
                let step = 1.0 / *sample_frequency;
                match chunks.last_mut() {
                    Some(last)
                        if last.end_time().is_some_and(|end| {
                            (new.first_sample_time - (end + step)).abs() < CONTIGUITY_EPSILON * step
                        }) =>
                    {
                        last.append(new);
                    }
                    _ => chunks.push(new),
                }
            }
            _ => unreachable!("kind checked above"),
        }
        Ok(())
    }

    fn check_order(&self, data: &BufferData) -> Result<(), ContractError> {
        if let Some(end) = self.end_time() {
            let first = data.first_time().unwrap_or(f64::INFINITY);
            if first < end - self.tolerance {
                return Err(ContractError::buffer_rejected(
                    self.kind().to_string(),
                    format!("data at {first} arrived after buffer end {end}"),
                ));
            }
        }
        let times = match data {
            BufferData::NumericEvents(events) => events.times(),
            BufferData::TextEvents(events) => events.timestamp_data.clone(),
            BufferData::Signal(_) => return Ok(()),
        };
        if times.windows(2).any(|pair| pair[1] < pair[0] - self.tolerance) {
            return Err(ContractError::buffer_rejected(
                self.kind().to_string(),
                "timestamps are not monotonic within one batch",
            ));
        }
        Ok(())
    }

    /// Return an independent copy of data in `[start, end)`.
    ///
    /// Signal queries round inward to whole samples; when the window spans
    /// more than one stored chunk the copies are concatenated into a single
    /// chunk (gaps between chunks collapse, with a warning).
    pub fn query(&self, start: Option<f64>, end: Option<f64>) -> BufferData {
        match &self.store {
            Store::NumericEvents { events, .. } => {
                BufferData::NumericEvents(events.copy_time_range(start, end))
            }
            Store::TextEvents { events } => {
                BufferData::TextEvents(events.copy_time_range(start, end))
            }
            Store::Signal { chunks, sample_frequency, channel_ids } => {
                let mut pieces: Vec<SignalChunk> = chunks
                    .iter()
                    .map(|chunk| chunk.copy_time_range(start, end))
                    .filter(|piece| piece.sample_count() > 0)
                    .collect();
                let mut merged = match pieces.first() {
                    Some(first) => SignalChunk::empty(
                        *sample_frequency,
                        first.first_sample_time,
                        channel_ids.clone(),
                    ),
                    None => SignalChunk::empty(
                        *sample_frequency,
                        start.unwrap_or(0.0),
                        channel_ids.clone(),
                    ),
                };
                if pieces.len() > 1 {
                    warn!(
                        chunks = pieces.len(),
                        "signal query spans discontiguous chunks, concatenating"
                    );
                }
                for piece in pieces.drain(..) {
                    merged.append(piece);
                }
                BufferData::Signal(merged)
            }
        }
    }

    /// Drop data strictly earlier than `start`.
    pub fn discard_before(&mut self, start: f64) {
        match &mut self.store {
            Store::NumericEvents { events, .. } => events.discard_before(start),
            Store::TextEvents { events } => events.discard_before(start),
            Store::Signal { chunks, .. } => {
                chunks.retain(|chunk| chunk.end_time().is_some_and(|end| end >= start));
                if let Some(first) = chunks.first_mut() {
                    first.discard_before(start);
                }
            }
        }
    }

    /// Times of stored events/samples matching `value` within `[start, end)`.
    pub fn times_of(
        &self,
        value: &EventValue,
        value_index: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<f64> {
        match (&self.store, value) {
            (Store::NumericEvents { events, .. }, EventValue::Number(v)) => {
                events.times_of(*v, value_index, start, end)
            }
            (Store::TextEvents { events }, EventValue::Text(v)) => events.times_of(v, start, end),
            (Store::Signal { chunks, .. }, EventValue::Number(v)) => chunks
                .iter()
                .flat_map(|chunk| chunk.times_of(*v, value_index, start, end))
                .collect(),
            _ => Vec::new(),
        }
    }
}
