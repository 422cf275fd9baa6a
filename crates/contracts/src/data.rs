//! Buffer data types - Reader output, Neutral Zone content, Trial content.
//!
//! Three varieties flow from readers through buffers into trials: numeric
//! event lists, text event lists, and signal chunks. All three share the same
//! half-open `[start, end)` query convention and support an in-place time
//! shift used for WRT alignment.

use serde::{Deserialize, Serialize};

/// Tolerance used when rounding a query interval inward to whole samples.
const SAMPLE_EPSILON: f64 = 1e-9;

/// Variety tag for the three buffer data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    NumericEvents,
    TextEvents,
    Signal,
}

impl std::fmt::Display for BufferKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BufferKind::NumericEvents => write!(f, "numeric_events"),
            BufferKind::TextEvents => write!(f, "text_events"),
            BufferKind::Signal => write!(f, "signal"),
        }
    }
}

/// A value to match against event data, numeric or textual.
///
/// Trial delimiting, WRT selection, and sync filtering all match on event
/// values; the config may spell them as numbers or strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Number(f64),
    Text(String),
}

impl Default for EventValue {
    fn default() -> Self {
        EventValue::Number(0.0)
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        EventValue::Number(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::Text(v.to_string())
    }
}

/// One event per row: `[timestamp, value, value, ...]`.
///
/// Rows are ordered by non-decreasing timestamp and all rows share the same
/// arity. The arity is fixed by the first populated append to a buffer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericEvents {
    /// One row per event: column 0 is the timestamp, columns 1+ are values.
    pub event_data: Vec<Vec<f64>>,
}

impl NumericEvents {
    pub fn new(event_data: Vec<Vec<f64>>) -> Self {
        Self { event_data }
    }

    pub fn empty() -> Self {
        Self { event_data: Vec::new() }
    }

    pub fn event_count(&self) -> usize {
        self.event_data.len()
    }

    /// Number of values per event, excluding the timestamp column.
    pub fn values_per_event(&self) -> usize {
        self.event_data.first().map_or(0, |row| row.len().saturating_sub(1))
    }

    pub fn times(&self) -> Vec<f64> {
        self.event_data.iter().map(|row| row[0]).collect()
    }

    fn in_range(t: f64, start: Option<f64>, end: Option<f64>) -> bool {
        start.is_none_or(|a| t >= a) && end.is_none_or(|b| t < b)
    }

    /// Times of events whose `value_index`-th value equals `value`, within
    /// the half-open interval `[start, end)`.
    pub fn times_of(
        &self,
        value: f64,
        value_index: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<f64> {
        let column = value_index + 1;
        self.event_data
            .iter()
            .filter(|row| {
                Self::in_range(row[0], start, end)
                    && row.get(column).is_some_and(|v| *v == value)
            })
            .map(|row| row[0])
            .collect()
    }

    /// Values at `value_index`, for events within `[start, end)`.
    pub fn values(&self, value_index: usize, start: Option<f64>, end: Option<f64>) -> Vec<f64> {
        let column = value_index + 1;
        self.event_data
            .iter()
            .filter(|row| Self::in_range(row[0], start, end))
            .filter_map(|row| row.get(column).copied())
            .collect()
    }

    pub fn copy_time_range(&self, start: Option<f64>, end: Option<f64>) -> Self {
        Self {
            event_data: self
                .event_data
                .iter()
                .filter(|row| Self::in_range(row[0], start, end))
                .cloned()
                .collect(),
        }
    }

    /// Copy events whose selected value falls in the half-open `[min, max)`.
    pub fn copy_value_range(
        &self,
        min: Option<f64>,
        max: Option<f64>,
        value_index: usize,
    ) -> Self {
        let column = value_index + 1;
        Self {
            event_data: self
                .event_data
                .iter()
                .filter(|row| {
                    row.get(column).is_some_and(|v| {
                        min.is_none_or(|lo| *v >= lo) && max.is_none_or(|hi| *v < hi)
                    })
                })
                .cloned()
                .collect(),
        }
    }

    pub fn append(&mut self, other: Self) {
        self.event_data.extend(other.event_data);
    }

    pub fn discard_before(&mut self, start: f64) {
        self.event_data.retain(|row| row[0] >= start);
    }

    pub fn shift_times(&mut self, shift: f64) {
        for row in &mut self.event_data {
            row[0] += shift;
        }
    }

    pub fn first_time(&self) -> Option<f64> {
        self.event_data.first().map(|row| row[0])
    }

    pub fn end_time(&self) -> Option<f64> {
        self.event_data
            .iter()
            .map(|row| row[0])
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |m| m.max(t))))
    }

    /// Add `offset` then multiply by `gain`, in place, on the selected value
    /// column. The offset-first convention suits event codes where a baseline
    /// is subtracted before scaling to a fixed precision.
    pub fn apply_offset_then_gain(&mut self, offset: f64, gain: f64, value_index: usize) {
        let column = value_index + 1;
        for row in &mut self.event_data {
            if let Some(v) = row.get_mut(column) {
                *v = (*v + offset) * gain;
            }
        }
    }
}

/// Parallel arrays of timestamps and UTF-8 text, ordered by timestamp.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextEvents {
    pub timestamp_data: Vec<f64>,
    pub text_data: Vec<String>,
}

impl TextEvents {
    pub fn new(timestamp_data: Vec<f64>, text_data: Vec<String>) -> Self {
        Self { timestamp_data, text_data }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn event_count(&self) -> usize {
        self.text_data.len()
    }

    fn in_range(t: f64, start: Option<f64>, end: Option<f64>) -> bool {
        start.is_none_or(|a| t >= a) && end.is_none_or(|b| t < b)
    }

    pub fn times_of(&self, value: &str, start: Option<f64>, end: Option<f64>) -> Vec<f64> {
        self.timestamp_data
            .iter()
            .zip(&self.text_data)
            .filter(|(t, text)| Self::in_range(**t, start, end) && text.as_str() == value)
            .map(|(t, _)| *t)
            .collect()
    }

    pub fn values(&self, start: Option<f64>, end: Option<f64>) -> Vec<String> {
        self.timestamp_data
            .iter()
            .zip(&self.text_data)
            .filter(|(t, _)| Self::in_range(**t, start, end))
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn copy_time_range(&self, start: Option<f64>, end: Option<f64>) -> Self {
        let mut timestamp_data = Vec::new();
        let mut text_data = Vec::new();
        for (t, text) in self.timestamp_data.iter().zip(&self.text_data) {
            if Self::in_range(*t, start, end) {
                timestamp_data.push(*t);
                text_data.push(text.clone());
            }
        }
        Self { timestamp_data, text_data }
    }

    pub fn append(&mut self, other: Self) {
        self.timestamp_data.extend(other.timestamp_data);
        self.text_data.extend(other.text_data);
    }

    pub fn discard_before(&mut self, start: f64) {
        let keep: Vec<bool> = self.timestamp_data.iter().map(|t| *t >= start).collect();
        let mut it = keep.iter();
        self.timestamp_data.retain(|_| *it.next().unwrap());
        let mut it = keep.iter();
        self.text_data.retain(|_| *it.next().unwrap());
    }

    pub fn shift_times(&mut self, shift: f64) {
        for t in &mut self.timestamp_data {
            *t += shift;
        }
    }

    pub fn first_time(&self) -> Option<f64> {
        self.timestamp_data.first().copied()
    }

    pub fn end_time(&self) -> Option<f64> {
        self.timestamp_data
            .iter()
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(*t, |m| m.max(*t))))
    }
}

/// A chunk of regularly sampled signal data: rows are samples, columns are
/// channels. Sample `i` has time `first_sample_time + i / sample_frequency`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalChunk {
    /// One row per sample, one column per channel.
    pub sample_data: Vec<Vec<f64>>,

    /// Sample frequency in Hz, `> 0`.
    pub sample_frequency: f64,

    /// Time in seconds of the first sample in `sample_data`.
    pub first_sample_time: f64,

    /// Identifiers for the channels, one per column.
    pub channel_ids: Vec<String>,
}

impl SignalChunk {
    pub fn new(
        sample_data: Vec<Vec<f64>>,
        sample_frequency: f64,
        first_sample_time: f64,
        channel_ids: Vec<String>,
    ) -> Self {
        Self { sample_data, sample_frequency, first_sample_time, channel_ids }
    }

    pub fn empty(sample_frequency: f64, first_sample_time: f64, channel_ids: Vec<String>) -> Self {
        Self { sample_data: Vec::new(), sample_frequency, first_sample_time, channel_ids }
    }

    pub fn sample_count(&self) -> usize {
        self.sample_data.len()
    }

    pub fn channel_count(&self) -> usize {
        self.sample_data.first().map_or(self.channel_ids.len(), |row| row.len())
    }

    pub fn channel_index(&self, channel_id: &str) -> Option<usize> {
        self.channel_ids.iter().position(|id| id == channel_id)
    }

    pub fn sample_times(&self) -> Vec<f64> {
        (0..self.sample_count())
            .map(|i| self.first_sample_time + i as f64 / self.sample_frequency)
            .collect()
    }

    pub fn first_time(&self) -> Option<f64> {
        (self.sample_count() > 0).then_some(self.first_sample_time)
    }

    pub fn end_time(&self) -> Option<f64> {
        let n = self.sample_count();
        (n > 0).then(|| self.first_sample_time + (n - 1) as f64 / self.sample_frequency)
    }

    /// Index range `[first, end)` of samples inside `[start, end)`, rounded
    /// inward to whole-sample boundaries.
    fn index_range(&self, start: Option<f64>, end: Option<f64>) -> (usize, usize) {
        let n = self.sample_count() as i64;
        let first = match start {
            Some(a) => {
                let raw = (a - self.first_sample_time) * self.sample_frequency;
                (raw - SAMPLE_EPSILON).ceil() as i64
            }
            None => 0,
        }
        .clamp(0, n);
        let end_excl = match end {
            Some(b) => {
                let raw = (b - self.first_sample_time) * self.sample_frequency;
                (raw - SAMPLE_EPSILON).ceil() as i64
            }
            None => n,
        }
        .clamp(0, n);
        (first as usize, end_excl.max(first) as usize)
    }

    pub fn copy_time_range(&self, start: Option<f64>, end: Option<f64>) -> Self {
        let (first, end_excl) = self.index_range(start, end);
        Self {
            sample_data: self.sample_data[first..end_excl].to_vec(),
            sample_frequency: self.sample_frequency,
            first_sample_time: self.first_sample_time
                + first as f64 / self.sample_frequency,
            channel_ids: self.channel_ids.clone(),
        }
    }

    /// Concatenate another chunk's samples onto this one. The caller is
    /// responsible for continuity; this keeps `first_sample_time` of self
    /// unless self was empty.
    pub fn append(&mut self, other: Self) {
        if self.sample_data.is_empty() {
            self.first_sample_time = other.first_sample_time;
        }
        self.sample_data.extend(other.sample_data);
    }

    pub fn discard_before(&mut self, start: f64) {
        let (first, _) = self.index_range(Some(start), None);
        if first > 0 {
            self.sample_data.drain(..first);
            self.first_sample_time += first as f64 / self.sample_frequency;
        }
    }

    pub fn shift_times(&mut self, shift: f64) {
        self.first_sample_time += shift;
    }

    /// Times of samples whose `value_index`-th channel equals `value`.
    pub fn times_of(
        &self,
        value: f64,
        value_index: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<f64> {
        let (first, end_excl) = self.index_range(start, end);
        (first..end_excl)
            .filter(|i| self.sample_data[*i].get(value_index).is_some_and(|v| *v == value))
            .map(|i| self.first_sample_time + i as f64 / self.sample_frequency)
            .collect()
    }

    /// Add `offset` then multiply by `gain` on one channel, or all channels
    /// when `channel_index` is `None`.
    pub fn apply_offset_then_gain(&mut self, offset: f64, gain: f64, channel_index: Option<usize>) {
        for row in &mut self.sample_data {
            match channel_index {
                Some(c) => {
                    if let Some(v) = row.get_mut(c) {
                        *v = (*v + offset) * gain;
                    }
                }
                None => {
                    for v in row.iter_mut() {
                        *v = (*v + offset) * gain;
                    }
                }
            }
        }
    }
}

/// Reader output and buffer content: one of the three data varieties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BufferData {
    NumericEvents(NumericEvents),
    TextEvents(TextEvents),
    Signal(SignalChunk),
}

impl BufferData {
    pub fn kind(&self) -> BufferKind {
        match self {
            BufferData::NumericEvents(_) => BufferKind::NumericEvents,
            BufferData::TextEvents(_) => BufferKind::TextEvents,
            BufferData::Signal(_) => BufferKind::Signal,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            BufferData::NumericEvents(events) => events.event_count() == 0,
            BufferData::TextEvents(events) => events.event_count() == 0,
            BufferData::Signal(chunk) => chunk.sample_count() == 0,
        }
    }

    pub fn first_time(&self) -> Option<f64> {
        match self {
            BufferData::NumericEvents(events) => events.first_time(),
            BufferData::TextEvents(events) => events.first_time(),
            BufferData::Signal(chunk) => chunk.first_time(),
        }
    }

    pub fn end_time(&self) -> Option<f64> {
        match self {
            BufferData::NumericEvents(events) => events.end_time(),
            BufferData::TextEvents(events) => events.end_time(),
            BufferData::Signal(chunk) => chunk.end_time(),
        }
    }

    pub fn copy_time_range(&self, start: Option<f64>, end: Option<f64>) -> Self {
        match self {
            BufferData::NumericEvents(events) => {
                BufferData::NumericEvents(events.copy_time_range(start, end))
            }
            BufferData::TextEvents(events) => {
                BufferData::TextEvents(events.copy_time_range(start, end))
            }
            BufferData::Signal(chunk) => BufferData::Signal(chunk.copy_time_range(start, end)),
        }
    }

    pub fn shift_times(&mut self, shift: f64) {
        match self {
            BufferData::NumericEvents(events) => events.shift_times(shift),
            BufferData::TextEvents(events) => events.shift_times(shift),
            BufferData::Signal(chunk) => chunk.shift_times(shift),
        }
    }

    pub fn discard_before(&mut self, start: f64) {
        match self {
            BufferData::NumericEvents(events) => events.discard_before(start),
            BufferData::TextEvents(events) => events.discard_before(start),
            BufferData::Signal(chunk) => chunk.discard_before(start),
        }
    }

    /// Times of events/samples matching the given value within `[start, end)`.
    ///
    /// Numeric values match numeric events and signal samples; text values
    /// match text events. Mismatched varieties yield no times.
    pub fn times_of(
        &self,
        value: &EventValue,
        value_index: usize,
        start: Option<f64>,
        end: Option<f64>,
    ) -> Vec<f64> {
        match (self, value) {
            (BufferData::NumericEvents(events), EventValue::Number(v)) => {
                events.times_of(*v, value_index, start, end)
            }
            (BufferData::TextEvents(events), EventValue::Text(v)) => {
                events.times_of(v, start, end)
            }
            (BufferData::Signal(chunk), EventValue::Number(v)) => {
                chunk.times_of(*v, value_index, start, end)
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events(rows: &[[f64; 2]]) -> NumericEvents {
        NumericEvents::new(rows.iter().map(|r| r.to_vec()).collect())
    }

    #[test]
    fn numeric_query_is_half_open() {
        let list = events(&[[0.0, 1.0], [1.0, 2.0], [2.0, 3.0]]);
        let copy = list.copy_time_range(Some(0.0), Some(2.0));
        assert_eq!(copy.event_count(), 2);
        assert_eq!(copy.times(), vec![0.0, 1.0]);
    }

    #[test]
    fn numeric_times_of_matches_value_column() {
        let list = events(&[[1.0, 42.0], [1.5, 7.0], [2.5, 42.0]]);
        assert_eq!(list.times_of(42.0, 0, None, None), vec![1.0, 2.5]);
        assert_eq!(list.times_of(42.0, 0, Some(1.5), None), vec![2.5]);
    }

    #[test]
    fn numeric_offset_then_gain_order() {
        let mut list = events(&[[0.1, 1.0]]);
        list.apply_offset_then_gain(10.0, -2.0, 0);
        assert_eq!(list.event_data[0][1], -22.0);
    }

    #[test]
    fn numeric_discard_and_shift() {
        let mut list = events(&[[0.0, 1.0], [1.0, 2.0], [2.0, 3.0]]);
        list.discard_before(1.0);
        assert_eq!(list.times(), vec![1.0, 2.0]);
        list.shift_times(-1.5);
        assert_eq!(list.times(), vec![-0.5, 0.5]);
        assert_eq!(list.end_time(), Some(0.5));
    }

    #[test]
    fn numeric_copy_value_range_is_half_open() {
        let list = events(&[[0.0, 1.0], [1.0, 2.0], [2.0, 3.0]]);
        let copy = list.copy_value_range(Some(2.0), Some(3.0), 0);
        assert_eq!(copy.times(), vec![1.0]);
    }

    #[test]
    fn text_query_and_match() {
        let list = TextEvents::new(
            vec![0.2, 1.2, 1.3],
            vec!["red".into(), "red".into(), "green".into()],
        );
        assert_eq!(list.times_of("red", None, None), vec![0.2, 1.2]);
        let copy = list.copy_time_range(Some(1.0), Some(2.0));
        assert_eq!(copy.event_count(), 2);
        assert_eq!(copy.text_data, vec!["red".to_string(), "green".to_string()]);
    }

    #[test]
    fn text_discard_keeps_arrays_parallel() {
        let mut list = TextEvents::new(vec![0.0, 1.0, 2.0], vec!["a".into(), "b".into(), "c".into()]);
        list.discard_before(1.0);
        assert_eq!(list.timestamp_data, vec![1.0, 2.0]);
        assert_eq!(list.text_data, vec!["b".to_string(), "c".to_string()]);
    }

    fn ramp_chunk(n: usize, f: f64, t0: f64) -> SignalChunk {
        let sample_data = (0..n).map(|i| vec![i as f64, -(i as f64)]).collect();
        SignalChunk::new(sample_data, f, t0, vec!["sin".into(), "cos".into()])
    }

    #[test]
    fn signal_query_rounds_inward() {
        let chunk = ramp_chunk(60, 10.0, 0.0);
        // [0.41, 0.55) holds samples at 0.5 only.
        let copy = chunk.copy_time_range(Some(0.41), Some(0.55));
        assert_eq!(copy.sample_count(), 1);
        assert_eq!(copy.first_sample_time, 0.5);
        // Exact boundaries: [0.5, 1.0) includes 0.5 and excludes 1.0.
        let copy = chunk.copy_time_range(Some(0.5), Some(1.0));
        assert_eq!(copy.sample_count(), 5);
        assert_eq!(copy.first_sample_time, 0.5);
        assert_eq!(copy.end_time(), Some(0.9));
    }

    #[test]
    fn signal_discard_moves_origin() {
        let mut chunk = ramp_chunk(10, 10.0, 0.0);
        chunk.discard_before(0.35);
        assert_eq!(chunk.sample_count(), 6);
        assert!((chunk.first_sample_time - 0.4).abs() < 1e-12);
    }

    #[test]
    fn signal_end_time_counts_samples() {
        let chunk = ramp_chunk(60, 10.0, 0.0);
        assert_eq!(chunk.end_time(), Some(5.9));
        assert_eq!(SignalChunk::empty(10.0, 0.0, vec![]).end_time(), None);
    }

    #[test]
    fn buffer_data_times_of_dispatches_by_kind() {
        let data = BufferData::NumericEvents(events(&[[1.0, 1010.0], [2.0, 1010.0]]));
        let times = data.times_of(&EventValue::Number(1010.0), 0, None, None);
        assert_eq!(times, vec![1.0, 2.0]);
        assert!(data
            .times_of(&EventValue::Text("1010".into()), 0, None, None)
            .is_empty());
    }
}
