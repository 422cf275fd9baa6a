//! Transformers - pure functions from buffer data to buffer data.
//!
//! The router runs each derived route's transformer pipeline on an
//! independent copy of every incremental result slice before appending to
//! the derived buffer. Transformers may keep streaming state (for example
//! resampling position) but must never touch live buffers.

use contracts::{parse_component_args, BufferData, ContractError, SignalChunk};
use serde::Deserialize;
use tracing::warn;

const TIME_EPSILON: f64 = 1e-9;

pub trait Transformer: Send {
    /// Transform one increment of data. Varieties the transformer does not
    /// understand pass through unchanged with a warning.
    fn transform(&mut self, data: BufferData) -> Result<BufferData, ContractError>;
}

/// Add `offset`, then multiply by `gain`.
///
/// Applies to the selected value column of numeric events, or to all
/// channels of a signal chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OffsetThenGain {
    pub offset: f64,
    pub gain: f64,
    pub value_index: usize,
}

impl Default for OffsetThenGain {
    fn default() -> Self {
        Self { offset: 0.0, gain: 1.0, value_index: 0 }
    }
}

impl OffsetThenGain {
    pub fn from_args(args: &serde_json::Value) -> Result<Self, ContractError> {
        parse_component_args("OffsetThenGain", args)
    }
}

impl Transformer for OffsetThenGain {
    fn transform(&mut self, mut data: BufferData) -> Result<BufferData, ContractError> {
        match &mut data {
            BufferData::NumericEvents(events) => {
                events.apply_offset_then_gain(self.offset, self.gain, self.value_index);
            }
            BufferData::Signal(chunk) => {
                chunk.apply_offset_then_gain(self.offset, self.gain, None);
            }
            BufferData::TextEvents(_) => {
                warn!("OffsetThenGain does not apply to text events");
            }
        }
        Ok(data)
    }
}

/// Keep numeric event rows whose selected value lies in `[min, max)`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct FilterRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub value_index: usize,
}

impl FilterRange {
    pub fn from_args(args: &serde_json::Value) -> Result<Self, ContractError> {
        parse_component_args("FilterRange", args)
    }
}

impl Transformer for FilterRange {
    fn transform(&mut self, data: BufferData) -> Result<BufferData, ContractError> {
        match data {
            BufferData::NumericEvents(events) => Ok(BufferData::NumericEvents(
                events.copy_value_range(self.min, self.max, self.value_index),
            )),
            other => {
                warn!("FilterRange applies to numeric events only");
                Ok(other)
            }
        }
    }
}

/// Convert sparse numeric events into a regularly sampled signal.
///
/// Sample times start at the first event seen and advance at
/// `sample_frequency`. Gaps between events are filled by linear
/// interpolation, or with `fill_with` when configured. Samples strictly
/// after the latest event wait for the next increment, so the output stays
/// causal across read cycles.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SparseSignalArgs {
    pub sample_frequency: f64,
    pub channel_ids: Vec<String>,
    #[serde(default)]
    pub fill_with: Option<f64>,
}

#[derive(Debug)]
pub struct SparseSignal {
    sample_frequency: f64,
    channel_ids: Vec<String>,
    fill_with: Option<f64>,
    next_sample_time: Option<f64>,
    last_event: Option<(f64, Vec<f64>)>,
}

impl SparseSignal {
    pub fn new(sample_frequency: f64, channel_ids: Vec<String>, fill_with: Option<f64>) -> Self {
        Self { sample_frequency, channel_ids, fill_with, next_sample_time: None, last_event: None }
    }

    pub fn from_args(args: &serde_json::Value) -> Result<Self, ContractError> {
        let args: SparseSignalArgs = parse_component_args("SparseSignal", args)?;
        if args.sample_frequency <= 0.0 {
            return Err(ContractError::config_validation(
                "SparseSignal.sample_frequency",
                "must be > 0",
            ));
        }
        Ok(Self::new(args.sample_frequency, args.channel_ids, args.fill_with))
    }

    fn sample_between(
        &self,
        t: f64,
        previous: &(f64, Vec<f64>),
        next: &(f64, Vec<f64>),
    ) -> Vec<f64> {
        match self.fill_with {
            Some(constant) => vec![constant; self.channel_ids.len()],
            None => {
                let (t0, v0) = previous;
                let (t1, v1) = next;
                let span = t1 - t0;
                let fraction = if span > 0.0 { (t - t0) / span } else { 0.0 };
                v0.iter().zip(v1).map(|(a, b)| a + (b - a) * fraction).collect()
            }
        }
    }
}

impl Transformer for SparseSignal {
    fn transform(&mut self, data: BufferData) -> Result<BufferData, ContractError> {
        let events = match data {
            BufferData::NumericEvents(events) => events,
            other => {
                warn!("SparseSignal applies to numeric events only");
                return Ok(other);
            }
        };
        let step = 1.0 / self.sample_frequency;
        let mut samples: Vec<Vec<f64>> = Vec::new();
        let mut chunk_start: Option<f64> = None;

        for row in &events.event_data {
            let (event_time, event_values) = (row[0], row[1..].to_vec());
            if event_values.len() != self.channel_ids.len() {
                return Err(ContractError::buffer_rejected(
                    "SparseSignal",
                    format!(
                        "event has {} values but {} channel ids are configured",
                        event_values.len(),
                        self.channel_ids.len()
                    ),
                ));
            }
            let mut next = *self.next_sample_time.get_or_insert(event_time);
            if let Some(previous) = self.last_event.clone() {
                let incoming = (event_time, event_values.clone());
                while next < event_time - TIME_EPSILON {
                    chunk_start.get_or_insert(next);
                    samples.push(self.sample_between(next, &previous, &incoming));
                    next += step;
                }
            }
            if (next - event_time).abs() <= TIME_EPSILON {
                chunk_start.get_or_insert(next);
                samples.push(event_values.clone());
                next += step;
            }
            self.next_sample_time = Some(next);
            self.last_event = Some((event_time, event_values));
        }

        let first_sample_time = chunk_start.or(self.next_sample_time).unwrap_or(0.0);
        Ok(BufferData::Signal(SignalChunk::new(
            samples,
            self.sample_frequency,
            first_sample_time,
            self.channel_ids.clone(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::NumericEvents;
    use serde_json::json;

    fn numeric(rows: &[&[f64]]) -> BufferData {
        BufferData::NumericEvents(NumericEvents::new(rows.iter().map(|r| r.to_vec()).collect()))
    }

    #[test]
    fn offset_then_gain_on_events() {
        let mut transformer = OffsetThenGain::from_args(&json!({"offset": 10.0, "gain": -2.0})).unwrap();
        let out = transformer.transform(numeric(&[&[0.1, 1.0], &[3.1, 0.0]])).unwrap();
        match out {
            BufferData::NumericEvents(events) => {
                assert_eq!(events.event_data[0], vec![0.1, -22.0]);
                assert_eq!(events.event_data[1], vec![3.1, -20.0]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn offset_then_gain_on_signal_hits_all_channels() {
        let mut transformer = OffsetThenGain::from_args(&json!({"offset": 1.0, "gain": 2.0})).unwrap();
        let chunk = SignalChunk::new(vec![vec![1.0, 2.0]], 10.0, 0.0, vec!["a".into(), "b".into()]);
        match transformer.transform(BufferData::Signal(chunk)).unwrap() {
            BufferData::Signal(out) => assert_eq!(out.sample_data[0], vec![4.0, 6.0]),
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn unknown_arg_keys_are_config_errors() {
        assert!(OffsetThenGain::from_args(&json!({"gian": 2.0})).is_err());
    }

    #[test]
    fn filter_range_is_half_open() {
        let mut transformer = FilterRange::from_args(&json!({"min": 1.0, "max": 3.0})).unwrap();
        let out = transformer
            .transform(numeric(&[&[0.0, 0.5], &[1.0, 1.0], &[2.0, 2.9], &[3.0, 3.0]]))
            .unwrap();
        match out {
            BufferData::NumericEvents(events) => {
                assert_eq!(events.times(), vec![1.0, 2.0]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn sparse_signal_interpolates_between_events() {
        let mut transformer =
            SparseSignal::new(10.0, vec!["x".into()], None);
        let out = transformer.transform(numeric(&[&[0.0, 0.0], &[0.4, 4.0]])).unwrap();
        match out {
            BufferData::Signal(chunk) => {
                assert_eq!(chunk.first_sample_time, 0.0);
                let values: Vec<f64> = chunk.sample_data.iter().map(|r| r[0]).collect();
                assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn sparse_signal_streams_across_increments() {
        let mut transformer = SparseSignal::new(10.0, vec!["x".into()], None);
        let first = transformer.transform(numeric(&[&[0.0, 0.0]])).unwrap();
        match first {
            BufferData::Signal(chunk) => assert_eq!(chunk.sample_count(), 1),
            _ => panic!("wrong variety"),
        }
        // The next increment continues from sample index 1.
        let second = transformer.transform(numeric(&[&[0.2, 2.0]])).unwrap();
        match second {
            BufferData::Signal(chunk) => {
                assert!((chunk.first_sample_time - 0.1).abs() < 1e-9);
                let values: Vec<f64> = chunk.sample_data.iter().map(|r| r[0]).collect();
                assert_eq!(values, vec![1.0, 2.0]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn sparse_signal_constant_fill() {
        let mut transformer = SparseSignal::new(10.0, vec!["x".into()], Some(-1.0));
        let out = transformer.transform(numeric(&[&[0.0, 5.0], &[0.3, 8.0]])).unwrap();
        match out {
            BufferData::Signal(chunk) => {
                let values: Vec<f64> = chunk.sample_data.iter().map(|r| r[0]).collect();
                assert_eq!(values, vec![5.0, -1.0, -1.0, 8.0]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn sparse_signal_empty_input_yields_empty_chunk() {
        let mut transformer = SparseSignal::new(100.0, vec!["x".into(), "y".into()], None);
        match transformer.transform(numeric(&[])).unwrap() {
            BufferData::Signal(chunk) => {
                assert_eq!(chunk.sample_count(), 0);
                assert_eq!(chunk.sample_frequency, 100.0);
                assert_eq!(chunk.channel_ids, vec!["x".to_string(), "y".to_string()]);
            }
            _ => panic!("wrong variety"),
        }
    }
}
