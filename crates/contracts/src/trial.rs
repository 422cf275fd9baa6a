//! Trial - Extractor output.
//!
//! A delimited part of the timeline with named event, signal, and computed
//! data from the same time range, aligned to a per-trial zero time.

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::{BufferData, NumericEvents, SignalChunk, TextEvents};

/// Convert an `f64` to JSON, mapping NaN and infinities to `null`.
pub fn json_f64(value: f64) -> JsonValue {
    serde_json::Number::from_f64(value).map_or(JsonValue::Null, JsonValue::Number)
}

/// A delimited part of the timeline.
///
/// All timestamps inside the data maps are relative to `wrt_time`;
/// `start_time`, `end_time` and `wrt_time` themselves are absolute times in
/// the reference clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Trial {
    /// Time of the delimiting start event, reference clock.
    pub start_time: f64,

    /// Time of the next delimiting event; `None` for the final trial.
    pub end_time: Option<f64>,

    /// The zero time subtracted from data assigned to this trial.
    pub wrt_time: f64,

    /// Named numeric event lists assigned to this trial.
    pub numeric_events: BTreeMap<String, NumericEvents>,

    /// Named text event lists assigned to this trial.
    pub text_events: BTreeMap<String, TextEvents>,

    /// Named signal chunks assigned to this trial.
    pub signals: BTreeMap<String, SignalChunk>,

    /// Name-value pairs added by enhancers and collecters.
    pub enhancements: BTreeMap<String, JsonValue>,

    /// Category (like "value", "id", "time") to enhancement names.
    pub enhancement_categories: BTreeMap<String, Vec<String>>,
}

impl Trial {
    pub fn new(start_time: f64, end_time: Option<f64>) -> Self {
        Self { start_time, end_time, ..Default::default() }
    }

    /// Trial duration, when the end is known.
    pub fn duration(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start_time)
    }

    /// Store buffer data under the map matching its variety.
    pub fn add_buffer_data(&mut self, name: impl Into<String>, data: BufferData) {
        let name = name.into();
        match data {
            BufferData::NumericEvents(events) => {
                self.numeric_events.insert(name, events);
            }
            BufferData::TextEvents(events) => {
                self.text_events.insert(name, events);
            }
            BufferData::Signal(chunk) => {
                self.signals.insert(name, chunk);
            }
        }
    }

    /// Add a name-value pair under a category.
    ///
    /// Names are unique per trial; re-adding a name replaces its value. The
    /// category groups names for downstream tools: "value" for scores and
    /// metrics, "id" for nominal labels, "time" for event time lists.
    pub fn add_enhancement(
        &mut self,
        name: impl Into<String>,
        value: JsonValue,
        category: impl Into<String>,
    ) {
        let name = name.into();
        let names = self.enhancement_categories.entry(category.into()).or_default();
        if !names.contains(&name) {
            names.push(name.clone());
        }
        self.enhancements.insert(name, value);
    }

    pub fn enhancement(&self, name: &str) -> Option<&JsonValue> {
        self.enhancements.get(name)
    }

    /// One element from the named buffer or enhancement, indexing into rows
    /// and values where applicable.
    pub fn get_one(&self, name: &str, index: usize, value_index: usize) -> Option<JsonValue> {
        if let Some(chunk) = self.signals.get(name) {
            return chunk
                .sample_data
                .get(index)
                .and_then(|row| row.get(value_index))
                .map(|v| json_f64(*v));
        }
        if let Some(events) = self.numeric_events.get(name) {
            return events
                .event_data
                .get(index)
                .and_then(|row| row.get(value_index + 1))
                .map(|v| json_f64(*v));
        }
        if let Some(events) = self.text_events.get(name) {
            return events.text_data.get(index).map(|text| JsonValue::String(text.clone()));
        }
        match self.enhancements.get(name) {
            Some(JsonValue::Array(items)) => items.get(index).cloned(),
            Some(value) => Some(value.clone()),
            None => None,
        }
    }

    /// One timestamp from the named buffer or enhancement.
    pub fn get_time(&self, name: &str, index: usize) -> Option<f64> {
        if let Some(chunk) = self.signals.get(name) {
            return (index < chunk.sample_count())
                .then(|| chunk.first_sample_time + index as f64 / chunk.sample_frequency);
        }
        if let Some(events) = self.numeric_events.get(name) {
            return events.event_data.get(index).map(|row| row[0]);
        }
        if let Some(events) = self.text_events.get(name) {
            return events.timestamp_data.get(index).copied();
        }
        match self.enhancements.get(name) {
            Some(JsonValue::Array(items)) => items.get(index).and_then(JsonValue::as_f64),
            Some(value) => value.as_f64(),
            None => None,
        }
    }
}
