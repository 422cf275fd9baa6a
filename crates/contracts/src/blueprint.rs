//! ExperimentBlueprint - Config Loader output.
//!
//! Describes one complete experiment: readers with their routes and sync
//! descriptors, trial delimiting and extraction rules, and optional plotters.
//! Component classes are resolved against static registries at pipeline
//! build time; argument bags are validated against each component's schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;
use validator::Validate;

use crate::{EventValue, ReaderSyncConfig};

/// Complete experiment configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExperimentBlueprint {
    /// Arbitrary experiment metadata, passed unaltered to enhancers and the
    /// sink header.
    #[serde(default)]
    pub experiment: JsonMap<String, JsonValue>,

    /// Reader definitions, keyed by reader name. The map order (sorted by
    /// name) is the deterministic polling order.
    pub readers: BTreeMap<String, ReaderConfig>,

    /// Trial delimiting and extraction rules.
    #[validate(nested)]
    pub trials: TrialsConfig,

    /// Optional plotters for gui mode.
    #[serde(default)]
    pub plotters: Vec<ComponentConfig>,
}

/// One reader definition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReaderConfig {
    /// Registered reader class, optionally as a dotted path whose final
    /// segment names the class.
    #[validate(length(min = 1, message = "reader class cannot be empty"))]
    pub class: String,

    /// Constructor argument bag, validated against the class schema.
    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub args: JsonValue,

    /// Derived buffers keyed by buffer name, each fed from one reader result
    /// through a transformer pipeline.
    #[serde(default)]
    pub extra_buffers: BTreeMap<String, ExtraBufferConfig>,

    /// Clock sync descriptor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync: Option<ReaderSyncConfig>,

    /// Pace reads against the wall clock (gui mode only).
    #[serde(default)]
    pub simulate_delay: bool,

    /// Consecutive empty reads tolerated while catching up to a trial end.
    #[serde(default = "default_empty_reads_allowed")]
    pub empty_reads_allowed: usize,
}

fn default_empty_reads_allowed() -> usize {
    3
}

/// One derived buffer definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtraBufferConfig {
    /// Reader result feeding this buffer; defaults to the buffer name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_result_name: Option<String>,

    /// Transformers applied in order, top first.
    #[serde(default)]
    pub transformers: Vec<ComponentConfig>,
}

/// A registered component with its argument bag.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ComponentConfig {
    #[validate(length(min = 1, message = "component class cannot be empty"))]
    pub class: String,

    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub args: JsonValue,
}

/// An enhancer or collecter with an optional `when` predicate.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnhancerConfig {
    #[validate(length(min = 1, message = "enhancer class cannot be empty"))]
    pub class: String,

    #[serde(default, skip_serializing_if = "JsonValue::is_null")]
    pub args: JsonValue,

    /// Predicate expression over the trial; when false, the step is skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub when: Option<String>,
}

/// Trial delimiting and extraction rules.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct TrialsConfig {
    /// Buffer watched for delimiting start events.
    #[serde(default = "default_start_buffer")]
    #[validate(length(min = 1))]
    pub start_buffer: String,

    /// Event value that delimits trials.
    pub start_value: EventValue,

    /// Which value per event to match against `start_value`.
    #[serde(default)]
    pub start_value_index: usize,

    /// Start of the implicit trial before the first delimiting event.
    #[serde(default)]
    pub trial_start_time: f64,

    /// Buffer searched for the per-trial "with respect to" event.
    #[serde(default = "default_wrt_buffer")]
    #[validate(length(min = 1))]
    pub wrt_buffer: String,

    /// Event value marking the per-trial zero time.
    #[serde(default)]
    pub wrt_value: EventValue,

    /// Which value per event to match against `wrt_value`.
    #[serde(default)]
    pub wrt_value_index: usize,

    /// Per-trial augments, run in order at extraction.
    #[serde(default)]
    pub enhancers: Vec<EnhancerConfig>,

    /// End-of-run augments over all trials, may rewrite enhancements.
    #[serde(default)]
    pub collecters: Vec<EnhancerConfig>,
}

fn default_start_buffer() -> String {
    "start".to_string()
}

fn default_wrt_buffer() -> String {
    "wrt".to_string()
}

/// Deserialize a component's argument bag against its typed schema.
///
/// Unknown keys are rejected by each schema's `deny_unknown_fields`, which
/// surfaces misspelled config keys as validation errors naming the key.
pub fn parse_component_args<T: serde::de::DeserializeOwned>(
    class: &str,
    args: &JsonValue,
) -> Result<T, crate::ContractError> {
    let value = match args {
        JsonValue::Null => JsonValue::Object(JsonMap::new()),
        _ => args.clone(),
    };
    serde_json::from_value(value).map_err(|e| {
        crate::ContractError::config_validation(format!("{class}.args"), e.to_string())
    })
}

impl ReaderConfig {
    /// The sync list name this reader aligns with: its own name when it
    /// observes sync itself, a borrowed reader's name otherwise.
    pub fn sync_reader_name<'a>(&'a self, own_name: &'a str) -> Option<&'a str> {
        let sync = self.sync.as_ref()?;
        match &sync.reader_name {
            Some(borrowed) => Some(borrowed.as_str()),
            None => Some(own_name),
        }
    }
}
