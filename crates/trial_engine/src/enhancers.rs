//! Per-trial enhancers: compute new name-value pairs to save with each trial.
//!
//! By convention an "enhancer" adds new name-value pairs and leaves existing
//! data untouched, while an "adjuster" like `SignalSmoother` modifies the
//! trial's own data copies. Both run through the same pipeline.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Map as JsonMap;
use serde_json::Value as JsonValue;

use contracts::expression::{CompiledExpression, Value};
use contracts::{json_f64, parse_component_args, ContractError, FileFinder, Trial};

/// Compute new name-value pairs to save with one trial.
///
/// Values must be plain JSON-portable data so they survive the trial file.
pub trait Enhancer: Send {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        trial_number: usize,
        experiment: &JsonMap<String, JsonValue>,
        subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError>;
}

/// Writes `duration = end - start`, null for the final open-ended trial.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TrialDurationEnhancer {
    pub default_duration: Option<f64>,
}

impl TrialDurationEnhancer {
    pub fn from_args(args: &JsonValue) -> Result<Self, ContractError> {
        parse_component_args("TrialDurationEnhancer", args)
    }
}

impl Enhancer for TrialDurationEnhancer {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let duration = trial.duration().or(self.default_duration);
        trial.add_enhancement(
            "duration",
            duration.map_or(JsonValue::Null, json_f64),
            "value",
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExpressionEnhancerArgs {
    expression: String,
    value_name: String,
    #[serde(default = "default_value_category")]
    value_category: String,
    #[serde(default)]
    default_value: JsonValue,
}

fn default_value_category() -> String {
    "value".to_string()
}

/// Evaluate an expression over the trial and store the result by name.
pub struct ExpressionEnhancer {
    expression: CompiledExpression,
    value_name: String,
    value_category: String,
    default_value: JsonValue,
}

impl ExpressionEnhancer {
    pub fn from_args(args: &JsonValue) -> Result<Self, ContractError> {
        let args: ExpressionEnhancerArgs = parse_component_args("ExpressionEnhancer", args)?;
        Ok(Self {
            expression: CompiledExpression::parse(&args.expression)?,
            value_name: args.value_name,
            value_category: args.value_category,
            default_value: args.default_value,
        })
    }
}

impl Enhancer for ExpressionEnhancer {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let value = match self.expression.evaluate(&*trial) {
            Value::Null => self.default_value.clone(),
            value => value.to_json(),
        };
        trial.add_enhancement(&self.value_name, value, &self.value_category);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct SignalSmootherArgs {
    buffer_name: String,
    #[serde(default)]
    channel_id: Option<String>,
    #[serde(default = "default_kernel_size")]
    kernel_size: usize,
}

fn default_kernel_size() -> usize {
    10
}

/// Replace one channel of a named trial signal with a boxcar-filtered copy
/// of the same length. Applies to the trial's copy, never the live buffer.
pub struct SignalSmoother {
    buffer_name: String,
    channel_id: Option<String>,
    kernel_size: usize,
}

impl SignalSmoother {
    pub fn from_args(args: &JsonValue) -> Result<Self, ContractError> {
        let args: SignalSmootherArgs = parse_component_args("SignalSmoother", args)?;
        if args.kernel_size == 0 {
            return Err(ContractError::config_validation(
                "SignalSmoother.kernel_size",
                "must be >= 1",
            ));
        }
        Ok(Self {
            buffer_name: args.buffer_name,
            channel_id: args.channel_id,
            kernel_size: args.kernel_size,
        })
    }
}

impl Enhancer for SignalSmoother {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let Some(signal) = trial.signals.get_mut(&self.buffer_name) else {
            return Ok(());
        };
        let n = signal.sample_count();
        if n < self.kernel_size {
            return Ok(());
        }
        let channel = match &self.channel_id {
            Some(id) => signal.channel_index(id).ok_or_else(|| {
                ContractError::config_validation(
                    "SignalSmoother.channel_id",
                    format!("channel '{id}' not found"),
                )
            })?,
            None => 0,
        };
        let original: Vec<f64> = signal.sample_data.iter().map(|row| row[channel]).collect();
        let k = self.kernel_size;
        // Same-length uniform convolution with implicit zero padding.
        let shift = (k - 1) / 2;
        for (i, row) in signal.sample_data.iter_mut().enumerate() {
            let t = i + shift;
            let lo = t.saturating_sub(k - 1);
            let hi = t.min(n - 1);
            let sum: f64 = original[lo..=hi].iter().sum();
            row[channel] = sum / k as f64;
        }
        Ok(())
    }
}

/// Untagged one-or-many file list, so configs can say
/// `rules_csv = "ecodes.csv"` or a list of files.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

fn read_rules_csv(
    files: &[String],
    finder: &FileFinder,
    wanted_types: &[String],
) -> Result<Vec<BTreeMap<String, String>>, ContractError> {
    let mut rows = Vec::new();
    for file in files {
        let path = finder.find(file);
        let mut reader = csv::Reader::from_path(&path).map_err(|e| {
            ContractError::config_validation("rules_csv", format!("{}: {e}", path.display()))
        })?;
        let headers = reader
            .headers()
            .map_err(|e| ContractError::config_validation("rules_csv", e.to_string()))?
            .clone();
        for record in reader.records() {
            let record =
                record.map_err(|e| ContractError::config_validation("rules_csv", e.to_string()))?;
            let row: BTreeMap<String, String> = headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect();
            if row.get("type").is_some_and(|t| wanted_types.iter().any(|w| w == t)) {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

fn rule_f64(row: &BTreeMap<String, String>, key: &str) -> Result<f64, ContractError> {
    row.get(key)
        .and_then(|v| v.trim().parse().ok())
        .ok_or_else(|| {
            ContractError::config_validation("rules_csv", format!("bad or missing '{key}' column"))
        })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct PairedCodesArgs {
    buffer_name: String,
    rules_csv: OneOrMany,
    #[serde(default)]
    value_index: usize,
    #[serde(default = "default_paired_rule_types")]
    rule_types: Vec<String>,
}

fn default_paired_rule_types() -> Vec<String> {
    vec!["id".to_string(), "value".to_string()]
}

#[derive(Debug, Clone)]
struct PairedCodeRule {
    category: String,
    name: String,
    base: f64,
    min: f64,
    max: f64,
    scale: f64,
}

/// Look for pairs of numeric events that represent property-value pairs.
///
/// Each rules row maps a property code to a name plus the value-event range
/// `[min, max)`, base, and scale used to decode the value that follows it.
pub struct PairedCodesEnhancer {
    buffer_name: String,
    value_index: usize,
    rules: Vec<(f64, PairedCodeRule)>,
}

impl PairedCodesEnhancer {
    pub fn from_args(args: &JsonValue, finder: &FileFinder) -> Result<Self, ContractError> {
        let args: PairedCodesArgs = parse_component_args("PairedCodesEnhancer", args)?;
        let files = args.rules_csv.into_vec();
        let mut rules = Vec::new();
        for row in read_rules_csv(&files, finder, &args.rule_types)? {
            let code = rule_f64(&row, "value")?;
            rules.push((
                code,
                PairedCodeRule {
                    category: row.get("type").cloned().unwrap_or_default(),
                    name: row.get("name").cloned().unwrap_or_default(),
                    base: rule_f64(&row, "base")?,
                    min: rule_f64(&row, "min")?,
                    max: rule_f64(&row, "max")?,
                    scale: rule_f64(&row, "scale")?,
                },
            ));
        }
        Ok(Self { buffer_name: args.buffer_name, value_index: args.value_index, rules })
    }
}

impl Enhancer for PairedCodesEnhancer {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let Some(events) = trial.numeric_events.get(&self.buffer_name).cloned() else {
            return Ok(());
        };
        for (code, rule) in &self.rules {
            let property_times = events.times_of(*code, self.value_index, None, None);
            if property_times.is_empty() {
                continue;
            }
            let mut value_list =
                events.copy_value_range(Some(rule.min), Some(rule.max), self.value_index);
            value_list.apply_offset_then_gain(-rule.base, rule.scale, self.value_index);
            for property_time in property_times {
                // Pick the soonest value event at or after the property code.
                let values = value_list.values(self.value_index, Some(property_time), None);
                if let Some(value) = values.first() {
                    trial.add_enhancement(&rule.name, json_f64(*value), &rule.category);
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct EventTimesArgs {
    buffer_name: String,
    rules_csv: OneOrMany,
    #[serde(default)]
    value_index: usize,
    #[serde(default = "default_time_rule_types")]
    rule_types: Vec<String>,
}

fn default_time_rule_types() -> Vec<String> {
    vec!["time".to_string()]
}

/// Record the times at which named event codes occurred during the trial.
pub struct EventTimesEnhancer {
    buffer_name: String,
    value_index: usize,
    rules: Vec<(f64, String, String)>,
}

impl EventTimesEnhancer {
    pub fn from_args(args: &JsonValue, finder: &FileFinder) -> Result<Self, ContractError> {
        let args: EventTimesArgs = parse_component_args("EventTimesEnhancer", args)?;
        let files = args.rules_csv.into_vec();
        let mut rules = Vec::new();
        for row in read_rules_csv(&files, finder, &args.rule_types)? {
            rules.push((
                rule_f64(&row, "value")?,
                row.get("name").cloned().unwrap_or_default(),
                row.get("type").cloned().unwrap_or_default(),
            ));
        }
        Ok(Self { buffer_name: args.buffer_name, value_index: args.value_index, rules })
    }
}

impl Enhancer for EventTimesEnhancer {
    fn enhance(
        &mut self,
        trial: &mut Trial,
        _trial_number: usize,
        _experiment: &JsonMap<String, JsonValue>,
        _subject: &JsonMap<String, JsonValue>,
    ) -> Result<(), ContractError> {
        let Some(events) = trial.numeric_events.get(&self.buffer_name).cloned() else {
            return Ok(());
        };
        for (code, name, category) in &self.rules {
            let times = events.times_of(*code, self.value_index, None, None);
            trial.add_enhancement(
                name,
                JsonValue::Array(times.into_iter().map(json_f64).collect()),
                category,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{BufferData, NumericEvents, SignalChunk};
    use serde_json::json;
    use std::io::Write;

    fn enhance(enhancer: &mut dyn Enhancer, trial: &mut Trial) {
        enhancer
            .enhance(trial, 0, &JsonMap::new(), &JsonMap::new())
            .unwrap();
    }

    #[test]
    fn duration_for_bounded_and_final_trials() {
        let mut enhancer = TrialDurationEnhancer::default();
        let mut trial = Trial::new(1.0, Some(3.5));
        enhance(&mut enhancer, &mut trial);
        assert_eq!(trial.enhancements["duration"], json!(2.5));
        assert_eq!(trial.enhancement_categories["value"], vec!["duration"]);

        let mut last = Trial::new(3.5, None);
        enhance(&mut enhancer, &mut last);
        assert_eq!(last.enhancements["duration"], JsonValue::Null);
    }

    #[test]
    fn expression_enhancer_stores_result_or_default() {
        let mut enhancer = ExpressionEnhancer::from_args(&json!({
            "expression": "duration * 2",
            "value_name": "double_duration",
            "default_value": -1.0
        }))
        .unwrap();
        let mut trial = Trial::new(0.0, Some(2.0));
        trial.add_enhancement("duration", json!(2.0), "value");
        enhance(&mut enhancer, &mut trial);
        assert_eq!(trial.enhancements["double_duration"], json!(4.0));

        // Missing inputs fall back to the default.
        let mut empty = Trial::new(0.0, None);
        enhance(&mut enhancer, &mut empty);
        assert_eq!(empty.enhancements["double_duration"], json!(-1.0));
    }

    #[test]
    fn smoother_replaces_channel_with_boxcar() {
        let mut enhancer = SignalSmoother::from_args(&json!({
            "buffer_name": "sig",
            "kernel_size": 2
        }))
        .unwrap();
        let mut trial = Trial::new(0.0, None);
        trial.add_buffer_data(
            "sig",
            BufferData::Signal(SignalChunk::new(
                vec![vec![0.0], vec![2.0], vec![4.0], vec![6.0]],
                10.0,
                0.0,
                vec!["ch0".into()],
            )),
        );
        enhance(&mut enhancer, &mut trial);
        let smoothed: Vec<f64> =
            trial.signals["sig"].sample_data.iter().map(|r| r[0]).collect();
        // Uniform kernel of 2 with zero padding: [0, 1, 3, 5].
        assert_eq!(smoothed, vec![0.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn smoother_skips_short_signals() {
        let mut enhancer = SignalSmoother::from_args(&json!({
            "buffer_name": "sig",
            "kernel_size": 10
        }))
        .unwrap();
        let mut trial = Trial::new(0.0, None);
        trial.add_buffer_data(
            "sig",
            BufferData::Signal(SignalChunk::new(vec![vec![5.0]], 10.0, 0.0, vec!["ch0".into()])),
        );
        enhance(&mut enhancer, &mut trial);
        assert_eq!(trial.signals["sig"].sample_data, vec![vec![5.0]]);
    }

    fn write_rules(content: &str) -> (tempfile::TempDir, String) {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("rules.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        let path = path.to_string_lossy().to_string();
        (dir, path)
    }

    #[test]
    fn paired_codes_decode_property_values() {
        let (_dir, rules) = write_rules(
            "type,value,name,base,min,max,scale,comment\n\
             id,1010,fp_on,7000,7000,8000,0.1,fixation point\n",
        );
        let mut enhancer = PairedCodesEnhancer::from_args(
            &json!({"buffer_name": "ecodes", "rules_csv": rules}),
            &FileFinder::default(),
        )
        .unwrap();
        let mut trial = Trial::new(0.0, Some(1.0));
        trial.add_buffer_data(
            "ecodes",
            BufferData::NumericEvents(NumericEvents::new(vec![
                vec![0.1, 1010.0],
                vec![0.2, 7345.0],
            ])),
        );
        enhance(&mut enhancer, &mut trial);
        // (7345 - 7000) * 0.1 = 34.5
        assert_eq!(trial.enhancements["fp_on"], json!(34.5));
        assert_eq!(trial.enhancement_categories["id"], vec!["fp_on"]);
    }

    #[test]
    fn event_times_collect_occurrences() {
        let (_dir, rules) = write_rules(
            "type,value,name\n\
             time,42,wrt_flash\n",
        );
        let mut enhancer = EventTimesEnhancer::from_args(
            &json!({"buffer_name": "ecodes", "rules_csv": rules}),
            &FileFinder::default(),
        )
        .unwrap();
        let mut trial = Trial::new(0.0, Some(3.0));
        trial.add_buffer_data(
            "ecodes",
            BufferData::NumericEvents(NumericEvents::new(vec![
                vec![0.5, 42.0],
                vec![1.0, 7.0],
                vec![2.5, 42.0],
            ])),
        );
        enhance(&mut enhancer, &mut trial);
        assert_eq!(trial.enhancements["wrt_flash"], json!([0.5, 2.5]));
        assert_eq!(trial.enhancement_categories["time"], vec!["wrt_flash"]);
    }
}
