//! Text-based trial file: one line of JSON per trial ("JSON Lines").
//!
//! The file is reopened for each append so a well-formed file is left on
//! disk after every trial. A crashed run leaves at most one unterminated
//! line, which readers discard. NaN and infinities are written as `null`;
//! object keys are sorted, so identical runs produce byte-identical output.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{debug, info, warn};

use contracts::{
    json_f64, ContractError, NumericEvents, SignalChunk, TextEvents, Trial, TrialSink,
};

#[derive(Debug)]
pub struct JsonTrialFile {
    path: PathBuf,
    pending_rewrites: BTreeMap<usize, String>,
}

impl JsonTrialFile {
    /// Create a new, empty trial file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let path = path.as_ref().to_path_buf();
        File::create(&path)
            .map_err(|e| ContractError::sink_creation(path.display().to_string(), e.to_string()))?;
        info!(path = %path.display(), "created empty json trial file");
        Ok(Self { path, pending_rewrites: BTreeMap::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Serialize one trial to its JSON object form.
    pub fn dump_trial(trial: &Trial) -> JsonValue {
        let mut object = JsonMap::new();
        object.insert("start_time".into(), json_f64(trial.start_time));
        object.insert("end_time".into(), trial.end_time.map_or(JsonValue::Null, json_f64));
        object.insert("wrt_time".into(), json_f64(trial.wrt_time));

        if !trial.numeric_events.is_empty() {
            let events: JsonMap<String, JsonValue> = trial
                .numeric_events
                .iter()
                .map(|(name, list)| (name.clone(), dump_numeric_events(list)))
                .collect();
            object.insert("numeric_events".into(), JsonValue::Object(events));
        }
        if !trial.text_events.is_empty() {
            let events: JsonMap<String, JsonValue> = trial
                .text_events
                .iter()
                .map(|(name, list)| (name.clone(), dump_text_events(list)))
                .collect();
            object.insert("text_events".into(), JsonValue::Object(events));
        }
        if !trial.signals.is_empty() {
            let signals: JsonMap<String, JsonValue> = trial
                .signals
                .iter()
                .map(|(name, chunk)| (name.clone(), dump_signal_chunk(chunk)))
                .collect();
            object.insert("signals".into(), JsonValue::Object(signals));
        }
        if !trial.enhancements.is_empty() {
            object.insert(
                "enhancements".into(),
                JsonValue::Object(trial.enhancements.clone().into_iter().collect()),
            );
        }
        if !trial.enhancement_categories.is_empty() {
            let categories: JsonMap<String, JsonValue> = trial
                .enhancement_categories
                .iter()
                .map(|(category, names)| {
                    (
                        category.clone(),
                        JsonValue::Array(
                            names.iter().map(|n| JsonValue::String(n.clone())).collect(),
                        ),
                    )
                })
                .collect();
            object.insert("enhancement_categories".into(), JsonValue::Object(categories));
        }
        JsonValue::Object(object)
    }

    /// Rebuild one trial from its JSON object form.
    pub fn load_trial(value: &JsonValue) -> Result<Trial, ContractError> {
        let object = value
            .as_object()
            .ok_or_else(|| ContractError::Other("trial line is not a json object".into()))?;
        let mut trial = Trial::new(
            field_f64(object, "start_time")?,
            object.get("end_time").and_then(JsonValue::as_f64),
        );
        trial.wrt_time = field_f64(object, "wrt_time")?;

        if let Some(events) = object.get("numeric_events").and_then(JsonValue::as_object) {
            for (name, data) in events {
                trial.numeric_events.insert(name.clone(), load_numeric_events(data)?);
            }
        }
        if let Some(events) = object.get("text_events").and_then(JsonValue::as_object) {
            for (name, data) in events {
                trial.text_events.insert(name.clone(), load_text_events(data)?);
            }
        }
        if let Some(signals) = object.get("signals").and_then(JsonValue::as_object) {
            for (name, data) in signals {
                trial.signals.insert(name.clone(), load_signal_chunk(data)?);
            }
        }
        if let Some(enhancements) = object.get("enhancements").and_then(JsonValue::as_object) {
            trial.enhancements =
                enhancements.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        if let Some(categories) =
            object.get("enhancement_categories").and_then(JsonValue::as_object)
        {
            for (category, names) in categories {
                let names: Vec<String> = names
                    .as_array()
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(|n| n.as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                trial.enhancement_categories.insert(category.clone(), names);
            }
        }
        Ok(trial)
    }

    /// Read every complete trial line from a file, in order.
    ///
    /// A final line without a trailing newline is a partially written trial
    /// from a crashed run and is discarded.
    pub fn read_trials(path: impl AsRef<Path>) -> Result<Vec<Trial>, ContractError> {
        let path = path.as_ref();
        let mut reader = BufReader::new(File::open(path)?);
        let mut trials = Vec::new();
        let mut line = String::new();
        loop {
            line.clear();
            let bytes = reader.read_line(&mut line)?;
            if bytes == 0 {
                break;
            }
            if !line.ends_with('\n') {
                warn!(path = %path.display(), "discarding partially written final trial line");
                break;
            }
            let value: JsonValue = serde_json::from_str(line.trim_end()).map_err(|e| {
                ContractError::Other(format!("bad trial line in {}: {e}", path.display()))
            })?;
            trials.push(Self::load_trial(&value)?);
        }
        Ok(trials)
    }

    fn append_line(&self, line: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().append(true).create(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        Ok(())
    }

    /// Apply pending rewrites in one streaming pass over the file.
    fn apply_rewrites(&mut self) -> Result<(), ContractError> {
        if self.pending_rewrites.is_empty() {
            return Ok(());
        }
        let temp_path = self.path.with_extension("rewrite.tmp");
        {
            let mut reader = BufReader::new(File::open(&self.path)?);
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            let mut line = String::new();
            let mut index = 0usize;
            loop {
                line.clear();
                if reader.read_line(&mut line)? == 0 {
                    break;
                }
                if !line.ends_with('\n') {
                    break;
                }
                match self.pending_rewrites.get(&index) {
                    Some(replacement) => {
                        writer.write_all(replacement.as_bytes())?;
                        writer.write_all(b"\n")?;
                    }
                    None => writer.write_all(line.as_bytes())?,
                }
                index += 1;
            }
            writer.flush()?;
        }
        std::fs::rename(&temp_path, &self.path)?;
        debug!(
            path = %self.path.display(),
            rewritten = self.pending_rewrites.len(),
            "applied trial rewrites"
        );
        self.pending_rewrites.clear();
        Ok(())
    }
}

impl TrialSink for JsonTrialFile {
    fn name(&self) -> &str {
        "json_trial_file"
    }

    async fn append(&mut self, _trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        let line = serde_json::to_string(&Self::dump_trial(trial))
            .map_err(|e| ContractError::sink_write(self.name(), e.to_string()))?;
        self.append_line(&line)
            .map_err(|e| ContractError::sink_write(self.name(), e.to_string()))
    }

    async fn rewrite(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        let line = serde_json::to_string(&Self::dump_trial(trial))
            .map_err(|e| ContractError::sink_write(self.name(), e.to_string()))?;
        self.pending_rewrites.insert(trial_number, line);
        Ok(())
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        self.apply_rewrites()
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        self.apply_rewrites()
    }
}

fn field_f64(object: &JsonMap<String, JsonValue>, key: &str) -> Result<f64, ContractError> {
    object
        .get(key)
        .and_then(JsonValue::as_f64)
        .ok_or_else(|| ContractError::Other(format!("trial line missing '{key}'")))
}

fn dump_numeric_events(events: &NumericEvents) -> JsonValue {
    JsonValue::Array(
        events
            .event_data
            .iter()
            .map(|row| JsonValue::Array(row.iter().map(|v| json_f64(*v)).collect()))
            .collect(),
    )
}

fn load_numeric_events(value: &JsonValue) -> Result<NumericEvents, ContractError> {
    let rows = value
        .as_array()
        .ok_or_else(|| ContractError::Other("numeric events are not an array".into()))?;
    let event_data = rows
        .iter()
        .map(|row| {
            row.as_array()
                .map(|cells| cells.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
                .ok_or_else(|| ContractError::Other("numeric event row is not an array".into()))
        })
        .collect::<Result<Vec<Vec<f64>>, _>>()?;
    Ok(NumericEvents::new(event_data))
}

fn dump_text_events(events: &TextEvents) -> JsonValue {
    let mut object = JsonMap::new();
    object.insert(
        "timestamp_data".into(),
        JsonValue::Array(events.timestamp_data.iter().map(|t| json_f64(*t)).collect()),
    );
    object.insert(
        "text_data".into(),
        JsonValue::Array(events.text_data.iter().map(|t| JsonValue::String(t.clone())).collect()),
    );
    JsonValue::Object(object)
}

fn load_text_events(value: &JsonValue) -> Result<TextEvents, ContractError> {
    let object = value
        .as_object()
        .ok_or_else(|| ContractError::Other("text events are not an object".into()))?;
    let timestamp_data = object
        .get("timestamp_data")
        .and_then(JsonValue::as_array)
        .map(|items| items.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect())
        .unwrap_or_default();
    let text_data = object
        .get("text_data")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect()
        })
        .unwrap_or_default();
    Ok(TextEvents::new(timestamp_data, text_data))
}

fn dump_signal_chunk(chunk: &SignalChunk) -> JsonValue {
    let mut object = JsonMap::new();
    object.insert(
        "signal_data".into(),
        JsonValue::Array(
            chunk
                .sample_data
                .iter()
                .map(|row| JsonValue::Array(row.iter().map(|v| json_f64(*v)).collect()))
                .collect(),
        ),
    );
    object.insert("sample_frequency".into(), json_f64(chunk.sample_frequency));
    object.insert("first_sample_time".into(), json_f64(chunk.first_sample_time));
    object.insert(
        "channel_ids".into(),
        JsonValue::Array(
            chunk.channel_ids.iter().map(|id| JsonValue::String(id.clone())).collect(),
        ),
    );
    JsonValue::Object(object)
}

fn load_signal_chunk(value: &JsonValue) -> Result<SignalChunk, ContractError> {
    let object = value
        .as_object()
        .ok_or_else(|| ContractError::Other("signal chunk is not an object".into()))?;
    let sample_data = object
        .get("signal_data")
        .and_then(JsonValue::as_array)
        .map(|rows| {
            rows.iter()
                .map(|row| {
                    row.as_array()
                        .map(|cells| {
                            cells.iter().map(|v| v.as_f64().unwrap_or(f64::NAN)).collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default();
    let channel_ids = object
        .get("channel_ids")
        .and_then(JsonValue::as_array)
        .map(|items| {
            items.iter().map(|v| v.as_str().unwrap_or_default().to_string()).collect()
        })
        .unwrap_or_default();
    Ok(SignalChunk::new(
        sample_data,
        object.get("sample_frequency").and_then(JsonValue::as_f64).unwrap_or(1.0),
        object.get("first_sample_time").and_then(JsonValue::as_f64).unwrap_or(0.0),
        channel_ids,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::BufferData;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample_trial() -> Trial {
        let mut trial = Trial::new(1.0, Some(2.0));
        trial.wrt_time = 1.5;
        trial.add_buffer_data(
            "bar",
            BufferData::NumericEvents(NumericEvents::new(vec![vec![-0.4, 0.0]])),
        );
        trial.add_buffer_data(
            "foo",
            BufferData::TextEvents(TextEvents::new(
                vec![-0.3, -0.2],
                vec!["red".into(), "green".into()],
            )),
        );
        trial.add_buffer_data(
            "sig",
            BufferData::Signal(SignalChunk::new(
                vec![vec![0.5, -0.5]],
                10.0,
                -1.0,
                vec!["sin".into(), "cos".into()],
            )),
        );
        trial.add_enhancement("duration", json!(1.0), "value");
        trial
    }

    #[tokio::test]
    async fn append_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.json");
        let mut sink = JsonTrialFile::create(&path).unwrap();
        let trial = sample_trial();
        sink.append(0, &trial).await.unwrap();
        sink.append(1, &Trial::new(2.0, None)).await.unwrap();
        sink.close().await.unwrap();

        let read_back = JsonTrialFile::read_trials(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert_eq!(read_back[0], trial);
        assert_eq!(read_back[1].end_time, None);
    }

    #[tokio::test]
    async fn partial_final_line_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.jsonl");
        let mut sink = JsonTrialFile::create(&path).unwrap();
        sink.append(0, &Trial::new(0.0, Some(1.0))).await.unwrap();
        // Simulate a crash mid-write.
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"start_time\": 1.0, \"end").unwrap();
        drop(file);

        let read_back = JsonTrialFile::read_trials(&path).unwrap();
        assert_eq!(read_back.len(), 1);
    }

    #[tokio::test]
    async fn rewrites_apply_on_flush() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.json");
        let mut sink = JsonTrialFile::create(&path).unwrap();
        sink.append(0, &Trial::new(0.0, Some(1.0))).await.unwrap();
        sink.append(1, &Trial::new(1.0, Some(2.0))).await.unwrap();

        let mut revised = Trial::new(1.0, Some(2.0));
        revised.add_enhancement("percent_complete", json!(100.0), "value");
        sink.rewrite(1, &revised).await.unwrap();
        sink.flush().await.unwrap();

        let read_back = JsonTrialFile::read_trials(&path).unwrap();
        assert_eq!(read_back.len(), 2);
        assert!(read_back[0].enhancements.is_empty());
        assert_eq!(read_back[1].enhancements["percent_complete"], json!(100.0));
    }

    #[test]
    fn non_finite_values_become_null() {
        let mut trial = Trial::new(0.0, None);
        trial.add_buffer_data(
            "bad",
            BufferData::NumericEvents(NumericEvents::new(vec![vec![0.1, f64::NAN]])),
        );
        let dumped = JsonTrialFile::dump_trial(&trial);
        assert_eq!(dumped["numeric_events"]["bad"][0][1], JsonValue::Null);
        assert_eq!(dumped["end_time"], JsonValue::Null);
    }

    #[test]
    fn dump_is_deterministic() {
        let trial = sample_trial();
        let a = serde_json::to_string(&JsonTrialFile::dump_trial(&trial)).unwrap();
        let b = serde_json::to_string(&JsonTrialFile::dump_trial(&trial)).unwrap();
        assert_eq!(a, b);
        // Keys are sorted for byte-stable output.
        assert!(a.find("\"end_time\"").unwrap() < a.find("\"start_time\"").unwrap());
    }
}
