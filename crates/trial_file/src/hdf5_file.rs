//! HDF5 trial file: one top-level group per trial, named by zero-padded
//! index so lexical order is trial order.
//!
//! Layout per group: `start_time` / `end_time` / `wrt_time` attributes
//! (an empty-shaped attribute encodes the missing final end time),
//! JSON-encoded `enhancements` and `enhancement_categories` attributes, and
//! `numeric_events` / `text_events` / `signals` subgroups holding per-name
//! datasets. The file is opened per call so every append leaves a
//! well-formed file on disk.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use hdf5::types::VarLenUnicode;
use hdf5::{File as H5File, Group};
use ndarray::{Array1, Array2};
use serde_json::Value as JsonValue;
use tracing::info;

use contracts::{ContractError, NumericEvents, SignalChunk, TextEvents, Trial, TrialSink};

pub struct Hdf5TrialFile {
    path: PathBuf,
}

fn h5err(e: impl std::fmt::Display) -> ContractError {
    ContractError::sink_write("hdf5_trial_file", e.to_string())
}

fn unicode(s: &str) -> Result<VarLenUnicode, ContractError> {
    VarLenUnicode::from_str(s).map_err(h5err)
}

impl Hdf5TrialFile {
    /// Create a new, empty trial file, truncating any existing one.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let path = path.as_ref().to_path_buf();
        H5File::create(&path)
            .map_err(|e| ContractError::sink_creation(path.display().to_string(), e.to_string()))?;
        info!(path = %path.display(), "created empty hdf5 trial file");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn group_name(trial_number: usize) -> String {
        format!("trial_{trial_number:04}")
    }

    fn dump_trial(&self, group: &Group, trial: &Trial) -> Result<(), ContractError> {
        write_f64_attr(group, "start_time", Some(trial.start_time))?;
        write_f64_attr(group, "end_time", trial.end_time)?;
        write_f64_attr(group, "wrt_time", Some(trial.wrt_time))?;

        if !trial.numeric_events.is_empty() {
            let events_group = group.create_group("numeric_events").map_err(h5err)?;
            for (name, events) in &trial.numeric_events {
                write_rows(&events_group, name, &events.event_data)?;
            }
        }
        if !trial.text_events.is_empty() {
            let events_group = group.create_group("text_events").map_err(h5err)?;
            for (name, events) in &trial.text_events {
                write_text_events(&events_group, name, events)?;
            }
        }
        if !trial.signals.is_empty() {
            let signals_group = group.create_group("signals").map_err(h5err)?;
            for (name, chunk) in &trial.signals {
                write_signal_chunk(&signals_group, name, chunk)?;
            }
        }
        if !trial.enhancements.is_empty() {
            let json = serde_json::to_string(&trial.enhancements).map_err(h5err)?;
            write_string_attr(group, "enhancements", &json)?;
        }
        if !trial.enhancement_categories.is_empty() {
            let json = serde_json::to_string(&trial.enhancement_categories).map_err(h5err)?;
            write_string_attr(group, "enhancement_categories", &json)?;
        }
        Ok(())
    }

    fn load_trial(group: &Group) -> Result<Trial, ContractError> {
        let start_time = read_f64_attr(group, "start_time")?
            .ok_or_else(|| h5err("trial group missing start_time (truncated write)"))?;
        let mut trial = Trial::new(start_time, read_f64_attr(group, "end_time")?);
        trial.wrt_time = read_f64_attr(group, "wrt_time")?
            .ok_or_else(|| h5err("trial group missing wrt_time (truncated write)"))?;

        if let Ok(events_group) = group.group("numeric_events") {
            for name in events_group.member_names().map_err(h5err)? {
                let rows = read_rows(&events_group, &name)?;
                trial.numeric_events.insert(name, NumericEvents::new(rows));
            }
        }
        if let Ok(events_group) = group.group("text_events") {
            for name in events_group.member_names().map_err(h5err)? {
                let events = read_text_events(&events_group, &name)?;
                trial.text_events.insert(name, events);
            }
        }
        if let Ok(signals_group) = group.group("signals") {
            for name in signals_group.member_names().map_err(h5err)? {
                let chunk = read_signal_chunk(&signals_group, &name)?;
                trial.signals.insert(name, chunk);
            }
        }
        if let Some(json) = read_string_attr(group, "enhancements")? {
            trial.enhancements = serde_json::from_str(&json).map_err(h5err)?;
        }
        if let Some(json) = read_string_attr(group, "enhancement_categories")? {
            trial.enhancement_categories = serde_json::from_str(&json).map_err(h5err)?;
        }
        Ok(trial)
    }

    /// Read every trial group, in index order. Groups missing required
    /// attributes are treated as a truncated tail and end the sequence.
    pub fn read_trials(path: impl AsRef<Path>) -> Result<Vec<Trial>, ContractError> {
        let file = H5File::open(path.as_ref()).map_err(h5err)?;
        let mut names = file.member_names().map_err(h5err)?;
        names.sort();
        let mut trials = Vec::new();
        for name in names {
            let group = file.group(&name).map_err(h5err)?;
            match Self::load_trial(&group) {
                Ok(trial) => trials.push(trial),
                Err(_) => break,
            }
        }
        Ok(trials)
    }
}

impl TrialSink for Hdf5TrialFile {
    fn name(&self) -> &str {
        "hdf5_trial_file"
    }

    async fn append(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        let file = H5File::append(&self.path).map_err(h5err)?;
        let group = file.create_group(&Self::group_name(trial_number)).map_err(h5err)?;
        self.dump_trial(&group, trial)
    }

    async fn rewrite(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        let file = H5File::append(&self.path).map_err(h5err)?;
        let name = Self::group_name(trial_number);
        if file.link_exists(&name) {
            file.unlink(&name).map_err(h5err)?;
        }
        let group = file.create_group(&name).map_err(h5err)?;
        self.dump_trial(&group, trial)
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        Ok(())
    }
}

fn write_f64_attr(group: &Group, name: &str, value: Option<f64>) -> Result<(), ContractError> {
    match value {
        Some(value) => {
            let attr = group.new_attr::<f64>().create(name).map_err(h5err)?;
            attr.write_scalar(&value).map_err(h5err)
        }
        None => {
            // Empty shape encodes "no value", like an empty array.
            group.new_attr::<f64>().shape([0, 0]).create(name).map_err(h5err)?;
            Ok(())
        }
    }
}

fn read_f64_attr(group: &Group, name: &str) -> Result<Option<f64>, ContractError> {
    let attr = match group.attr(name) {
        Ok(attr) => attr,
        Err(_) => return Ok(None),
    };
    if attr.size() < 1 {
        return Ok(None);
    }
    attr.read_scalar::<f64>().map(Some).map_err(h5err)
}

fn write_string_attr(group: &Group, name: &str, value: &str) -> Result<(), ContractError> {
    let attr = group.new_attr::<VarLenUnicode>().create(name).map_err(h5err)?;
    attr.write_scalar(&unicode(value)?).map_err(h5err)
}

fn read_string_attr(group: &Group, name: &str) -> Result<Option<String>, ContractError> {
    let attr = match group.attr(name) {
        Ok(attr) => attr,
        Err(_) => return Ok(None),
    };
    let value = attr.read_scalar::<VarLenUnicode>().map_err(h5err)?;
    Ok(Some(value.as_str().to_string()))
}

fn to_array2(rows: &[Vec<f64>]) -> Result<Array2<f64>, ContractError> {
    let height = rows.len();
    let width = rows.first().map_or(0, Vec::len);
    let flat: Vec<f64> = rows.iter().flat_map(|row| row.iter().copied()).collect();
    Array2::from_shape_vec((height, width), flat).map_err(h5err)
}

fn write_rows(group: &Group, name: &str, rows: &[Vec<f64>]) -> Result<(), ContractError> {
    let array = to_array2(rows)?;
    let builder = group.new_dataset_builder().with_data(&array);
    let builder = if array.len() > 1 { builder.deflate(4) } else { builder };
    builder.create(name).map_err(h5err)?;
    Ok(())
}

fn read_rows(group: &Group, name: &str) -> Result<Vec<Vec<f64>>, ContractError> {
    let dataset = group.dataset(name).map_err(h5err)?;
    let array = dataset.read_2d::<f64>().map_err(h5err)?;
    Ok(array.rows().into_iter().map(|row| row.to_vec()).collect())
}

fn write_text_events(group: &Group, name: &str, events: &TextEvents) -> Result<(), ContractError> {
    let subgroup = group.create_group(name).map_err(h5err)?;
    let timestamps = Array1::from(events.timestamp_data.clone());
    subgroup
        .new_dataset_builder()
        .with_data(&timestamps)
        .create("timestamp_data")
        .map_err(h5err)?;
    let texts: Vec<VarLenUnicode> = events
        .text_data
        .iter()
        .map(|text| unicode(text))
        .collect::<Result<_, _>>()?;
    let texts = Array1::from(texts);
    subgroup
        .new_dataset_builder()
        .with_data(&texts)
        .create("text_data")
        .map_err(h5err)?;
    Ok(())
}

fn read_text_events(group: &Group, name: &str) -> Result<TextEvents, ContractError> {
    let subgroup = group.group(name).map_err(h5err)?;
    let timestamps = subgroup
        .dataset("timestamp_data")
        .map_err(h5err)?
        .read_1d::<f64>()
        .map_err(h5err)?;
    let texts = subgroup
        .dataset("text_data")
        .map_err(h5err)?
        .read_1d::<VarLenUnicode>()
        .map_err(h5err)?;
    Ok(TextEvents::new(
        timestamps.to_vec(),
        texts.iter().map(|text| text.as_str().to_string()).collect(),
    ))
}

fn write_signal_chunk(group: &Group, name: &str, chunk: &SignalChunk) -> Result<(), ContractError> {
    let array = to_array2(&chunk.sample_data)?;
    let builder = group.new_dataset_builder().with_data(&array);
    let builder = if array.len() > 1 { builder.deflate(4) } else { builder };
    let dataset = builder.create(name).map_err(h5err)?;

    dataset
        .new_attr::<f64>()
        .create("sample_frequency")
        .map_err(h5err)?
        .write_scalar(&chunk.sample_frequency)
        .map_err(h5err)?;
    dataset
        .new_attr::<f64>()
        .create("first_sample_time")
        .map_err(h5err)?
        .write_scalar(&chunk.first_sample_time)
        .map_err(h5err)?;
    let ids: Vec<VarLenUnicode> = chunk
        .channel_ids
        .iter()
        .map(|id| unicode(id))
        .collect::<Result<_, _>>()?;
    let ids = Array1::from(ids);
    dataset
        .new_attr::<VarLenUnicode>()
        .shape(ids.len())
        .create("channel_ids")
        .map_err(h5err)?
        .write(&ids)
        .map_err(h5err)?;
    Ok(())
}

fn read_signal_chunk(group: &Group, name: &str) -> Result<SignalChunk, ContractError> {
    let dataset = group.dataset(name).map_err(h5err)?;
    let array = dataset.read_2d::<f64>().map_err(h5err)?;
    let sample_frequency = dataset
        .attr("sample_frequency")
        .map_err(h5err)?
        .read_scalar::<f64>()
        .map_err(h5err)?;
    let first_sample_time = dataset
        .attr("first_sample_time")
        .map_err(h5err)?
        .read_scalar::<f64>()
        .map_err(h5err)?;
    let ids = dataset
        .attr("channel_ids")
        .map_err(h5err)?
        .read_1d::<VarLenUnicode>()
        .map_err(h5err)?;
    Ok(SignalChunk::new(
        array.rows().into_iter().map(|row| row.to_vec()).collect(),
        sample_frequency,
        first_sample_time,
        ids.iter().map(|id| id.as_str().to_string()).collect(),
    ))
}
