//! # Trial File
//!
//! Durable, append-only trial record sinks, chosen by file extension:
//!
//! - `.json` / `.jsonl`: one trial per line of JSON
//! - `.h5` / `.hdf5` / `.hdf` / `.he5`: one HDF5 group per trial
//!   (cargo feature `hdf5`)
//!
//! Both formats are crash-consistent: a partially written trial is
//! detectable on read and skipped. `RetryingTrialWriter` adds the error
//! policy: one retry per write, then fatal-after-drain to a secondary
//! recovery path.

#[cfg(feature = "hdf5")]
mod hdf5_file;
mod json_file;
mod writer;

use std::path::Path;

use contracts::{ContractError, Trial, TrialSink};

#[cfg(feature = "hdf5")]
pub use hdf5_file::Hdf5TrialFile;
pub use json_file::JsonTrialFile;
pub use writer::RetryingTrialWriter;

const JSON_SUFFIXES: [&str; 2] = ["json", "jsonl"];
const HDF5_SUFFIXES: [&str; 4] = ["h5", "hdf5", "hdf", "he5"];

/// A trial sink dispatched by file extension.
#[derive(Debug)]
pub enum TrialFileSink {
    Json(JsonTrialFile),
    #[cfg(feature = "hdf5")]
    Hdf5(Hdf5TrialFile),
}

impl TrialFileSink {
    /// Create a new, empty trial file for the given path.
    pub fn for_path(path: impl AsRef<Path>) -> Result<Self, ContractError> {
        let path = path.as_ref();
        let suffix = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if JSON_SUFFIXES.contains(&suffix.as_str()) {
            return Ok(TrialFileSink::Json(JsonTrialFile::create(path)?));
        }
        if HDF5_SUFFIXES.contains(&suffix.as_str()) {
            #[cfg(feature = "hdf5")]
            return Ok(TrialFileSink::Hdf5(Hdf5TrialFile::create(path)?));
            #[cfg(not(feature = "hdf5"))]
            return Err(ContractError::sink_creation(
                path.display().to_string(),
                "hdf5 trial files require the 'hdf5' cargo feature",
            ));
        }
        Err(ContractError::sink_creation(
            path.display().to_string(),
            format!("unsupported trial file suffix: .{suffix}"),
        ))
    }
}

impl TrialSink for TrialFileSink {
    fn name(&self) -> &str {
        match self {
            TrialFileSink::Json(sink) => sink.name(),
            #[cfg(feature = "hdf5")]
            TrialFileSink::Hdf5(sink) => sink.name(),
        }
    }

    async fn append(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        match self {
            TrialFileSink::Json(sink) => sink.append(trial_number, trial).await,
            #[cfg(feature = "hdf5")]
            TrialFileSink::Hdf5(sink) => sink.append(trial_number, trial).await,
        }
    }

    async fn rewrite(&mut self, trial_number: usize, trial: &Trial) -> Result<(), ContractError> {
        match self {
            TrialFileSink::Json(sink) => sink.rewrite(trial_number, trial).await,
            #[cfg(feature = "hdf5")]
            TrialFileSink::Hdf5(sink) => sink.rewrite(trial_number, trial).await,
        }
    }

    async fn flush(&mut self) -> Result<(), ContractError> {
        match self {
            TrialFileSink::Json(sink) => sink.flush().await,
            #[cfg(feature = "hdf5")]
            TrialFileSink::Hdf5(sink) => sink.flush().await,
        }
    }

    async fn close(&mut self) -> Result<(), ContractError> {
        match self {
            TrialFileSink::Json(sink) => sink.close().await,
            #[cfg(feature = "hdf5")]
            TrialFileSink::Hdf5(sink) => sink.close().await,
        }
    }
}

/// Read back a whole trial file, dispatched by extension.
pub fn read_trials(path: impl AsRef<Path>) -> Result<Vec<Trial>, ContractError> {
    let path = path.as_ref();
    let suffix = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if JSON_SUFFIXES.contains(&suffix.as_str()) {
        return JsonTrialFile::read_trials(path);
    }
    #[cfg(feature = "hdf5")]
    if HDF5_SUFFIXES.contains(&suffix.as_str()) {
        return Hdf5TrialFile::read_trials(path);
    }
    Err(ContractError::sink_creation(
        path.display().to_string(),
        format!("unsupported trial file suffix: .{suffix}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_suffix_is_a_sink_error() {
        let err = TrialFileSink::for_path("trials.parquet").unwrap_err();
        assert!(matches!(err, ContractError::SinkCreation { .. }));
    }

    #[tokio::test]
    async fn json_suffixes_create_json_sinks() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = TrialFileSink::for_path(&path).unwrap();
        assert!(matches!(sink, TrialFileSink::Json(_)));
        assert!(path.exists());
    }
}
