//! Retrying writer wrapper: one retry per write, then fatal-after-drain.

use std::path::{Path, PathBuf};

use tracing::{error, warn};

use contracts::{ContractError, Trial, TrialSink};

use crate::{JsonTrialFile, TrialFileSink};

/// Wraps the configured sink with the sink error policy.
///
/// A failed write is retried once. On the second failure the run is doomed
/// to a non-zero exit, but remaining in-flight trials are drained to a
/// secondary JSON recovery file next to the original so no data is lost.
pub struct RetryingTrialWriter {
    sink: TrialFileSink,
    recovery_path: PathBuf,
    recovery: Option<JsonTrialFile>,
    first_error: Option<String>,
    pub retries: u64,
}

impl RetryingTrialWriter {
    pub fn new(sink: TrialFileSink, trial_file_path: &Path) -> Self {
        let mut recovery_name = trial_file_path.as_os_str().to_owned();
        recovery_name.push(".recovery.jsonl");
        Self {
            sink,
            recovery_path: PathBuf::from(recovery_name),
            recovery: None,
            first_error: None,
            retries: 0,
        }
    }

    /// Whether the primary sink has failed permanently.
    pub fn failed(&self) -> bool {
        self.first_error.is_some()
    }

    async fn drain_to_recovery(
        &mut self,
        trial_number: usize,
        trial: &Trial,
    ) -> Result<(), ContractError> {
        if self.recovery.is_none() {
            warn!(path = %self.recovery_path.display(), "draining trials to recovery file");
            self.recovery = Some(JsonTrialFile::create(&self.recovery_path)?);
        }
        self.recovery
            .as_mut()
            .expect("recovery sink just created")
            .append(trial_number, trial)
            .await
    }

    /// Write one trial, retrying once; after a double failure, divert this
    /// and all later trials to the recovery file.
    pub async fn append(
        &mut self,
        trial_number: usize,
        trial: &Trial,
    ) -> Result<(), ContractError> {
        if self.failed() {
            return self.drain_to_recovery(trial_number, trial).await;
        }
        match self.sink.append(trial_number, trial).await {
            Ok(()) => Ok(()),
            Err(first) => {
                warn!(trial_number, error = %first, "sink write failed, retrying once");
                self.retries += 1;
                match self.sink.append(trial_number, trial).await {
                    Ok(()) => Ok(()),
                    Err(second) => {
                        error!(trial_number, error = %second, "sink write failed twice");
                        self.first_error = Some(second.to_string());
                        self.drain_to_recovery(trial_number, trial).await
                    }
                }
            }
        }
    }

    /// Revise an already-written trial (collecter output).
    pub async fn rewrite(
        &mut self,
        trial_number: usize,
        trial: &Trial,
    ) -> Result<(), ContractError> {
        if self.failed() {
            return Ok(());
        }
        self.sink.rewrite(trial_number, trial).await
    }

    /// Flush and close everything; returns the fatal sink error, if any,
    /// so the driver can exit non-zero.
    pub async fn finish(&mut self) -> Result<(), ContractError> {
        if let Some(recovery) = self.recovery.as_mut() {
            recovery.close().await?;
        }
        if !self.failed() {
            self.sink.flush().await?;
            self.sink.close().await?;
        }
        match &self.first_error {
            Some(message) => Err(ContractError::sink_write("trial_file", message.clone())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn healthy_sink_passes_writes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.json");
        let sink = TrialFileSink::for_path(&path).unwrap();
        let mut writer = RetryingTrialWriter::new(sink, &path);

        writer.append(0, &Trial::new(0.0, Some(1.0))).await.unwrap();
        writer.append(1, &Trial::new(1.0, None)).await.unwrap();
        writer.finish().await.unwrap();

        let trials = JsonTrialFile::read_trials(&path).unwrap();
        assert_eq!(trials.len(), 2);
        assert!(!writer.failed());
    }

    #[tokio::test]
    async fn double_failure_drains_to_recovery_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trials.json");
        let sink = TrialFileSink::for_path(&path).unwrap();
        let mut writer = RetryingTrialWriter::new(sink, &path);

        writer.append(0, &Trial::new(0.0, Some(1.0))).await.unwrap();

        // Make the primary path unwritable by replacing it with a directory.
        std::fs::remove_file(&path).unwrap();
        std::fs::create_dir(&path).unwrap();

        writer.append(1, &Trial::new(1.0, Some(2.0))).await.unwrap();
        writer.append(2, &Trial::new(2.0, None)).await.unwrap();
        assert!(writer.failed());
        assert!(writer.finish().await.is_err());

        let recovery = dir.path().join("trials.json.recovery.jsonl");
        let drained = JsonTrialFile::read_trials(&recovery).unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].start_time, 1.0);
    }
}
