//! CSV file readers for numeric events, text events, and signals.
//!
//! Rows that fail to parse are skipped with an info log so one stray line
//! does not kill a session recording.

use std::fs::File;
use std::path::PathBuf;

use csv::{ReaderBuilder, StringRecord};
use serde::Deserialize;
use tracing::{info, warn};

use contracts::{
    parse_component_args, BufferData, ContractError, FileFinder, NumericEvents, ReadError,
    ReadOutcome, Reader, ReaderBatch, SignalChunk, TextEvents,
};

fn default_events_result() -> String {
    "events".to_string()
}

fn default_samples_result() -> String {
    "samples".to_string()
}

fn default_lines_per_chunk() -> usize {
    10
}

fn default_true() -> bool {
    true
}

fn default_sample_frequency() -> f64 {
    1.0
}

/// Shared CSV cursor: one file, optional header, optional column selection.
struct CsvCursor {
    path: PathBuf,
    first_row_is_header: bool,
    column_selector: Option<Vec<usize>>,
    reader: Option<csv::Reader<File>>,
    record: StringRecord,
}

impl CsvCursor {
    fn new(path: PathBuf, first_row_is_header: bool, column_selector: Option<Vec<usize>>) -> Self {
        Self { path, first_row_is_header, column_selector, reader: None, record: StringRecord::new() }
    }

    fn open(&mut self) -> Result<(), ReadError> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .map_err(|e| ReadError::Permanent(format!("cannot open {}: {e}", self.path.display())))?;
        if self.first_row_is_header {
            let mut header = StringRecord::new();
            reader
                .read_record(&mut header)
                .map_err(|e| ReadError::Permanent(format!("cannot read header: {e}")))?;
        }
        self.reader = Some(reader);
        Ok(())
    }

    /// Read one row, applying the column selector. `Ok(None)` at end of file.
    fn next_row(&mut self) -> Result<Option<Vec<String>>, ReadError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| ReadError::Permanent("reader not opened".to_string()))?;
        let got = reader
            .read_record(&mut self.record)
            .map_err(|e| ReadError::Permanent(format!("csv read error: {e}")))?;
        if !got {
            return Ok(None);
        }
        let row: Vec<String> = match &self.column_selector {
            Some(columns) => columns
                .iter()
                .map(|c| self.record.get(*c).unwrap_or_default().to_string())
                .collect(),
            None => self.record.iter().map(str::to_string).collect(),
        };
        Ok(Some(row))
    }

    /// Read the first line without disturbing the cursor state.
    fn peek_first(&self) -> Option<Vec<String>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(&self.path)
            .ok()?;
        let mut record = StringRecord::new();
        if !reader.read_record(&mut record).ok()? {
            return None;
        }
        let row: Vec<String> = match &self.column_selector {
            Some(columns) => columns
                .iter()
                .map(|c| record.get(*c).unwrap_or_default().to_string())
                .collect(),
            None => record.iter().map(str::to_string).collect(),
        };
        Some(row)
    }

    fn close(&mut self) {
        self.reader = None;
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CsvEventArgs {
    csv_file: String,
    #[serde(default)]
    first_row_is_header: bool,
    #[serde(default)]
    column_selector: Option<Vec<usize>>,
    #[serde(default = "default_events_result")]
    result_name: String,
}

/// Read numeric events from a CSV of numbers, one event per line:
/// `timestamp, value [, value ...]`.
pub struct CsvNumericEventReader {
    cursor: CsvCursor,
    result_name: String,
}

impl CsvNumericEventReader {
    pub fn from_args(args: &serde_json::Value, finder: &FileFinder) -> Result<Self, ContractError> {
        let args: CsvEventArgs = parse_component_args("CsvNumericEventReader", args)?;
        Ok(Self {
            cursor: CsvCursor::new(
                finder.find(&args.csv_file),
                args.first_row_is_header,
                args.column_selector,
            ),
            result_name: args.result_name,
        })
    }
}

impl Reader for CsvNumericEventReader {
    fn open(&mut self) -> Result<(), ReadError> {
        self.cursor.open()
    }

    fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
        let row = match self.cursor.next_row()? {
            Some(row) => row,
            None => return Err(ReadError::EndOfStream),
        };
        let parsed: Result<Vec<f64>, _> = row.iter().map(|cell| cell.trim().parse()).collect();
        match parsed {
            Ok(values) if values.len() >= 2 => {
                let mut batch = ReaderBatch::new();
                batch.insert(
                    self.result_name.clone(),
                    BufferData::NumericEvents(NumericEvents::new(vec![values])),
                );
                Ok(ReadOutcome::Batch(batch))
            }
            _ => {
                info!(file = %self.cursor.path.display(), row = ?row, "skipping non-numeric csv line");
                Ok(ReadOutcome::NoData)
            }
        }
    }

    fn initial(&self) -> ReaderBatch {
        let mut batch = ReaderBatch::new();
        batch.insert(
            self.result_name.clone(),
            BufferData::NumericEvents(NumericEvents::empty()),
        );
        batch
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

/// Read text events from a CSV, one event per line: `timestamp, text`.
pub struct CsvTextEventReader {
    cursor: CsvCursor,
    result_name: String,
}

impl CsvTextEventReader {
    pub fn from_args(args: &serde_json::Value, finder: &FileFinder) -> Result<Self, ContractError> {
        let args: CsvEventArgs = parse_component_args("CsvTextEventReader", args)?;
        Ok(Self {
            cursor: CsvCursor::new(
                finder.find(&args.csv_file),
                args.first_row_is_header,
                args.column_selector,
            ),
            result_name: args.result_name,
        })
    }
}

impl Reader for CsvTextEventReader {
    fn open(&mut self) -> Result<(), ReadError> {
        self.cursor.open()
    }

    fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
        let row = match self.cursor.next_row()? {
            Some(row) => row,
            None => return Err(ReadError::EndOfStream),
        };
        if row.len() < 2 {
            info!(file = %self.cursor.path.display(), row = ?row, "skipping short csv line");
            return Ok(ReadOutcome::NoData);
        }
        match row[0].trim().parse::<f64>() {
            Ok(timestamp) => {
                let mut batch = ReaderBatch::new();
                batch.insert(
                    self.result_name.clone(),
                    BufferData::TextEvents(TextEvents::new(vec![timestamp], vec![row[1].clone()])),
                );
                Ok(ReadOutcome::Batch(batch))
            }
            Err(_) => {
                info!(file = %self.cursor.path.display(), row = ?row, "skipping csv line with bad timestamp");
                Ok(ReadOutcome::NoData)
            }
        }
    }

    fn initial(&self) -> ReaderBatch {
        let mut batch = ReaderBatch::new();
        batch.insert(self.result_name.clone(), BufferData::TextEvents(TextEvents::empty()));
        batch
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct CsvSignalArgs {
    csv_file: String,
    #[serde(default = "default_true")]
    first_row_is_header: bool,
    #[serde(default)]
    column_selector: Option<Vec<usize>>,
    #[serde(default = "default_sample_frequency")]
    sample_frequency: f64,
    #[serde(default)]
    next_sample_time: f64,
    #[serde(default = "default_lines_per_chunk")]
    lines_per_chunk: usize,
    #[serde(default = "default_samples_result")]
    result_name: String,
    #[serde(default)]
    channel_ids: Option<Vec<String>>,
}

/// Read a regularly sampled signal from a CSV of numbers, one sample per
/// line, one channel per column. The first line is a header of channel ids
/// by default.
pub struct CsvSignalReader {
    cursor: CsvCursor,
    sample_frequency: f64,
    next_sample_time: f64,
    lines_per_chunk: usize,
    result_name: String,
    channel_ids: Vec<String>,
}

impl CsvSignalReader {
    pub fn from_args(args: &serde_json::Value, finder: &FileFinder) -> Result<Self, ContractError> {
        let args: CsvSignalArgs = parse_component_args("CsvSignalReader", args)?;
        if args.sample_frequency <= 0.0 {
            return Err(ContractError::config_validation(
                "CsvSignalReader.sample_frequency",
                "must be > 0",
            ));
        }
        let cursor = CsvCursor::new(
            finder.find(&args.csv_file),
            args.first_row_is_header,
            args.column_selector,
        );
        let channel_ids = match args.channel_ids {
            Some(ids) => ids,
            None => match cursor.peek_first() {
                Some(header) if args.first_row_is_header => header,
                _ => {
                    warn!(file = %cursor.path.display(), "cannot determine signal channel ids");
                    Vec::new()
                }
            },
        };
        Ok(Self {
            cursor,
            sample_frequency: args.sample_frequency,
            next_sample_time: args.next_sample_time,
            lines_per_chunk: args.lines_per_chunk.max(1),
            result_name: args.result_name,
            channel_ids,
        })
    }
}

impl Reader for CsvSignalReader {
    fn open(&mut self) -> Result<(), ReadError> {
        self.cursor.open()
    }

    fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
        let mut samples: Vec<Vec<f64>> = Vec::new();
        let mut at_end = false;
        while samples.len() < self.lines_per_chunk {
            let row = match self.cursor.next_row()? {
                Some(row) => row,
                None => {
                    at_end = true;
                    break;
                }
            };
            let parsed: Result<Vec<f64>, _> = row.iter().map(|cell| cell.trim().parse()).collect();
            match parsed {
                Ok(values) if !values.is_empty() => samples.push(values),
                _ => {
                    info!(file = %self.cursor.path.display(), row = ?row, "skipping non-numeric csv line");
                }
            }
        }
        if samples.is_empty() {
            if at_end {
                return Err(ReadError::EndOfStream);
            }
            return Ok(ReadOutcome::NoData);
        }
        let chunk = SignalChunk::new(
            samples,
            self.sample_frequency,
            self.next_sample_time,
            self.channel_ids.clone(),
        );
        self.next_sample_time += chunk.sample_count() as f64 / self.sample_frequency;
        let mut batch = ReaderBatch::new();
        batch.insert(self.result_name.clone(), BufferData::Signal(chunk));
        Ok(ReadOutcome::Batch(batch))
    }

    fn initial(&self) -> ReaderBatch {
        let mut batch = ReaderBatch::new();
        batch.insert(
            self.result_name.clone(),
            BufferData::Signal(SignalChunk::empty(
                self.sample_frequency,
                self.next_sample_time,
                self.channel_ids.clone(),
            )),
        );
        batch
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_file(dir: &TempDir, name: &str, content: &str) -> String {
        let path = dir.path().join(name);
        let mut file = File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path.to_string_lossy().to_string()
    }

    fn read_all(reader: &mut dyn Reader) -> Vec<ReaderBatch> {
        let mut batches = Vec::new();
        loop {
            match reader.read_next() {
                Ok(ReadOutcome::Batch(batch)) => batches.push(batch),
                Ok(ReadOutcome::NoData) => continue,
                Err(ReadError::EndOfStream) => break,
                Err(e) => panic!("unexpected read error: {e}"),
            }
        }
        batches
    }

    #[test]
    fn numeric_reader_parses_one_event_per_line() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "events.csv", "1.0,1010\nnot,numeric\n2.0,42\n");
        let mut reader = CsvNumericEventReader::from_args(
            &json!({"csv_file": path}),
            &FileFinder::default(),
        )
        .unwrap();
        reader.open().unwrap();
        let batches = read_all(&mut reader);
        assert_eq!(batches.len(), 2);
        match &batches[1]["events"] {
            BufferData::NumericEvents(events) => {
                assert_eq!(events.event_data, vec![vec![2.0, 42.0]]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn text_reader_keeps_text_column_verbatim() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "texts.csv", "0.2,red\n1.3,green\n");
        let mut reader = CsvTextEventReader::from_args(
            &json!({"csv_file": path, "result_name": "foo"}),
            &FileFinder::default(),
        )
        .unwrap();
        reader.open().unwrap();
        let batches = read_all(&mut reader);
        assert_eq!(batches.len(), 2);
        match &batches[0]["foo"] {
            BufferData::TextEvents(events) => {
                assert_eq!(events.timestamp_data, vec![0.2]);
                assert_eq!(events.text_data, vec!["red".to_string()]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn signal_reader_chunks_and_advances_time() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "signal.csv", "sin,cos\n0,1\n1,0\n2,-1\n");
        let mut reader = CsvSignalReader::from_args(
            &json!({"csv_file": path, "sample_frequency": 10.0, "lines_per_chunk": 2}),
            &FileFinder::default(),
        )
        .unwrap();
        reader.open().unwrap();
        match &reader.initial()["samples"] {
            BufferData::Signal(chunk) => {
                assert_eq!(chunk.channel_ids, vec!["sin".to_string(), "cos".to_string()]);
            }
            _ => panic!("wrong variety"),
        }
        let batches = read_all(&mut reader);
        assert_eq!(batches.len(), 2);
        match (&batches[0]["samples"], &batches[1]["samples"]) {
            (BufferData::Signal(first), BufferData::Signal(second)) => {
                assert_eq!(first.sample_count(), 2);
                assert_eq!(first.first_sample_time, 0.0);
                assert_eq!(second.sample_count(), 1);
                assert!((second.first_sample_time - 0.2).abs() < 1e-9);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn missing_file_fails_on_open() {
        let mut reader = CsvNumericEventReader::from_args(
            &json!({"csv_file": "does_not_exist.csv"}),
            &FileFinder::default(),
        )
        .unwrap();
        assert!(reader.open().is_err());
    }

    #[test]
    fn unknown_arg_keys_are_rejected() {
        let result = CsvNumericEventReader::from_args(
            &json!({"csv_file": "x.csv", "csv_fle": "typo.csv"}),
            &FileFinder::default(),
        );
        assert!(result.is_err());
    }
}
