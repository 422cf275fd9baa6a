//! # Integration Tests
//!
//! End-to-end scenario tests over real files: CSV sources in, trial files
//! out, through the full configuration / routing / delimiting / extraction /
//! sink stack. No live sources required.

#[cfg(test)]
mod harness {
    use std::path::Path;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    use config_loader::{ConfigFormat, ConfigLoader};
    use contracts::{FileFinder, Trial};
    use serde_json::Map as JsonMap;
    use trial_syncer::pipeline::{Pipeline, PipelineContext, PipelineStats};

    pub fn write_file(dir: &Path, name: &str, content: &str) {
        std::fs::write(dir.join(name), content).unwrap();
    }

    /// Load a config, run a batch conversion in `dir`, and read the output
    /// trial file back.
    pub async fn run_convert(
        config: &str,
        dir: &Path,
        out_name: &str,
    ) -> (Vec<Trial>, PipelineStats) {
        let blueprint = ConfigLoader::load_from_str(config, ConfigFormat::Toml).unwrap();
        let finder = FileFinder::new(vec![dir.to_path_buf()]);
        let context =
            PipelineContext::from_blueprint(&blueprint, JsonMap::new(), finder, false).unwrap();
        let shutdown = Arc::new(AtomicBool::new(false));
        let out_path = dir.join(out_name);
        let stats = Pipeline::new(context, shutdown).run(&out_path).await.unwrap();
        let trials = trial_file::read_trials(&out_path).unwrap();
        (trials, stats)
    }

    pub fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }
}

#[cfg(test)]
mod core_demo {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.foo_reader]
class = "CsvTextEventReader"
args = { csv_file = "foo.csv", result_name = "foo" }

[readers.bar_reader]
class = "CsvNumericEventReader"
args = { csv_file = "bar.csv", result_name = "bar" }

[readers.bar_reader.extra_buffers.bar_2]
reader_result_name = "bar"
transformers = [ { class = "OffsetThenGain", args = { offset = 10.0, gain = -2.0 } } ]

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0
"#;

    fn write_sources(dir: &TempDir) {
        write_file(
            dir.path(),
            "delimiter.csv",
            "1.0,1010\n1.5,42\n2.0,1010\n2.5,42\n2.6,42\n3.0,1010\n3.5,42\n",
        );
        write_file(
            dir.path(),
            "foo.csv",
            "0.2,red\n1.2,red\n1.3,green\n2.2,red\n2.3,green\n",
        );
        write_file(dir.path(), "bar.csv", "0.1,1\n3.1,0\n");
    }

    #[tokio::test]
    async fn four_trials_with_expected_alignment() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);
        let (trials, stats) = run_convert(CONFIG, dir.path(), "trials.json").await;

        assert_eq!(trials.len(), 4);
        assert_eq!(stats.trials_emitted, 4);
        let starts: Vec<f64> = trials.iter().map(|t| t.start_time).collect();
        assert_eq!(starts, vec![0.0, 1.0, 2.0, 3.0]);
        let wrts: Vec<f64> = trials.iter().map(|t| t.wrt_time).collect();
        assert_eq!(wrts, vec![0.0, 1.5, 2.5, 3.5]);

        // Trial 0: pre-start data with unshifted times.
        let t0 = &trials[0];
        assert_eq!(t0.end_time, Some(1.0));
        assert_eq!(t0.numeric_events["bar"].event_data, vec![vec![0.1, 1.0]]);
        assert_eq!(t0.numeric_events["bar_2"].event_data, vec![vec![0.1, -22.0]]);
        assert_eq!(t0.text_events["foo"].text_data, vec!["red".to_string()]);
        assert_close(t0.text_events["foo"].timestamp_data[0], 0.2);

        // Trials 1 and 2: foo pairs aligned to their wrt events.
        for trial in &trials[1..3] {
            let foo = &trial.text_events["foo"];
            assert_eq!(foo.text_data, vec!["red".to_string(), "green".to_string()]);
            assert_close(foo.timestamp_data[0], -0.3);
            assert_close(foo.timestamp_data[1], -0.2);
            assert_eq!(trial.numeric_events["bar"].event_count(), 0);
        }

        // Final trial: open-ended, bar data aligned to wrt 3.5.
        let t3 = &trials[3];
        assert_eq!(t3.end_time, None);
        assert_close(t3.numeric_events["bar"].event_data[0][0], -0.4);
        assert_eq!(t3.numeric_events["bar"].event_data[0][1], 0.0);
        assert_close(t3.numeric_events["bar_2"].event_data[0][0], -0.4);
        assert_eq!(t3.numeric_events["bar_2"].event_data[0][1], -20.0);
    }

    #[tokio::test]
    async fn trials_are_ordered_and_windows_nest() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);
        let (trials, _) = run_convert(CONFIG, dir.path(), "trials.json").await;

        for pair in trials.windows(2) {
            assert!(pair[0].start_time <= pair[1].start_time);
            assert_eq!(pair[0].end_time, Some(pair[1].start_time));
        }
    }

    #[tokio::test]
    async fn convert_is_byte_idempotent() {
        let dir = TempDir::new().unwrap();
        write_sources(&dir);
        run_convert(CONFIG, dir.path(), "first.json").await;
        run_convert(CONFIG, dir.path(), "second.json").await;

        let first = std::fs::read(dir.path().join("first.json")).unwrap();
        let second = std::fs::read(dir.path().join("second.json")).unwrap();
        assert!(!first.is_empty());
        assert_eq!(first, second);
    }
}

#[cfg(test)]
mod signal_trial {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.signal_reader]
class = "CsvSignalReader"
args = { csv_file = "signal.csv", sample_frequency = 10.0 }

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0
"#;

    #[tokio::test]
    async fn signal_chunk_aligns_to_wrt_on_sample_boundaries() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "delimiter.csv", "0.0,1010\n1.0,42\n");
        let mut signal = String::from("sin,cos\n");
        for i in 0..60 {
            signal.push_str(&format!("{}.0,{}.0\n", i, 60 - i));
        }
        write_file(dir.path(), "signal.csv", &signal);

        let (trials, _) = run_convert(CONFIG, dir.path(), "trials.json").await;
        // One open-ended trial from time zero (the start event at exactly
        // t=0 coincides with the initial cursor).
        assert_eq!(trials.len(), 1);
        let trial = &trials[0];
        assert_eq!(trial.wrt_time, 1.0);
        let chunk = &trial.signals["samples"];
        assert_eq!(chunk.sample_count(), 60);
        assert_eq!(chunk.channel_ids, vec!["sin".to_string(), "cos".to_string()]);
        assert_close(chunk.first_sample_time, -1.0);
        assert_close(chunk.end_time().unwrap(), 4.9);
        assert_eq!(chunk.sample_data[0], vec![0.0, 60.0]);
    }
}

#[cfg(test)]
mod sync_correction {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.ref_reader]
class = "CsvNumericEventReader"
args = { csv_file = "reference.csv", result_name = "delimiter" }

[readers.ref_reader.sync]
is_reference = true
buffer_name = "delimiter"
filter = "value == 32.0"

[readers.follower_reader]
class = "CsvNumericEventReader"
args = { csv_file = "follower.csv", result_name = "follower_events" }

[readers.follower_reader.sync]
buffer_name = "follower_events"
filter = "value == 32.0"

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0
"#;

    #[tokio::test]
    async fn follower_times_are_offset_corrected() {
        let dir = TempDir::new().unwrap();
        // Reference clock: sync at 1, 11, 21; trials at 10 and 20; wrt 15.
        write_file(
            dir.path(),
            "reference.csv",
            "1.0,32\n10.0,1010\n11.0,32\n15.0,42\n20.0,1010\n21.0,32\n",
        );
        // Follower clock drifting at 1.05x: sync at 1.05, 11.55, 22.05.
        // One data event at raw 10.6 plus the sync marks themselves.
        write_file(
            dir.path(),
            "follower.csv",
            "1.05,32\n10.6,777\n11.55,32\n22.05,32\n",
        );

        let (trials, _) = run_convert(CONFIG, dir.path(), "trials.json").await;
        assert_eq!(trials.len(), 3);

        // Trial 1 covers reference [10, 20); its offset comes from the most
        // recent pair at or before t=10: (1.0, 1.05), delta = -0.05.
        let trial = &trials[1];
        assert_eq!(trial.start_time, 10.0);
        assert_eq!(trial.end_time, Some(20.0));
        assert_eq!(trial.wrt_time, 15.0);
        let events = &trial.numeric_events["follower_events"];
        let data_rows: Vec<&Vec<f64>> =
            events.event_data.iter().filter(|row| row[1] == 777.0).collect();
        assert_eq!(data_rows.len(), 1);
        // Raw 10.6 + delta(-0.05) - wrt(15.0) = -4.45.
        assert_close(data_rows[0][0], -4.45);
    }
}

#[cfg(test)]
mod pre_start_trial {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.early_reader]
class = "CsvTextEventReader"
args = { csv_file = "early.csv", result_name = "early" }

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0
"#;

    #[tokio::test]
    async fn events_before_the_first_start_are_not_dropped() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "delimiter.csv", "1.0,1010\n");
        write_file(dir.path(), "early.csv", "0.2,early\n");

        let (trials, _) = run_convert(CONFIG, dir.path(), "trials.json").await;
        assert_eq!(trials.len(), 2);

        let t0 = &trials[0];
        assert_eq!(t0.start_time, 0.0);
        assert_eq!(t0.end_time, Some(1.0));
        assert_eq!(t0.wrt_time, 0.0);
        assert_eq!(t0.text_events["early"].text_data, vec!["early".to_string()]);
        assert_close(t0.text_events["early"].timestamp_data[0], 0.2);
    }
}

#[cfg(test)]
mod enhancer_failure {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.signal_reader]
class = "CsvSignalReader"
args = { csv_file = "signal.csv", sample_frequency = 10.0 }

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0

[[trials.enhancers]]
class = "TrialDurationEnhancer"

[[trials.enhancers]]
class = "SignalSmoother"
args = { buffer_name = "samples", channel_id = "no_such_channel", kernel_size = 2 }

[[trials.enhancers]]
class = "ExpressionEnhancer"
args = { expression = "duration + 1", value_name = "duration_plus_one" }
"#;

    #[tokio::test]
    async fn failing_enhancer_leaves_partial_enhancements_and_run_continues() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "delimiter.csv", "1.0,1010\n2.0,1010\n");
        write_file(dir.path(), "signal.csv", "ch0\n1\n2\n3\n4\n5\n");

        let (trials, stats) = run_convert(CONFIG, dir.path(), "trials.json").await;
        assert_eq!(trials.len(), 3);
        assert!(stats.enhancer_failures >= 1);

        // Trial 0 holds all the samples, so the smoother fired there and
        // failed; the enhancers before and after it still ran.
        for trial in &trials[..2] {
            assert_eq!(trial.enhancements["duration"], serde_json::json!(1.0));
            assert_eq!(trial.enhancements["duration_plus_one"], serde_json::json!(2.0));
        }
    }
}

#[cfg(test)]
mod collecter_rescale {
    use super::harness::*;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.signal_reader]
class = "CsvSignalReader"
args = { csv_file = "signal.csv", sample_frequency = 10.0, lines_per_chunk = 2 }

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0

[[trials.collecters]]
class = "SignalNormalizer"
args = { buffer_name = "samples" }
"#;

    #[tokio::test]
    async fn signals_rescale_by_the_global_max() {
        let dir = TempDir::new().unwrap();
        // Two trials; the global max (4.0) lands in the second one.
        write_file(dir.path(), "delimiter.csv", "0.1,1010\n0.3,1010\n");
        write_file(dir.path(), "signal.csv", "ch0\n1\n2\n1\n4\n2\n");

        let (trials, stats) = run_convert(CONFIG, dir.path(), "trials.json").await;
        assert!(stats.trials_rewritten >= 2);

        let mut all_values: Vec<f64> = Vec::new();
        for trial in &trials {
            if let Some(chunk) = trial.signals.get("samples") {
                assert_eq!(trial.enhancements["signal_scale"], serde_json::json!(0.25));
                all_values.extend(chunk.sample_data.iter().map(|row| row[0]));
            }
        }
        // Every sample scaled by 1/4, with the global max landing at 1.0.
        assert!(all_values.iter().all(|v| v.abs() <= 1.0));
        assert!(all_values.iter().any(|v| *v == 1.0));
    }
}

#[cfg(test)]
mod round_trip {
    use super::harness::*;
    use tempfile::TempDir;
    use trial_file::JsonTrialFile;

    const CONFIG: &str = r#"
[readers.delimiter_reader]
class = "CsvNumericEventReader"
args = { csv_file = "delimiter.csv", result_name = "delimiter" }

[readers.bar_reader]
class = "CsvNumericEventReader"
args = { csv_file = "bar.csv", result_name = "bar" }

[trials]
start_buffer = "delimiter"
start_value = 1010.0
wrt_buffer = "delimiter"
wrt_value = 42.0

[[trials.enhancers]]
class = "TrialDurationEnhancer"
"#;

    #[tokio::test]
    async fn written_trials_read_back_equal() {
        let dir = TempDir::new().unwrap();
        write_file(dir.path(), "delimiter.csv", "1.0,1010\n1.5,42\n2.0,1010\n");
        write_file(dir.path(), "bar.csv", "0.5,7\n1.25,8\n");

        let (trials, _) = run_convert(CONFIG, dir.path(), "trials.json").await;

        // Re-serialize what we read and compare to a second read: the file
        // is a fixed point of dump/load.
        let dumped: Vec<String> = trials
            .iter()
            .map(|t| serde_json::to_string(&JsonTrialFile::dump_trial(t)).unwrap())
            .collect();
        let reparsed: Vec<contracts::Trial> = dumped
            .iter()
            .map(|line| {
                JsonTrialFile::load_trial(&serde_json::from_str(line).unwrap()).unwrap()
            })
            .collect();
        assert_eq!(trials, reparsed);
    }

    #[tokio::test]
    async fn buffers_are_garbage_collected_behind_emitted_trials() {
        let dir = TempDir::new().unwrap();
        let mut delimiters = String::new();
        for i in 1..50 {
            delimiters.push_str(&format!("{}.0,1010\n", i));
        }
        write_file(dir.path(), "delimiter.csv", &delimiters);
        write_file(dir.path(), "bar.csv", "0.5,7\n25.5,8\n48.5,9\n");

        let (trials, stats) = run_convert(CONFIG, dir.path(), "trials.json").await;
        assert_eq!(stats.trials_emitted, 50);
        // Every bar event lands in exactly one trial despite head discards.
        let total_bar_events: usize = trials
            .iter()
            .map(|t| t.numeric_events.get("bar").map_or(0, |e| e.event_count()))
            .sum();
        assert_eq!(total_bar_events, 3);
    }
}
