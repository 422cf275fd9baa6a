//! Per-reader routing loop: pull increments, fan out into buffers, observe
//! sync events, track the reader's time watermark.

use metrics::counter;
use tracing::{debug, error, info, instrument, warn};

use contracts::expression::{Bindings, CompiledExpression, Value};
use contracts::{
    BufferData, ContractError, ReadError, ReadOutcome, Reader, ReaderSyncConfig, RetryPolicy,
    SyncEventSink, SyncKey,
};
use neutral_zone::{NeutralZone, Transformer};

/// One mapping from a reader result to a named buffer, with an optional
/// transformer pipeline in between.
pub struct ReaderRoute {
    pub reader_result_name: String,
    pub buffer_name: String,
    pub transformers: Vec<Box<dyn Transformer>>,
}

impl ReaderRoute {
    /// A pass-through route from a result to the buffer of the same name.
    pub fn direct(name: impl Into<String>) -> Self {
        let name = name.into();
        Self { reader_result_name: name.clone(), buffer_name: name, transformers: Vec::new() }
    }
}

/// Per-run counters surfaced in the pipeline summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct RouterCounts {
    pub batches_routed: u64,
    pub out_of_order_dropped: u64,
    pub transformer_failures: u64,
    pub read_failures: u64,
}

/// Watches one reader result for sync events, per the reader's descriptor.
struct SyncCollector {
    buffer_name: String,
    filter: Option<CompiledExpression>,
    pairing_key: Option<CompiledExpression>,
    next_index: u64,
}

impl SyncCollector {
    fn from_config(config: &ReaderSyncConfig) -> Result<Option<Self>, ContractError> {
        let Some(buffer_name) = &config.buffer_name else {
            return Ok(None);
        };
        let filter = config.filter.as_deref().map(CompiledExpression::parse).transpose()?;
        let pairing_key =
            config.pairing_key.as_deref().map(CompiledExpression::parse).transpose()?;
        Ok(Some(Self {
            buffer_name: buffer_name.clone(),
            filter,
            pairing_key,
            next_index: 0,
        }))
    }

    fn scan(&mut self, data: &BufferData) -> Vec<(f64, SyncKey)> {
        let rows: Vec<(f64, Bindings)> = match data {
            BufferData::NumericEvents(events) => events
                .event_data
                .iter()
                .map(|row| {
                    let mut bindings = Bindings::default();
                    bindings.0.insert("time".into(), Value::Number(row[0]));
                    bindings.0.insert(
                        "value".into(),
                        row.get(1).map_or(Value::Null, |v| Value::Number(*v)),
                    );
                    bindings.0.insert(
                        "values".into(),
                        Value::List(row[1..].iter().map(|v| Value::Number(*v)).collect()),
                    );
                    (row[0], bindings)
                })
                .collect(),
            BufferData::TextEvents(events) => events
                .timestamp_data
                .iter()
                .zip(&events.text_data)
                .map(|(t, text)| {
                    let mut bindings = Bindings::default();
                    bindings.0.insert("time".into(), Value::Number(*t));
                    bindings.0.insert("value".into(), Value::Text(text.clone()));
                    (*t, bindings)
                })
                .collect(),
            BufferData::Signal(_) => Vec::new(),
        };

        let mut events = Vec::new();
        for (time, bindings) in rows {
            if let Some(filter) = &self.filter {
                if !filter.is_true(&bindings) {
                    continue;
                }
            }
            let key = match &self.pairing_key {
                Some(expr) => match expr.evaluate(&bindings) {
                    Value::Null => SyncKey::Index(self.next_index),
                    Value::Text(text) => SyncKey::Text(text),
                    Value::Number(n) => SyncKey::Text(format!("{n}")),
                    Value::Bool(b) => SyncKey::Text(format!("{b}")),
                    Value::List(_) => SyncKey::Index(self.next_index),
                },
                None => SyncKey::Index(self.next_index),
            };
            self.next_index += 1;
            events.push((time, key));
        }
        events
    }
}

/// Get incremental results from one reader and deal the data into buffers.
///
/// A reader that fails permanently (or runs out of retries) is marked
/// exhausted with a warning; the run continues with the remaining readers.
pub struct ReaderRouter {
    name: String,
    reader: Box<dyn Reader>,
    routes: Vec<ReaderRoute>,
    buffer_names: Vec<String>,
    empty_reads_allowed: usize,
    sync_collector: Option<SyncCollector>,
    sync_reader_name: Option<String>,
    is_reference: bool,
    exhausted: bool,
    watermark: Option<f64>,
    retry: RetryPolicy,
    pub counts: RouterCounts,
}

impl ReaderRouter {
    pub fn new(
        name: impl Into<String>,
        reader: Box<dyn Reader>,
        routes: Vec<ReaderRoute>,
        empty_reads_allowed: usize,
        sync: Option<&ReaderSyncConfig>,
    ) -> Result<Self, ContractError> {
        let name = name.into();
        let sync_collector = match sync {
            Some(config) => SyncCollector::from_config(config)?,
            None => None,
        };
        let sync_reader_name = sync.map(|config| {
            config.reader_name.clone().unwrap_or_else(|| name.clone())
        });
        let buffer_names = routes.iter().map(|route| route.buffer_name.clone()).collect();
        Ok(Self {
            name,
            reader,
            routes,
            buffer_names,
            empty_reads_allowed,
            sync_collector,
            sync_reader_name,
            is_reference: sync.is_some_and(|config| config.is_reference),
            exhausted: false,
            watermark: None,
            retry: RetryPolicy::default(),
            counts: RouterCounts::default(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_reference(&self) -> bool {
        self.is_reference
    }

    /// The sync list this reader's buffers align with, `None` when unsynced.
    pub fn sync_reader_name(&self) -> Option<&str> {
        self.sync_reader_name.as_deref()
    }

    pub fn buffer_names(&self) -> &[String] {
        &self.buffer_names
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Latest timestamp seen across this reader's buffers, its own clock.
    pub fn watermark(&self) -> Option<f64> {
        self.watermark
    }

    /// Connect the underlying reader. Failures here are fatal: they mean a
    /// misconfigured source, not a transient hiccup.
    pub fn open(&mut self) -> Result<(), ContractError> {
        self.reader
            .open()
            .map_err(|e| ContractError::source(&self.name, e.to_string()))
    }

    /// Ask the reader for one increment and deal the results into buffers.
    ///
    /// Returns true when new data landed in at least one buffer.
    #[instrument(name = "router_route_next", skip(self, zone, sync_sink), fields(reader = %self.name))]
    pub fn route_next(&mut self, zone: &mut NeutralZone, sync_sink: &mut dyn SyncEventSink) -> bool {
        if self.exhausted {
            return false;
        }

        let outcome = self
            .retry
            .retry(|_| self.reader.read_next(), ReadError::is_retryable);
        let batch = match outcome {
            Ok(ReadOutcome::Batch(batch)) => batch,
            Ok(ReadOutcome::NoData) => return false,
            Err(ReadError::EndOfStream) => {
                info!(reader = %self.name, "reader is done (end of stream)");
                self.exhausted = true;
                self.reader.close();
                return false;
            }
            Err(e) => {
                warn!(reader = %self.name, error = %e, "reader disabled after read failure");
                counter!("ingestion_reader_failures_total", "reader" => self.name.clone())
                    .increment(1);
                self.counts.read_failures += 1;
                self.exhausted = true;
                self.reader.close();
                return false;
            }
        };

        let mut routed_any = false;
        for route in &mut self.routes {
            let Some(data) = batch.get(&route.reader_result_name) else {
                continue;
            };
            if data.is_empty() {
                continue;
            }
            let transformed = route
                .transformers
                .iter_mut()
                .try_fold(data.clone(), |piece, transformer| transformer.transform(piece));
            let copy = match transformed {
                Ok(copy) => copy,
                Err(e) => {
                    error!(
                        reader = %self.name,
                        buffer = %route.buffer_name,
                        error = %e,
                        "route transformer failed, skipping increment"
                    );
                    self.counts.transformer_failures += 1;
                    continue;
                }
            };

            if let (Some(collector), Some(sync_name)) =
                (self.sync_collector.as_mut(), self.sync_reader_name.as_deref())
            {
                if collector.buffer_name == route.buffer_name {
                    for (time, key) in collector.scan(&copy) {
                        sync_sink.record_event(sync_name, time, key);
                    }
                }
            }

            let Some(buffer) = zone.get_mut(&route.buffer_name) else {
                continue;
            };
            match buffer.append(copy) {
                Ok(()) => routed_any = true,
                Err(e) => {
                    warn!(
                        reader = %self.name,
                        buffer = %route.buffer_name,
                        error = %e,
                        "discarding out-of-order or incompatible data"
                    );
                    counter!("ingestion_out_of_order_total", "reader" => self.name.clone())
                        .increment(1);
                    self.counts.out_of_order_dropped += 1;
                }
            }
        }

        if routed_any {
            self.counts.batches_routed += 1;
            for name in &self.buffer_names {
                if let Some(end) = zone.end_time(name) {
                    self.watermark = Some(self.watermark.map_or(end, |w| w.max(end)));
                }
            }
        }
        routed_any
    }

    /// Read until this reader's watermark reaches a target time, converted
    /// from the reference clock with the given offset estimate.
    ///
    /// With no offset estimate yet (no sync pair seen), reads forward by the
    /// window duration instead of toward an absolute time. Gives up after
    /// `empty_reads_allowed` consecutive empty polls so one silent reader
    /// cannot stall the run.
    #[instrument(
        name = "router_route_until",
        skip(self, zone, sync_sink),
        fields(reader = %self.name, target = target_reference)
    )]
    pub fn route_until(
        &mut self,
        target_reference: f64,
        start_reference: f64,
        offset: Option<f64>,
        zone: &mut NeutralZone,
        sync_sink: &mut dyn SyncEventSink,
    ) -> Option<f64> {
        let target = match offset {
            Some(delta) => target_reference - delta,
            None => {
                let duration = (target_reference - start_reference).max(0.0);
                self.watermark.unwrap_or(0.0) + duration
            }
        };
        let mut empty_reads = 0;
        while !self.exhausted
            && self.watermark.is_none_or(|w| w < target)
            && empty_reads <= self.empty_reads_allowed
        {
            if self.route_next(zone, sync_sink) {
                empty_reads = 0;
            } else {
                empty_reads += 1;
            }
        }
        debug!(reader = %self.name, watermark = ?self.watermark, "route_until finished");
        self.watermark
    }

    /// Release the reader's resources.
    pub fn close(&mut self) {
        self.reader.close();
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{NumericEvents, ReaderBatch, ReaderSyncConfig};
    use neutral_zone::{Buffer, OffsetThenGain};

    /// Serves scripted outcomes, then end of stream.
    struct ScriptedReader {
        script: Vec<Result<ReadOutcome, ReadError>>,
    }

    impl ScriptedReader {
        fn events(rows: &[&[f64]]) -> Result<ReadOutcome, ReadError> {
            let mut batch = ReaderBatch::new();
            batch.insert(
                "events".to_string(),
                BufferData::NumericEvents(NumericEvents::new(
                    rows.iter().map(|r| r.to_vec()).collect(),
                )),
            );
            Ok(ReadOutcome::Batch(batch))
        }
    }

    impl Reader for ScriptedReader {
        fn read_next(&mut self) -> Result<ReadOutcome, ReadError> {
            if self.script.is_empty() {
                return Err(ReadError::EndOfStream);
            }
            self.script.remove(0)
        }

        fn initial(&self) -> ReaderBatch {
            let mut batch = ReaderBatch::new();
            batch.insert(
                "events".to_string(),
                BufferData::NumericEvents(NumericEvents::empty()),
            );
            batch
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<(String, f64, SyncKey)>,
    }

    impl SyncEventSink for RecordingSink {
        fn record_event(&mut self, reader_name: &str, time: f64, key: SyncKey) {
            self.events.push((reader_name.to_string(), time, key));
        }
    }

    fn zone_with(names: &[&str]) -> NeutralZone {
        let mut zone = NeutralZone::new();
        for name in names {
            zone.insert(
                *name,
                Buffer::from_prototype(&BufferData::NumericEvents(NumericEvents::empty())),
            )
            .unwrap();
        }
        zone
    }

    #[test]
    fn routes_primary_and_derived_buffers() {
        let reader = ScriptedReader {
            script: vec![ScriptedReader::events(&[&[0.1, 1.0]])],
        };
        let routes = vec![
            ReaderRoute::direct("events"),
            ReaderRoute {
                reader_result_name: "events".to_string(),
                buffer_name: "events_2".to_string(),
                transformers: vec![Box::new(
                    OffsetThenGain { offset: 10.0, gain: -2.0, value_index: 0 },
                )],
            },
        ];
        let mut router = ReaderRouter::new("r", Box::new(reader), routes, 3, None).unwrap();
        let mut zone = zone_with(&["events", "events_2"]);
        let mut sink = RecordingSink::default();

        assert!(router.route_next(&mut zone, &mut sink));
        assert_eq!(router.watermark(), Some(0.1));
        match zone.get("events_2").unwrap().query(None, None) {
            BufferData::NumericEvents(events) => {
                assert_eq!(events.event_data, vec![vec![0.1, -22.0]]);
            }
            _ => panic!("wrong variety"),
        }
        // Primary buffer got the untransformed copy.
        match zone.get("events").unwrap().query(None, None) {
            BufferData::NumericEvents(events) => {
                assert_eq!(events.event_data, vec![vec![0.1, 1.0]]);
            }
            _ => panic!("wrong variety"),
        }
    }

    #[test]
    fn end_of_stream_marks_exhausted() {
        let reader = ScriptedReader { script: vec![] };
        let mut router =
            ReaderRouter::new("r", Box::new(reader), vec![ReaderRoute::direct("events")], 3, None)
                .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        assert!(!router.route_next(&mut zone, &mut sink));
        assert!(router.exhausted());
        // Further pulls are no-ops.
        assert!(!router.route_next(&mut zone, &mut sink));
    }

    #[test]
    fn permanent_failure_disables_reader_but_keeps_data() {
        let reader = ScriptedReader {
            script: vec![
                ScriptedReader::events(&[&[0.1, 1.0]]),
                Err(ReadError::Permanent("device unplugged".to_string())),
            ],
        };
        let mut router =
            ReaderRouter::new("r", Box::new(reader), vec![ReaderRoute::direct("events")], 3, None)
                .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        assert!(router.route_next(&mut zone, &mut sink));
        assert!(!router.route_next(&mut zone, &mut sink));
        assert!(router.exhausted());
        assert_eq!(router.counts.read_failures, 1);
        assert_eq!(zone.end_time("events"), Some(0.1));
    }

    #[test]
    fn retryable_failures_are_retried() {
        let reader = ScriptedReader {
            script: vec![
                Err(ReadError::Retryable("busy".to_string())),
                ScriptedReader::events(&[&[0.5, 2.0]]),
            ],
        };
        let mut router =
            ReaderRouter::new("r", Box::new(reader), vec![ReaderRoute::direct("events")], 3, None)
                .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        assert!(router.route_next(&mut zone, &mut sink));
        assert_eq!(zone.end_time("events"), Some(0.5));
    }

    #[test]
    fn out_of_order_data_is_dropped_with_count() {
        let reader = ScriptedReader {
            script: vec![
                ScriptedReader::events(&[&[1.0, 1.0]]),
                ScriptedReader::events(&[&[0.5, 2.0]]),
                ScriptedReader::events(&[&[2.0, 3.0]]),
            ],
        };
        let mut router =
            ReaderRouter::new("r", Box::new(reader), vec![ReaderRoute::direct("events")], 3, None)
                .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        assert!(router.route_next(&mut zone, &mut sink));
        assert!(!router.route_next(&mut zone, &mut sink));
        assert!(router.route_next(&mut zone, &mut sink));
        assert_eq!(router.counts.out_of_order_dropped, 1);
        assert_eq!(zone.end_time("events"), Some(2.0));
    }

    #[test]
    fn sync_events_are_recorded_through_the_sink() {
        let reader = ScriptedReader {
            script: vec![ScriptedReader::events(&[&[1.0, 32.0], &[1.5, 42.0], &[11.0, 32.0]])],
        };
        let sync = ReaderSyncConfig {
            is_reference: true,
            buffer_name: Some("events".to_string()),
            filter: Some("value == 32.0".to_string()),
            ..Default::default()
        };
        let mut router = ReaderRouter::new(
            "ref_reader",
            Box::new(reader),
            vec![ReaderRoute::direct("events")],
            3,
            Some(&sync),
        )
        .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        router.route_next(&mut zone, &mut sink);
        assert_eq!(sink.events.len(), 2);
        assert_eq!(sink.events[0].0, "ref_reader");
        assert_eq!(sink.events[0].1, 1.0);
        assert_eq!(sink.events[1].1, 11.0);
    }

    #[test]
    fn route_until_reads_to_target_with_offset() {
        let reader = ScriptedReader {
            script: vec![
                ScriptedReader::events(&[&[0.5, 1.0]]),
                ScriptedReader::events(&[&[1.5, 2.0]]),
                ScriptedReader::events(&[&[2.5, 3.0]]),
            ],
        };
        let mut router =
            ReaderRouter::new("r", Box::new(reader), vec![ReaderRoute::direct("events")], 3, None)
                .unwrap();
        let mut zone = zone_with(&["events"]);
        let mut sink = RecordingSink::default();
        let watermark = router.route_until(2.0, 0.0, Some(0.0), &mut zone, &mut sink);
        assert_eq!(watermark, Some(2.5));
    }
}
