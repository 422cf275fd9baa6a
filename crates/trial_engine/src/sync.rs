//! Sync registry: per-reader sync event lists and clock offset estimation.

use std::collections::BTreeMap;

use tracing::debug;

use contracts::{PairingStrategy, SyncEventSink, SyncKey};

#[derive(Debug, Clone)]
struct SyncEvent {
    time: f64,
    key: SyncKey,
}

/// Sync events as seen by each reader, compared against a reference reader.
///
/// The registry owns its event lists, separate from the main buffers, so
/// sync history survives buffer garbage collection. Offsets are estimated
/// lazily, once per trial, and are never written back into buffers.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    reference_reader: Option<String>,
    events: BTreeMap<String, Vec<SyncEvent>>,
    strategies: BTreeMap<String, PairingStrategy>,
}

impl SyncRegistry {
    pub fn new(reference_reader: Option<String>) -> Self {
        Self { reference_reader, ..Default::default() }
    }

    pub fn reference_reader(&self) -> Option<&str> {
        self.reference_reader.as_deref()
    }

    pub fn set_reference_reader(&mut self, name: impl Into<String>) {
        self.reference_reader = Some(name.into());
    }

    /// Choose the pairing strategy used for one follower reader.
    pub fn set_strategy(&mut self, reader_name: impl Into<String>, strategy: PairingStrategy) {
        self.strategies.insert(reader_name.into(), strategy);
    }

    pub fn event_count(&self, reader_name: &str) -> usize {
        self.events.get(reader_name).map_or(0, Vec::len)
    }

    /// Reference/follower time pairs for one reader, per its strategy.
    fn pairs(&self, reader_name: &str) -> Vec<(f64, f64)> {
        let Some(reference) = self.reference_reader.as_deref() else {
            return Vec::new();
        };
        let reference_events = match self.events.get(reference) {
            Some(events) if !events.is_empty() => events,
            _ => return Vec::new(),
        };
        let follower_events = match self.events.get(reader_name) {
            Some(events) if !events.is_empty() => events,
            _ => return Vec::new(),
        };
        let strategy = self.strategies.get(reader_name).copied().unwrap_or_default();
        match strategy {
            PairingStrategy::Closest => closest_pairs(reference_events, follower_events),
            PairingStrategy::Latest => index_pairs(reference_events, follower_events),
            PairingStrategy::Keyed => keyed_pairs(reference_events, follower_events),
        }
    }

    /// Follower-to-reference offset at reference time `t`.
    ///
    /// Takes the most recent pair whose reference time is at or before `t`
    /// and returns `delta = t_ref - t_follower`, so adding `delta` moves a
    /// follower time onto the reference clock. `None` until an eligible
    /// pair exists; the
    /// reference reader itself is always at offset zero.
    pub fn offset_at(&self, reader_name: &str, t_reference: f64) -> Option<f64> {
        if self.reference_reader.as_deref() == Some(reader_name) {
            return Some(0.0);
        }
        let pair = self
            .pairs(reader_name)
            .into_iter()
            .take_while(|(t_ref, _)| *t_ref <= t_reference)
            .last()?;
        let delta = pair.0 - pair.1;
        debug!(reader = reader_name, t_reference, delta, "sync offset estimated");
        Some(delta)
    }
}

impl SyncEventSink for SyncRegistry {
    fn record_event(&mut self, reader_name: &str, time: f64, key: SyncKey) {
        self.events
            .entry(reader_name.to_string())
            .or_default()
            .push(SyncEvent { time, key });
    }
}

/// Closest-in-time pairing: a reference and a follower event pair up when
/// each is the other's nearest neighbor in time. Events whose partner was
/// dropped by the other reader stay unmatched instead of stealing a later
/// event. Assumes offsets are small compared to the sync interval.
fn closest_pairs(reference: &[SyncEvent], follower: &[SyncEvent]) -> Vec<(f64, f64)> {
    let nearest_follower = nearest_indices(reference, follower);
    let nearest_reference = nearest_indices(follower, reference);
    reference
        .iter()
        .enumerate()
        .filter_map(|(i, reference_event)| {
            let j = nearest_follower[i];
            (nearest_reference[j] == i).then(|| (reference_event.time, follower[j].time))
        })
        .collect()
}

/// For each event in `from` (sorted), the index of the time-nearest event
/// in `to` (sorted, non-empty).
fn nearest_indices(from: &[SyncEvent], to: &[SyncEvent]) -> Vec<usize> {
    let mut result = Vec::with_capacity(from.len());
    let mut j = 0;
    for event in from {
        while j + 1 < to.len()
            && (to[j + 1].time - event.time).abs() <= (to[j].time - event.time).abs()
        {
            j += 1;
        }
        result.push(j);
    }
    result
}

/// Pair events by arrival index. Assumes both readers reliably record sync
/// events in pairs, in order; makes no assumption about offset size.
fn index_pairs(reference: &[SyncEvent], follower: &[SyncEvent]) -> Vec<(f64, f64)> {
    reference
        .iter()
        .zip(follower)
        .map(|(r, f)| (r.time, f.time))
        .collect()
}

/// Join on equal pairing keys.
fn keyed_pairs(reference: &[SyncEvent], follower: &[SyncEvent]) -> Vec<(f64, f64)> {
    let mut pairs: Vec<(f64, f64)> = reference
        .iter()
        .filter_map(|r| {
            follower
                .iter()
                .find(|f| f.key == r.key)
                .map(|f| (r.time, f.time))
        })
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_all(registry: &mut SyncRegistry, reader: &str, times: &[f64]) {
        for (i, t) in times.iter().enumerate() {
            registry.record_event(reader, *t, SyncKey::Index(i as u64));
        }
    }

    #[test]
    fn reference_reader_has_zero_offset() {
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        record_all(&mut registry, "ref", &[1.0]);
        assert_eq!(registry.offset_at("ref", 100.0), Some(0.0));
    }

    #[test]
    fn offset_uses_most_recent_pair_at_or_before_query_time() {
        // Reference sync at 1, 11, 21; follower drifting at 1.05x.
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        record_all(&mut registry, "ref", &[1.0, 11.0, 21.0]);
        record_all(&mut registry, "follower", &[1.05, 11.55, 22.05]);

        // At t=10 only the first pair is eligible.
        let delta = registry.offset_at("follower", 10.0).unwrap();
        assert!((delta - (1.0 - 1.05)).abs() < 1e-12);
        // At t=20 the second pair wins.
        let delta = registry.offset_at("follower", 20.0).unwrap();
        assert!((delta - (11.0 - 11.55)).abs() < 1e-12);
    }

    #[test]
    fn no_pairs_yet_means_no_estimate() {
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        record_all(&mut registry, "follower", &[1.0]);
        assert_eq!(registry.offset_at("follower", 10.0), None);
        // A pair arriving after the query time is not eligible either.
        record_all(&mut registry, "ref", &[20.0]);
        assert_eq!(registry.offset_at("follower", 10.0), None);
    }

    #[test]
    fn closest_pairing_survives_dropped_follower_events() {
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        record_all(&mut registry, "ref", &[1.0, 11.0, 21.0, 31.0]);
        // Follower missed the sync near 11.
        record_all(&mut registry, "follower", &[1.02, 21.04, 31.06]);

        let delta = registry.offset_at("follower", 35.0).unwrap();
        assert!((delta - (31.0 - 31.06)).abs() < 1e-9);
        // The pair near 21 is intact despite the gap.
        let delta = registry.offset_at("follower", 25.0).unwrap();
        assert!((delta - (21.0 - 21.04)).abs() < 1e-9);
    }

    #[test]
    fn latest_strategy_pairs_by_index() {
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        registry.set_strategy("follower", PairingStrategy::Latest);
        record_all(&mut registry, "ref", &[1.0, 11.0]);
        // Large constant offset, fine for index pairing.
        record_all(&mut registry, "follower", &[101.0, 111.2]);
        let delta = registry.offset_at("follower", 12.0).unwrap();
        assert!((delta - (11.0 - 111.2)).abs() < 1e-9);
    }

    #[test]
    fn keyed_strategy_joins_on_keys() {
        let mut registry = SyncRegistry::new(Some("ref".to_string()));
        registry.set_strategy("follower", PairingStrategy::Keyed);
        registry.record_event("ref", 1.0, SyncKey::Text("a".into()));
        registry.record_event("ref", 11.0, SyncKey::Text("b".into()));
        // Follower saw them out of order and with an extra event.
        registry.record_event("follower", 2.5, SyncKey::Text("x".into()));
        registry.record_event("follower", 11.4, SyncKey::Text("b".into()));
        registry.record_event("follower", 1.4, SyncKey::Text("a".into()));

        let delta = registry.offset_at("follower", 20.0).unwrap();
        assert!((delta - (11.0 - 11.4)).abs() < 1e-9);
        let delta = registry.offset_at("follower", 5.0).unwrap();
        assert!((delta - (1.0 - 1.4)).abs() < 1e-9);
    }
}
