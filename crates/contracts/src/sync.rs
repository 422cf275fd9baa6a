//! Clock sync contracts shared between the router and the offset estimator.

use serde::{Deserialize, Serialize};

/// How to pick pairs of sync event timestamps when estimating a reader's
/// clock offset against the reference reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingStrategy {
    /// Greedy match: each reference event in order pairs with the remaining
    /// follower event closest in time. Assumes initial offset and drift are
    /// small compared to the sync interval; robust to dropped events.
    #[default]
    Closest,

    /// Pair the latest event from each list. Assumes both readers reliably
    /// record sync events in pairs; makes no assumption about offset size.
    Latest,

    /// Join on equal pairing keys.
    Keyed,
}

/// Per-reader sync descriptor from the config document.
///
/// Either the reader observes sync events in one of its own buffers
/// (`buffer_name` + `filter`), or it borrows another reader's sync list
/// (`reader_name`). The two forms are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReaderSyncConfig {
    /// Whether this reader carries the canonical reference clock.
    #[serde(default)]
    pub is_reference: bool,

    /// Name of the buffer that will contain clock sync events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buffer_name: Option<String>,

    /// Predicate expression selecting sync events, evaluated per event with
    /// `value`, `values`, and `time` bound. Absent means every event counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    /// Expression computing a pairing key per sync event; absent means the
    /// running event index is the key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_key: Option<String>,

    /// Borrow the named reader's sync list instead of observing our own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reader_name: Option<String>,

    /// Pair selection strategy.
    #[serde(default)]
    pub pairing_strategy: PairingStrategy,
}

impl ReaderSyncConfig {
    /// Whether this config observes sync events itself (vs. borrowing).
    pub fn observes(&self) -> bool {
        self.buffer_name.is_some()
    }
}

/// Identity of one sync event for keyed pairing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncKey {
    /// Running index of the event within its reader's sync list.
    Index(u64),
    /// Key computed by the configured `pairing_key` expression.
    Text(String),
}

/// Destination for sync events observed during routing.
///
/// Implemented by the sync registry; the router stays decoupled from the
/// estimator behind this seam.
pub trait SyncEventSink {
    fn record_event(&mut self, reader_name: &str, time: f64, key: SyncKey);
}
