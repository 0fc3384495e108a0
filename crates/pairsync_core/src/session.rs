//! Session, options and statistics shared by both peers of a run.

use crate::filter::FilterSet;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An open sync session on one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSession {
    /// Session id, shared by both peers of a run.
    pub id: Uuid,
    /// Peer clock reading when the session opened. Upper bound of the
    /// peer's export window.
    pub started_on: Timestamp,
}

/// Per-run options.
///
/// Persisted by the caller between runs so the cursors carry over.
/// Filters hold closures and are not serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncOptions {
    /// Start of the next client export window.
    pub last_synced_on_client: Timestamp,
    /// Start of the next server export window.
    pub last_synced_on_server: Timestamp,
    /// Session filters, combined with each peer's own filters.
    #[serde(skip)]
    pub filters: FilterSet,
    /// Free-form values passed to the peers.
    pub values: BTreeMap<String, String>,
    /// Keep incoming `modified_on` instead of stamping the receiver's clock.
    pub maintain_modified_on: bool,
    /// Include messages in returned issues.
    pub include_issue_details: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            last_synced_on_client: Timestamp::MIN,
            last_synced_on_server: Timestamp::MIN,
            filters: FilterSet::new(),
            values: BTreeMap::new(),
            maintain_modified_on: true,
            include_issue_details: true,
        }
    }
}

impl SyncOptions {
    /// Creates options for an initial sync.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session filters.
    pub fn with_filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    /// Sets both cursors.
    pub fn with_cursors(mut self, client: Timestamp, server: Timestamp) -> Self {
        self.last_synced_on_client = client;
        self.last_synced_on_server = server;
        self
    }

    /// Adds a free-form value.
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Sets whether incoming `modified_on` is kept.
    pub fn with_maintain_modified_on(mut self, maintain: bool) -> Self {
        self.maintain_modified_on = maintain;
        self
    }

    /// Sets whether issue messages are returned.
    pub fn with_issue_details(mut self, include: bool) -> Self {
        self.include_issue_details = include;
        self
    }

    /// Returns a free-form value.
    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Counters reported by one peer for one session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    /// Objects returned by `get_changes`.
    pub changes_exported: u64,
    /// Objects that altered the store during `apply_changes`.
    pub changes_applied: u64,
    /// Objects returned by `get_corrections`.
    pub corrections_exported: u64,
    /// Objects that altered the store during `apply_corrections`.
    pub corrections_applied: u64,
    /// Issues produced while applying.
    pub issues: u64,
    /// Objects that altered the store in the last apply call.
    pub individual_process_count: u64,
    /// Number of apply calls received.
    pub passes: u32,
    /// True when the last apply call altered nothing.
    pub is_reset: bool,
}

impl SyncStatistics {
    /// Records one apply call.
    pub fn record_apply(&mut self, processed: u64, issues: u64) {
        self.passes += 1;
        self.changes_applied += processed;
        self.issues += issues;
        self.individual_process_count = processed;
        self.is_reset = processed == 0;
    }

    /// Records one correction apply call.
    pub fn record_corrections(&mut self, processed: u64, issues: u64) {
        self.corrections_applied += processed;
        self.issues += issues;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_defaults() {
        let options = SyncOptions::new();
        assert!(options.last_synced_on_client.is_min());
        assert!(options.last_synced_on_server.is_min());
        assert!(options.maintain_modified_on);
        assert!(options.include_issue_details);
        assert!(options.filters.is_empty());
    }

    #[test]
    fn options_json_keeps_cursors() {
        let options = SyncOptions::new()
            .with_cursors(Timestamp::from_micros(5), Timestamp::from_micros(8))
            .with_value("tenant", "north")
            .with_maintain_modified_on(false);

        let json = serde_json::to_string(&options).unwrap();
        let back: SyncOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back.last_synced_on_client, Timestamp::from_micros(5));
        assert_eq!(back.last_synced_on_server, Timestamp::from_micros(8));
        assert_eq!(back.value("tenant"), Some("north"));
        assert!(!back.maintain_modified_on);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let back: SyncOptions = serde_json::from_str("{}").unwrap();
        assert!(back.last_synced_on_client.is_min());
        assert!(back.include_issue_details);
    }

    #[test]
    fn statistics_reset_tracks_last_apply() {
        let mut stats = SyncStatistics::default();
        stats.record_apply(3, 1);
        assert!(!stats.is_reset);
        assert_eq!(stats.individual_process_count, 3);

        stats.record_apply(0, 0);
        assert!(stats.is_reset);
        assert_eq!(stats.changes_applied, 3);
        assert_eq!(stats.issues, 1);
        assert_eq!(stats.passes, 2);
    }
}
