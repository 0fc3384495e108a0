//! Field-granular last-writer-wins merging.
//!
//! An entity keeps one [`FieldStamps`] map recording when each field was
//! last written. [`FieldMerger`] walks the fields of a local record and an
//! incoming update and takes the update's value only where the update's
//! stamp is strictly newer. Ties keep the local value, so concurrent edits
//! to different fields of the same record never clobber each other.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-field write times of one record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldStamps(BTreeMap<String, Timestamp>);

impl FieldStamps {
    /// Creates an empty stamp map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a write of `field` at `at`.
    pub fn touch(&mut self, field: &str, at: Timestamp) {
        self.0.insert(field.to_string(), at);
    }

    /// Returns the write time of `field`, if it was ever stamped.
    pub fn get(&self, field: &str) -> Option<Timestamp> {
        self.0.get(field).copied()
    }

    /// Returns the newest stamp, if any.
    pub fn latest(&self) -> Option<Timestamp> {
        self.0.values().max().copied()
    }

    /// Number of stamped fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if no field is stamped.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Merges one incoming update into a local record.
///
/// Fields without a stamp fall back to the record's base time (usually
/// `created_on`).
///
/// ```rust,ignore
/// let mut merger = FieldMerger::new(&self.stamps, self.created_on, &update.stamps, update.created_on, exclusions);
/// merger.field("line1", &mut self.line1, &update.line1);
/// merger.field("city", &mut self.city, &update.city);
/// let (changed, stamps) = merger.finish();
/// self.stamps = stamps;
/// ```
#[derive(Debug)]
pub struct FieldMerger<'a> {
    merged: FieldStamps,
    local_base: Timestamp,
    update: &'a FieldStamps,
    update_base: Timestamp,
    exclusions: &'a [&'a str],
    changed: bool,
}

impl<'a> FieldMerger<'a> {
    /// Starts a merge.
    pub fn new(
        local: &FieldStamps,
        local_base: Timestamp,
        update: &'a FieldStamps,
        update_base: Timestamp,
        exclusions: &'a [&'a str],
    ) -> Self {
        Self {
            merged: local.clone(),
            local_base,
            update,
            update_base,
            exclusions,
            changed: false,
        }
    }

    /// Merges one field. Returns true if the update's value was taken.
    pub fn field<V: PartialEq + Clone>(&mut self, name: &str, local: &mut V, update: &V) -> bool {
        if self.exclusions.contains(&name) {
            return false;
        }

        let local_stamp = self.merged.get(name).unwrap_or(self.local_base);
        let update_stamp = self.update.get(name).unwrap_or(self.update_base);
        if update_stamp <= local_stamp {
            return false;
        }

        self.merged.touch(name, update_stamp);
        if *local != *update {
            *local = update.clone();
            self.changed = true;
        }
        true
    }

    /// Returns true if a field value changed so far.
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Finishes the merge, returning whether anything changed and the new
    /// stamps for the local record.
    pub fn finish(self) -> (bool, FieldStamps) {
        (self.changed, self.merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ts(micros: i64) -> Timestamp {
        Timestamp::from_micros(micros)
    }

    #[test]
    fn newer_update_wins() {
        let mut local_stamps = FieldStamps::new();
        local_stamps.touch("name", ts(10));
        let mut update_stamps = FieldStamps::new();
        update_stamps.touch("name", ts(20));

        let mut name = "local".to_string();
        let mut merger = FieldMerger::new(&local_stamps, ts(0), &update_stamps, ts(0), &[]);
        assert!(merger.field("name", &mut name, &"remote".to_string()));
        let (changed, stamps) = merger.finish();

        assert!(changed);
        assert_eq!(name, "remote");
        assert_eq!(stamps.get("name"), Some(ts(20)));
    }

    #[test]
    fn tie_keeps_local() {
        let mut stamps = FieldStamps::new();
        stamps.touch("name", ts(10));

        let mut name = "local".to_string();
        let mut merger = FieldMerger::new(&stamps, ts(0), &stamps, ts(0), &[]);
        assert!(!merger.field("name", &mut name, &"remote".to_string()));
        assert!(!merger.changed());
        assert_eq!(name, "local");
    }

    #[test]
    fn disjoint_fields_both_survive() {
        let mut local_stamps = FieldStamps::new();
        local_stamps.touch("city", ts(30));
        let mut update_stamps = FieldStamps::new();
        update_stamps.touch("line1", ts(40));

        let mut line1 = "1 Old St".to_string();
        let mut city = "Lagos".to_string();
        let mut merger = FieldMerger::new(&local_stamps, ts(1), &update_stamps, ts(1), &[]);
        merger.field("line1", &mut line1, &"2 New St".to_string());
        merger.field("city", &mut city, &"Accra".to_string());
        let (changed, stamps) = merger.finish();

        assert!(changed);
        assert_eq!(line1, "2 New St");
        assert_eq!(city, "Lagos");
        assert_eq!(stamps.get("line1"), Some(ts(40)));
        assert_eq!(stamps.get("city"), Some(ts(30)));
    }

    #[test]
    fn exclusions_are_skipped() {
        let local_stamps = FieldStamps::new();
        let mut update_stamps = FieldStamps::new();
        update_stamps.touch("sync_id", ts(50));

        let mut value = 1;
        let mut merger = FieldMerger::new(&local_stamps, ts(0), &update_stamps, ts(0), &["sync_id"]);
        assert!(!merger.field("sync_id", &mut value, &2));
        assert_eq!(value, 1);
    }

    #[test]
    fn same_value_newer_stamp_is_not_a_change() {
        let local_stamps = FieldStamps::new();
        let mut update_stamps = FieldStamps::new();
        update_stamps.touch("name", ts(5));

        let mut name = "same".to_string();
        let mut merger = FieldMerger::new(&local_stamps, ts(0), &update_stamps, ts(0), &[]);
        assert!(merger.field("name", &mut name, &"same".to_string()));
        let (changed, stamps) = merger.finish();
        assert!(!changed);
        assert_eq!(stamps.get("name"), Some(ts(5)));
    }

    #[test]
    fn latest_stamp() {
        let mut stamps = FieldStamps::new();
        assert!(stamps.latest().is_none());
        stamps.touch("a", ts(3));
        stamps.touch("b", ts(9));
        assert_eq!(stamps.latest(), Some(ts(9)));
        assert_eq!(stamps.len(), 2);
    }

    fn replica(value: i32, stamp: i64) -> (i32, FieldStamps) {
        let mut stamps = FieldStamps::new();
        stamps.touch("v", ts(stamp));
        (value, stamps)
    }

    fn merged(local: &(i32, FieldStamps), update: &(i32, FieldStamps)) -> (i32, FieldStamps) {
        let mut value = local.0;
        let mut merger = FieldMerger::new(&local.1, ts(0), &update.1, ts(0), &[]);
        merger.field("v", &mut value, &update.0);
        (value, merger.finish().1)
    }

    proptest! {
        #[test]
        fn both_directions_agree(a in 0i32..100, b in 0i32..100, sa in 1i64..1000, sb in 1i64..1000) {
            prop_assume!(sa != sb);
            let left = replica(a, sa);
            let right = replica(b, sb);

            let on_left = merged(&left, &right);
            let on_right = merged(&right, &left);
            prop_assert_eq!(on_left.0, on_right.0);
            prop_assert_eq!(on_left.1, on_right.1);
        }
    }
}
