//! Windowed change requests and paged responses.

use crate::object::SyncObject;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};

/// A change-export or change-import call.
///
/// The window is half-open: `since <= modified_on < until`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRequest {
    /// Inclusive lower bound.
    pub since: Timestamp,
    /// Exclusive upper bound.
    pub until: Timestamp,
    /// Number of objects to skip (paging).
    pub skip: usize,
    /// Objects to apply. Empty for exports.
    pub collection: Vec<SyncObject>,
}

impl SyncRequest {
    /// Creates an export request for `[since, until)` starting at `skip`.
    pub fn window(since: Timestamp, until: Timestamp, skip: usize) -> Self {
        Self {
            since,
            until,
            skip,
            collection: Vec::new(),
        }
    }

    /// Creates an apply request carrying `collection`.
    pub fn apply(since: Timestamp, until: Timestamp, collection: Vec<SyncObject>) -> Self {
        Self {
            since,
            until,
            skip: 0,
            collection,
        }
    }

    /// Returns true if `at` falls inside the window.
    pub fn contains(&self, at: Timestamp) -> bool {
        at >= self.since && at < self.until
    }

    /// Returns true if the window starts at the beginning of time.
    pub fn is_initial(&self) -> bool {
        self.since.is_min()
    }
}

/// One page of a result.
///
/// `total_count` does not depend on paging, so the caller knows whether
/// more pages exist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse<T> {
    /// Offset of the first item.
    pub skip: usize,
    /// Size of the whole result.
    pub total_count: usize,
    /// Items on this page.
    pub collection: Vec<T>,
}

impl<T> SyncResponse<T> {
    /// Creates a page.
    pub fn new(skip: usize, total_count: usize, collection: Vec<T>) -> Self {
        Self {
            skip,
            total_count,
            collection,
        }
    }

    /// Creates a single page holding the whole result.
    pub fn complete(collection: Vec<T>) -> Self {
        Self::new(0, collection.len(), collection)
    }

    /// Offset just past this page.
    pub fn next_skip(&self) -> usize {
        self.skip + self.collection.len()
    }

    /// Returns true if items remain after this page.
    pub fn has_more(&self) -> bool {
        !self.collection.is_empty() && self.next_skip() < self.total_count
    }
}

impl<T> Default for SyncResponse<T> {
    fn default() -> Self {
        Self::new(0, 0, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_half_open() {
        let request = SyncRequest::window(Timestamp::from_micros(10), Timestamp::from_micros(20), 0);
        assert!(request.contains(Timestamp::from_micros(10)));
        assert!(request.contains(Timestamp::from_micros(19)));
        assert!(!request.contains(Timestamp::from_micros(20)));
        assert!(!request.contains(Timestamp::from_micros(9)));
        assert!(!request.is_initial());
        assert!(SyncRequest::window(Timestamp::MIN, Timestamp::MAX, 0).is_initial());
    }

    #[test]
    fn paging() {
        let page = SyncResponse::new(0, 5, vec![1, 2]);
        assert!(page.has_more());
        assert_eq!(page.next_skip(), 2);

        let last = SyncResponse::new(4, 5, vec![5]);
        assert!(!last.has_more());

        let empty: SyncResponse<u8> = SyncResponse::new(2, 5, Vec::new());
        assert!(!empty.has_more());
        assert_eq!(SyncResponse::complete(vec!['a']).total_count, 1);
    }
}
