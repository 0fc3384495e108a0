//! Change feed for observing committed repository changes.
//!
//! Every repository owns a feed. On `save()` the repository emits one
//! [`CollectionChange`] per commit, listing the `(sync_id, local_id)` pairs
//! that were written and removed. Two kinds of observers exist:
//!
//! - [`CollectionListener`]s are invoked synchronously, while the
//!   repository's write lock is still held. The ID cache is one.
//! - Channel subscribers receive a copy of each change after the
//!   listeners ran, for reactive consumers.
//!
//! # Usage
//!
//! ```rust,ignore
//! let repo = db.repository::<Address>()?;
//! let rx = repo.feed().subscribe();
//!
//! repo.add(address);
//! repo.save()?;
//!
//! let change = rx.recv()?;
//! assert_eq!(change.type_name, "Address");
//! ```

use crate::entity::LocalId;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use uuid::Uuid;

/// Observer invoked inside a repository commit.
///
/// Implementations must not call back into the repository that notified
/// them.
pub trait CollectionListener: Send + Sync {
    /// Called once per commit with the rows written and removed.
    fn on_collection_changed(
        &self,
        type_name: &str,
        added: &[(Uuid, LocalId)],
        removed: &[(Uuid, LocalId)],
    );
}

/// One committed change to a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionChange {
    /// Feed-local sequence number of the commit.
    pub sequence: u64,
    /// Entity type of the repository.
    pub type_name: String,
    /// Rows inserted or updated in the commit.
    pub added: Vec<(Uuid, LocalId)>,
    /// Rows permanently removed in the commit.
    pub removed: Vec<(Uuid, LocalId)>,
}

impl CollectionChange {
    /// Returns true if the commit touched no rows.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Distributes committed changes to listeners and subscribers.
pub struct ChangeFeed {
    listeners: RwLock<Vec<Arc<dyn CollectionListener>>>,
    subscribers: RwLock<Vec<Sender<CollectionChange>>>,
    history: RwLock<Vec<CollectionChange>>,
    max_history: usize,
    sequence: AtomicU64,
}

impl ChangeFeed {
    /// Creates a new change feed.
    pub fn new() -> Self {
        Self::with_max_history(1024)
    }

    /// Creates a change feed with a specific history limit.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(Vec::new()),
            max_history,
            sequence: AtomicU64::new(0),
        }
    }

    /// Registers a synchronous listener.
    pub fn listen(&self, listener: Arc<dyn CollectionListener>) {
        self.listeners.write().push(listener);
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that gets every future change. It should be
    /// drained regularly to avoid unbounded memory growth.
    pub fn subscribe(&self) -> Receiver<CollectionChange> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits a commit.
    ///
    /// Listeners run first, on the caller's thread. Empty commits are
    /// dropped and return `None`.
    pub fn emit(
        &self,
        type_name: &str,
        added: Vec<(Uuid, LocalId)>,
        removed: Vec<(Uuid, LocalId)>,
    ) -> Option<CollectionChange> {
        if added.is_empty() && removed.is_empty() {
            return None;
        }

        for listener in self.listeners.read().iter() {
            listener.on_collection_changed(type_name, &added, &removed);
        }

        let change = CollectionChange {
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            type_name: type_name.to_string(),
            added,
            removed,
        };

        {
            let mut history = self.history.write();
            history.push(change.clone());
            if history.len() > self.max_history {
                let to_remove = history.len() - self.max_history;
                history.drain(0..to_remove);
            }
        }

        // Drop disconnected subscribers
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(change.clone()).is_ok());

        Some(change)
    }

    /// Returns changes with sequence > cursor, up to limit.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<CollectionChange> {
        self.history
            .read()
            .iter()
            .filter(|c| c.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the latest sequence number emitted.
    pub fn latest_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Returns the number of synchronous listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns the number of active channel subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.subscriber_count())
            .field("sequence", &self.latest_sequence())
            .finish()
    }
}
