//! Timestamps and the injected clock capability.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A point in time, in microseconds since the Unix epoch.
///
/// Timestamps from different stores are only compared through the change
/// window of the store that produced them.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The earliest representable timestamp. A cursor at `MIN` means
    /// "never synced".
    pub const MIN: Timestamp = Timestamp(i64::MIN);

    /// The latest representable timestamp.
    pub const MAX: Timestamp = Timestamp(i64::MAX);

    /// Creates a timestamp from microseconds since the epoch.
    #[must_use]
    pub const fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    /// Returns microseconds since the epoch.
    #[must_use]
    pub const fn as_micros(&self) -> i64 {
        self.0
    }

    /// Returns a timestamp `micros` later, saturating at the bounds.
    #[must_use]
    pub const fn add_micros(&self, micros: i64) -> Self {
        Self(self.0.saturating_add(micros))
    }

    /// Returns true if this is the "never synced" sentinel.
    #[must_use]
    pub const fn is_min(&self) -> bool {
        self.0 == i64::MIN
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::MIN => write!(f, "Timestamp(MIN)"),
            Self::MAX => write!(f, "Timestamp(MAX)"),
            Self(micros) => write!(f, "Timestamp({micros})"),
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Source of "now" for a store, an engine or a test.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Timestamp(i64::try_from(micros).unwrap_or(i64::MAX))
    }
}

/// A deterministic clock for tests.
///
/// Every call to `now()` returns the current value and then advances it by
/// `step` microseconds, so two writes never share a timestamp.
#[derive(Debug)]
pub struct ManualClock {
    current: AtomicI64,
    step: i64,
}

impl ManualClock {
    /// Creates a clock starting at `start` that ticks by one microsecond.
    pub fn new(start: Timestamp) -> Self {
        Self::with_step(start, 1)
    }

    /// Creates a clock starting at `start` that ticks by `step`.
    pub fn with_step(start: Timestamp, step: i64) -> Self {
        Self {
            current: AtomicI64::new(start.as_micros()),
            step,
        }
    }

    /// Returns the current value without advancing.
    pub fn peek(&self) -> Timestamp {
        Timestamp(self.current.load(Ordering::SeqCst))
    }

    /// Moves the clock to `at`.
    pub fn set(&self, at: Timestamp) {
        self.current.store(at.as_micros(), Ordering::SeqCst);
    }

    /// Moves the clock forward by `micros`.
    pub fn advance(&self, micros: i64) {
        self.current.fetch_add(micros, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.current.fetch_add(self.step, Ordering::SeqCst))
    }
}
