//! Injectable time source.
//!
//! Segment rolling is driven by wall-clock boundaries, so the file backend
//! takes a [`Clock`] instead of calling the system time directly. Tests
//! advance a [`SimulatedClock`] to cross roll boundaries deterministically.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::record::Timestamp;

/// A source of the current time in epoch milliseconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn now_millis(&self) -> i64;

    /// Returns the current time as a record timestamp.
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.now_millis())
    }
}

/// The real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        Timestamp::now().as_millis()
    }
}

/// A manually advanced clock for tests.
///
/// Clones share the same underlying time.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    millis: Arc<AtomicI64>,
}

impl SimulatedClock {
    /// Creates a clock starting at the given epoch millisecond.
    #[must_use]
    pub fn starting_at(millis: i64) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(millis)),
        }
    }

    /// Advances the clock.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Durations in tests are small.
    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute time.
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for SimulatedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
