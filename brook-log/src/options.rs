//! Tunables shared by the manager and the backends.

use std::time::Duration;

/// When a sealed segment becomes reclaimable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetentionPolicy {
    /// A segment may be reclaimed once every known consumer group has
    /// committed past its last record. Requires at least one group to
    /// have committed on the partition; with no groups nothing is ever
    /// reclaimed.
    UntilCommitted,
    /// A segment may be reclaimed once its roll cycle ended longer than
    /// this ago, whether or not it was consumed.
    Ttl(Duration),
}

/// Configuration for opening a log manager.
///
/// Built with `with_*` setters:
///
/// ```
/// use std::time::Duration;
/// use brook_log::OpenOptions;
///
/// let options = OpenOptions::new()
///     .with_roll_cycle(Duration::from_secs(3600))
///     .with_poll_interval(Duration::from_millis(20));
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    /// Wall-clock cycle after which the file backend rolls to a new
    /// segment.
    pub roll_cycle: Duration,
    /// When sealed segments become reclaimable.
    pub retention: RetentionPolicy,
    /// How long a driver retries transient backend failures before
    /// surfacing them.
    pub connection_timeout: Duration,
    /// How long a tailer sleeps between empty scans of its partitions.
    pub poll_interval: Duration,
    /// Upper bound on a single append before it fails with a timeout.
    pub append_timeout: Duration,
}

impl OpenOptions {
    /// Creates options with the defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            roll_cycle: Duration::from_secs(24 * 60 * 60),
            retention: RetentionPolicy::UntilCommitted,
            connection_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(20),
            append_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the segment roll cycle.
    #[must_use]
    pub const fn with_roll_cycle(mut self, roll_cycle: Duration) -> Self {
        self.roll_cycle = roll_cycle;
        self
    }

    /// Sets the retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Sets the transient-failure retry deadline.
    #[must_use]
    pub const fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Sets the tailer poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the per-append deadline.
    #[must_use]
    pub const fn with_append_timeout(mut self, timeout: Duration) -> Self {
        self.append_timeout = timeout;
        self
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new()
    }
}
