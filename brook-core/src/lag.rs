//! Consumer lag reporting.

use std::fmt;

/// How far a consumer group is behind the end of a stream.
///
/// `lower` is the committed position (or the start of the log for a group
/// that never committed), `upper` is the end of the log. Aggregated across
/// partitions by summing both bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Lag {
    /// Committed position bound.
    pub lower: u64,
    /// End-of-log bound.
    pub upper: u64,
}

impl Lag {
    /// Creates a lag from its bounds.
    ///
    /// # Panics
    /// Panics if `lower > upper` (indicates a bookkeeping bug).
    #[must_use]
    pub fn new(lower: u64, upper: u64) -> Self {
        assert!(lower <= upper, "lag lower bound {lower} > upper bound {upper}");
        Self { lower, upper }
    }

    /// Returns the number of records not yet committed.
    #[must_use]
    pub const fn lag(&self) -> u64 {
        self.upper - self.lower
    }

    /// Returns true if the group is caught up.
    #[must_use]
    pub const fn is_caught_up(&self) -> bool {
        self.lower == self.upper
    }

    /// Sums per-partition lags into a stream-level lag.
    #[must_use]
    pub fn aggregate(parts: impl IntoIterator<Item = Self>) -> Self {
        parts.into_iter().fold(Self::default(), |acc, part| Self {
            lower: acc.lower + part.lower,
            upper: acc.upper + part.upper,
        })
    }
}

impl fmt::Display for Lag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lag={} [{}, {}]", self.lag(), self.lower, self.upper)
    }
}
