//! Bounded retry of transient backend failures.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::warn;

use brook_core::{StreamError, StreamResult};

/// Exponential backoff with a hard deadline.
///
/// Only errors classified retryable by [`StreamError::is_retryable`] are
/// retried; everything else is surfaced immediately. When the deadline
/// elapses, the last error is surfaced unchanged so the caller sees the
/// real failure, not a wrapper.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    initial_delay: Duration,
    max_delay: Duration,
    deadline: Duration,
}

impl RetryPolicy {
    /// Creates a policy that retries for up to `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            deadline,
        }
    }

    /// Sets the first backoff delay.
    #[must_use]
    pub const fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the backoff cap.
    #[must_use]
    pub const fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Runs `attempt` until it succeeds, fails non-retryably, or the
    /// deadline elapses.
    ///
    /// # Errors
    /// Returns the first non-retryable error, or the last retryable error
    /// once the deadline has passed.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut attempt: F) -> StreamResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StreamResult<T>>,
    {
        let started = Instant::now();
        let mut delay = self.initial_delay;
        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => {
                    if started.elapsed() + delay > self.deadline {
                        return Err(err);
                    }
                    warn!(operation, error = %err, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
            }
        }
    }
}
