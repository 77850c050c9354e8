//! The exclusive writer for one partition.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, trace};

use brook_core::{LogPartition, Position, Record, StreamError, StreamName, StreamResult};

use crate::manager::ManagerInner;

/// Exclusive append handle for one partition.
///
/// At most one appender per partition is live per manager; the slot is
/// released on [`close`](Self::close) or drop. Appends are acknowledged
/// only once the backend has made the record durable, and every
/// acknowledged position is strictly greater than the previous one.
#[derive(Debug)]
pub struct Appender {
    inner: Arc<ManagerInner>,
    partition: LogPartition,
    closed: AtomicBool,
}

impl Appender {
    pub(crate) fn new(inner: Arc<ManagerInner>, partition: LogPartition) -> Self {
        Self {
            inner,
            partition,
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the stream this appender writes to.
    #[must_use]
    pub const fn name(&self) -> &StreamName {
        &self.partition.stream
    }

    /// Returns the partition this appender writes to.
    #[must_use]
    pub const fn partition(&self) -> &LogPartition {
        &self.partition
    }

    /// Durably appends one record, returning its assigned position.
    ///
    /// Waits at most the configured append timeout for the backend to
    /// acknowledge; on timeout the record may or may not have been
    /// written, and the caller decides whether to retry. The write
    /// itself is never cancelled: a timed-out append runs to completion
    /// in the background so the backend's offset accounting stays
    /// consistent, only the wait is bounded.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] if this appender or its manager is
    /// closed, [`StreamError::AppendTimeout`] if the deadline elapsed, or
    /// a backend error.
    pub async fn append(&self, record: Record) -> StreamResult<Position> {
        self.ensure_open()?;
        let timeout = self.inner.options.append_timeout;
        let driver = Arc::clone(&self.inner.driver);
        let partition = self.partition.clone();
        let write = tokio::spawn(async move { driver.append(&partition, record).await });
        let position = match tokio::time::timeout(timeout, write).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join)) => return Err(StreamError::backend("append", join)),
            Err(_) => {
                return Err(StreamError::AppendTimeout {
                    partition: self.partition.clone(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        };
        trace!(partition = %self.partition, position = %position, "appended record");
        Ok(position)
    }

    /// Appends records in order, returning their positions.
    ///
    /// Stops at the first failure; records before it are durable.
    ///
    /// # Errors
    /// Same conditions as [`Self::append`].
    pub async fn append_batch(&self, records: Vec<Record>) -> StreamResult<Vec<Position>> {
        let mut positions = Vec::with_capacity(records.len());
        for record in records {
            positions.push(self.append(record).await?);
        }
        Ok(positions)
    }

    /// Returns true once this appender has been closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.inner.ensure_open().is_err()
    }

    /// Closes the appender and releases the partition's writer slot.
    ///
    /// Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(partition = %self.partition, "closed appender");
            self.inner.release_appender(&self.partition);
        }
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed { resource: "appender" });
        }
        self.inner.ensure_open()
    }
}

impl Drop for Appender {
    fn drop(&mut self) {
        self.close();
    }
}
