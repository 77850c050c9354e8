//! The resumable reader for a consumer group.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use brook_core::{GroupName, LogEntry, LogPartition, Offset, StreamError, StreamResult};

use crate::driver::{ReadOutcome, ReaderId, SeekTarget};
use crate::manager::ManagerInner;

/// Lifecycle of a tailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailerState {
    /// Created, no position chosen yet. The first poll seeks to the
    /// group's last committed positions.
    Uninitialized,
    /// A seek is in progress (or failed partway).
    Seeking,
    /// Cursors are positioned; nothing delivered since the last seek.
    FoundPosition,
    /// At least one record was delivered (or a poll came back empty);
    /// waiting for more data.
    WaitingForNext,
    /// Closed; every operation fails.
    Closed,
}

/// Reader handle for one consumer group over an ordered set of
/// partitions.
///
/// A tailer is single-consumer: methods take `&mut self` and the manager
/// refuses a second tailer for any of its `(group, partition)` pairs.
/// Progress is explicit; nothing is committed until [`commit`] is
/// called, and a restart resumes from the last commit.
///
/// [`commit`]: Self::commit
#[derive(Debug)]
pub struct Tailer {
    inner: Arc<ManagerInner>,
    group: GroupName,
    partitions: Vec<LogPartition>,
    readers: Vec<ReaderId>,
    next_index: usize,
    state: TailerState,
    slots_released: bool,
}

impl Tailer {
    pub(crate) fn new(
        inner: Arc<ManagerInner>,
        group: GroupName,
        partitions: Vec<LogPartition>,
        readers: Vec<ReaderId>,
    ) -> Self {
        debug_assert_eq!(partitions.len(), readers.len());
        Self {
            inner,
            group,
            partitions,
            readers,
            next_index: 0,
            state: TailerState::Uninitialized,
            slots_released: false,
        }
    }

    /// Returns the consumer group this tailer reads for.
    #[must_use]
    pub const fn group(&self) -> &GroupName {
        &self.group
    }

    /// Returns the partitions this tailer reads, in assignment order.
    #[must_use]
    pub fn assignments(&self) -> &[LogPartition] {
        &self.partitions
    }

    /// Returns the tailer's lifecycle state.
    #[must_use]
    pub const fn state(&self) -> TailerState {
        self.state
    }

    /// Returns true once this tailer has been closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.state == TailerState::Closed || self.inner.ensure_open().is_err()
    }

    /// Reads the next record from any assigned partition, waiting up to
    /// `timeout` for one to appear.
    ///
    /// Partitions are scanned round-robin so one busy partition cannot
    /// starve the others. An empty poll returns `Ok(None)`; that is
    /// normal operation, not an error. On the first poll of an
    /// uninitialized tailer, the cursors are first seeked to the group's
    /// last committed positions.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] if the tailer or manager is
    /// closed, [`StreamError::PositionNotFound`] if a cursor points into
    /// reclaimed data (recover by seeking), or a backend error.
    pub async fn poll(&mut self, timeout: Duration) -> StreamResult<Option<LogEntry>> {
        self.ensure_open()?;
        if self.state == TailerState::Uninitialized {
            self.to_last_committed().await?;
        }

        let deadline = Instant::now() + timeout;
        loop {
            for _ in 0..self.readers.len() {
                let index = self.next_index;
                self.next_index = (self.next_index + 1) % self.readers.len();
                let outcome = self
                    .inner
                    .driver
                    .read_next(self.readers[index], Duration::ZERO)
                    .await?;
                if let ReadOutcome::Entry(entry) = outcome {
                    trace!(group = %self.group, partition = %entry.partition, offset = %entry.offset, "delivered record");
                    self.state = TailerState::WaitingForNext;
                    return Ok(Some(entry));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                self.state = TailerState::WaitingForNext;
                return Ok(None);
            }
            let remaining = deadline - now;
            tokio::time::sleep(remaining.min(self.inner.options.poll_interval)).await;
        }
    }

    /// Seeks every cursor to the oldest retained record.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] or a backend error.
    pub async fn to_start(&mut self) -> StreamResult<()> {
        self.seek_all(SeekTarget::Start).await
    }

    /// Seeks every cursor past the newest record; only records appended
    /// after the seek are delivered.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] or a backend error.
    pub async fn to_end(&mut self) -> StreamResult<()> {
        self.seek_all(SeekTarget::End).await
    }

    /// Seeks every cursor to the group's last committed position, falling
    /// back to the start on partitions the group never committed.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] or a backend error.
    pub async fn to_last_committed(&mut self) -> StreamResult<()> {
        self.seek_all(SeekTarget::LastCommitted).await
    }

    /// Seeks one assigned partition's cursor to an explicit offset.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidArgument`] if the partition is not
    /// assigned to this tailer, [`StreamError::PositionNotFound`] if the
    /// offset is outside the retained range, or the errors of
    /// [`Self::to_start`].
    pub async fn seek(&mut self, partition: &LogPartition, offset: Offset) -> StreamResult<()> {
        self.ensure_open()?;
        let index = self
            .partitions
            .iter()
            .position(|p| p == partition)
            .ok_or(StreamError::InvalidArgument {
                name: "partition",
                reason: "partition is not assigned to this tailer",
            })?;
        self.state = TailerState::Seeking;
        self.inner
            .driver
            .seek_reader(self.readers[index], SeekTarget::At(offset))
            .await?;
        self.state = TailerState::FoundPosition;
        Ok(())
    }

    /// Durably commits the group's position on every assigned partition.
    ///
    /// The committed position is each cursor's current offset, so a
    /// restart resumes exactly after the last delivered record.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] or a backend error; on failure
    /// some partitions may have committed and others not, and redelivery
    /// on the uncommitted ones is expected.
    pub async fn commit(&mut self) -> StreamResult<()> {
        self.ensure_open()?;
        for index in 0..self.partitions.len() {
            self.commit_index(index).await?;
        }
        Ok(())
    }

    /// Commits the group's position on one assigned partition.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidArgument`] if the partition is not
    /// assigned, or the errors of [`Self::commit`].
    pub async fn commit_partition(&mut self, partition: &LogPartition) -> StreamResult<()> {
        self.ensure_open()?;
        let index = self
            .partitions
            .iter()
            .position(|p| p == partition)
            .ok_or(StreamError::InvalidArgument {
                name: "partition",
                reason: "partition is not assigned to this tailer",
            })?;
        self.commit_index(index).await
    }

    /// Closes the tailer, its cursors, and releases the group's slots.
    ///
    /// Idempotent.
    ///
    /// # Errors
    /// Returns a backend error if cursor cleanup fails; the tailer is
    /// closed regardless.
    pub async fn close(&mut self) -> StreamResult<()> {
        if self.state == TailerState::Closed {
            return Ok(());
        }
        self.state = TailerState::Closed;
        self.release_slots();
        debug!(group = %self.group, "closed tailer");
        let mut result = Ok(());
        for reader in &self.readers {
            if let Err(err) = self.inner.driver.close_reader(*reader).await {
                result = Err(err);
            }
        }
        result
    }

    async fn commit_index(&mut self, index: usize) -> StreamResult<()> {
        let offset = self.inner.driver.reader_position(self.readers[index]).await?;
        self.inner
            .driver
            .commit(&self.group, &self.partitions[index], offset)
            .await?;
        trace!(group = %self.group, partition = %self.partitions[index], offset = %offset, "committed position");
        Ok(())
    }

    async fn seek_all(&mut self, target: SeekTarget) -> StreamResult<()> {
        self.ensure_open()?;
        self.state = TailerState::Seeking;
        for reader in &self.readers {
            self.inner.driver.seek_reader(*reader, target).await?;
        }
        self.next_index = 0;
        self.state = TailerState::FoundPosition;
        Ok(())
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.state == TailerState::Closed {
            return Err(StreamError::Closed { resource: "tailer" });
        }
        self.inner.ensure_open()
    }

    fn release_slots(&mut self) {
        if !self.slots_released {
            self.slots_released = true;
            self.inner.release_tailer(&self.group, &self.partitions);
        }
    }
}

impl Drop for Tailer {
    fn drop(&mut self) {
        self.release_slots();
        if self.state == TailerState::Closed {
            return;
        }
        // A tailer dropped without close() must not keep pinning
        // retention: close its cursors best-effort in the background.
        let driver = Arc::clone(&self.inner.driver);
        let readers = std::mem::take(&mut self.readers);
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                for reader in readers {
                    let _ = driver.close_reader(reader).await;
                }
            });
        }
    }
}
