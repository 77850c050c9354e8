//! The log manager: the explicit entry point to a set of streams.
//!
//! All access goes through a manager instance; there is no process-wide
//! registry. The manager owns the exclusivity bookkeeping (which
//! partitions have a live appender, which `(group, partition)` pairs have
//! a live tailer) and cascades its close to every handle it created.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use brook_core::{GroupName, Lag, LogPartition, Offset, PartitionId, StreamError, StreamName, StreamResult};

use crate::appender::Appender;
use crate::driver::{LogDriver, SeekTarget};
use crate::options::OpenOptions;
use crate::tailer::Tailer;

/// Shared state behind a manager and all handles it created.
#[derive(Debug)]
pub(crate) struct ManagerInner {
    pub(crate) driver: Arc<dyn LogDriver>,
    pub(crate) options: OpenOptions,
    appenders: Mutex<HashSet<LogPartition>>,
    tailers: Mutex<HashSet<(GroupName, LogPartition)>>,
    closed: AtomicBool,
}

impl ManagerInner {
    /// Fails with [`StreamError::Closed`] once the manager is closed.
    pub(crate) fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed { resource: "log manager" });
        }
        Ok(())
    }

    pub(crate) fn release_appender(&self, partition: &LogPartition) {
        if let Ok(mut slots) = self.appenders.lock() {
            slots.remove(partition);
        }
    }

    pub(crate) fn release_tailer(&self, group: &GroupName, partitions: &[LogPartition]) {
        if let Ok(mut slots) = self.tailers.lock() {
            for partition in partitions {
                slots.remove(&(group.clone(), partition.clone()));
            }
        }
    }
}

/// Handle to a set of streams backed by one driver.
///
/// Cloning is cheap and clones share all state, including closed-ness.
#[derive(Debug, Clone)]
pub struct LogManager {
    inner: Arc<ManagerInner>,
}

impl LogManager {
    /// Creates a manager over a backend driver.
    #[must_use]
    pub fn new(driver: Arc<dyn LogDriver>, options: OpenOptions) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                driver,
                options,
                appenders: Mutex::new(HashSet::new()),
                tailers: Mutex::new(HashSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a stream if it does not already exist.
    ///
    /// Returns `true` if the stream was created, `false` if it already
    /// existed with the same partition count. Safe to call from multiple
    /// processes concurrently.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidPartitionCount`] for a zero count,
    /// [`StreamError::AlreadyExists`] if the stream exists with a
    /// different count, or a backend error.
    pub async fn create_if_not_exists(
        &self,
        stream: &StreamName,
        partitions: u32,
    ) -> StreamResult<bool> {
        self.inner.ensure_open()?;
        if partitions == 0 {
            return Err(StreamError::InvalidPartitionCount {
                stream: stream.clone(),
                count: partitions,
            });
        }
        let created = self.inner.driver.create_stream(stream, partitions).await?;
        if created {
            info!(stream = %stream, partitions, "created stream");
        }
        Ok(created)
    }

    /// Returns true if the stream exists.
    ///
    /// # Errors
    /// Returns a backend error if the check cannot be performed.
    pub async fn exists(&self, stream: &StreamName) -> StreamResult<bool> {
        self.inner.ensure_open()?;
        self.inner.driver.exists(stream).await
    }

    /// Returns the stream's partition count.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] if the stream does not
    /// exist.
    pub async fn partition_count(&self, stream: &StreamName) -> StreamResult<u32> {
        self.inner.ensure_open()?;
        self.inner.driver.partition_count(stream).await
    }

    /// Lists every stream, sorted by name.
    ///
    /// # Errors
    /// Returns a backend error if the listing cannot be performed.
    pub async fn list_streams(&self) -> StreamResult<Vec<StreamName>> {
        self.inner.ensure_open()?;
        self.inner.driver.list_streams().await
    }

    /// Opens the exclusive appender for one partition.
    ///
    /// # Errors
    /// Returns [`StreamError::PartitionOwned`] if the partition already
    /// has a live appender from this manager,
    /// [`StreamError::UnknownStream`] or
    /// [`StreamError::InvalidPartition`] for a bad target, or
    /// [`StreamError::Closed`] if the manager is closed.
    pub async fn appender(&self, partition: &LogPartition) -> StreamResult<Appender> {
        self.inner.ensure_open()?;
        self.check_partition(partition).await?;

        {
            let mut slots = self
                .inner
                .appenders
                .lock()
                .map_err(|_| StreamError::Closed { resource: "log manager" })?;
            if !slots.insert(partition.clone()) {
                return Err(StreamError::PartitionOwned {
                    partition: partition.clone(),
                });
            }
        }
        debug!(partition = %partition, "opened appender");
        Ok(Appender::new(Arc::clone(&self.inner), partition.clone()))
    }

    /// Opens a tailer for a consumer group over an explicit, ordered set
    /// of partitions.
    ///
    /// The tailer starts uninitialized; its first poll seeks to the
    /// group's last committed positions unless a seek was issued first.
    ///
    /// # Errors
    /// Returns [`StreamError::TailerExists`] if any `(group, partition)`
    /// pair is already tailed from this manager,
    /// [`StreamError::InvalidArgument`] for an empty or duplicated
    /// partition set, or the errors of [`Self::partition_count`].
    pub async fn tailer(
        &self,
        group: &GroupName,
        partitions: Vec<LogPartition>,
    ) -> StreamResult<Tailer> {
        self.inner.ensure_open()?;
        if partitions.is_empty() {
            return Err(StreamError::InvalidArgument {
                name: "partitions",
                reason: "tailer needs at least one partition",
            });
        }
        let mut seen = HashSet::new();
        for partition in &partitions {
            if !seen.insert(partition.clone()) {
                return Err(StreamError::InvalidArgument {
                    name: "partitions",
                    reason: "a partition appears more than once",
                });
            }
            self.check_partition(partition).await?;
        }

        // Reserve every pair under one lock so a racing open of an
        // overlapping set cannot interleave.
        {
            let mut slots = self
                .inner
                .tailers
                .lock()
                .map_err(|_| StreamError::Closed { resource: "log manager" })?;
            if let Some(taken) = partitions
                .iter()
                .find(|p| slots.contains(&(group.clone(), (*p).clone())))
            {
                return Err(StreamError::TailerExists {
                    group: group.clone(),
                    partition: taken.clone(),
                });
            }
            for partition in &partitions {
                slots.insert((group.clone(), partition.clone()));
            }
        }

        let mut readers = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            match self
                .inner
                .driver
                .open_reader(group, partition, SeekTarget::LastCommitted)
                .await
            {
                Ok(reader) => readers.push(reader),
                Err(err) => {
                    for reader in readers {
                        let _ = self.inner.driver.close_reader(reader).await;
                    }
                    self.inner.release_tailer(group, &partitions);
                    return Err(err);
                }
            }
        }
        debug!(group = %group, partitions = partitions.len(), "opened tailer");
        Ok(Tailer::new(
            Arc::clone(&self.inner),
            group.clone(),
            partitions,
            readers,
        ))
    }

    /// Opens a tailer over every partition of a stream, in index order.
    ///
    /// # Errors
    /// Same conditions as [`Self::tailer`].
    pub async fn tailer_for_stream(
        &self,
        group: &GroupName,
        stream: &StreamName,
    ) -> StreamResult<Tailer> {
        let count = self.partition_count(stream).await?;
        let partitions = (0..count)
            .map(|index| LogPartition::of(stream.clone(), index))
            .collect();
        self.tailer(group, partitions).await
    }

    /// Returns how far a group is behind on each partition of a stream,
    /// in partition order.
    ///
    /// A group that never committed on a partition is measured from the
    /// oldest retained record.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    pub async fn lag_per_partition(
        &self,
        group: &GroupName,
        stream: &StreamName,
    ) -> StreamResult<Vec<Lag>> {
        self.inner.ensure_open()?;
        let count = self.inner.driver.partition_count(stream).await?;
        let mut lags = Vec::with_capacity(count as usize);
        for index in 0..count {
            let partition = LogPartition::new(stream.clone(), PartitionId::new(index));
            let end = self.inner.driver.end_offset(&partition).await?;
            let lower = match self.inner.driver.committed(group, &partition).await? {
                Some(offset) => offset,
                None => self.inner.driver.first_offset(&partition).await?,
            };
            // A commit can land between the two reads; clamp rather than
            // report a negative lag.
            let lower = Offset::new(lower.get().min(end.get()));
            lags.push(Lag::new(lower.get(), end.get()));
        }
        Ok(lags)
    }

    /// Returns the group's total lag across a stream.
    ///
    /// # Errors
    /// Same conditions as [`Self::lag_per_partition`].
    pub async fn lag(&self, group: &GroupName, stream: &StreamName) -> StreamResult<Lag> {
        Ok(Lag::aggregate(self.lag_per_partition(group, stream).await?))
    }

    /// Lists the groups with committed positions on a stream.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    pub async fn list_consumer_groups(&self, stream: &StreamName) -> StreamResult<Vec<GroupName>> {
        self.inner.ensure_open()?;
        self.inner.driver.list_consumer_groups(stream).await
    }

    /// Discards a group's committed positions on a stream.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidArgument`] if the group still has a
    /// live tailer on the stream, [`StreamError::UnknownStream`], or a
    /// backend error.
    pub async fn reset_positions(
        &self,
        group: &GroupName,
        stream: &StreamName,
    ) -> StreamResult<()> {
        self.inner.ensure_open()?;
        {
            let slots = self
                .inner
                .tailers
                .lock()
                .map_err(|_| StreamError::Closed { resource: "log manager" })?;
            if slots
                .iter()
                .any(|(g, p)| g == group && p.stream == *stream)
            {
                return Err(StreamError::InvalidArgument {
                    name: "group",
                    reason: "group still has a live tailer on this stream",
                });
            }
        }
        info!(group = %group, stream = %stream, "resetting committed positions");
        self.inner.driver.reset_positions(group, stream).await
    }

    /// Returns true once the manager has been closed.
    #[must_use]
    pub fn closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes the manager, the driver, and every handle created from it.
    ///
    /// Idempotent: closing twice is a no-op.
    ///
    /// # Errors
    /// Returns a backend error if driver cleanup fails; the manager is
    /// closed regardless.
    pub async fn close(&self) -> StreamResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!("closing log manager");
        self.inner.driver.close().await
    }

    async fn check_partition(&self, partition: &LogPartition) -> StreamResult<()> {
        let count = self.inner.driver.partition_count(&partition.stream).await?;
        if partition.partition.get() >= count {
            return Err(StreamError::InvalidPartition {
                stream: partition.stream.clone(),
                partition: partition.partition,
                count,
            });
        }
        Ok(())
    }
}
