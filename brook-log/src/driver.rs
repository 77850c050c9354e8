//! The backend capability interface.
//!
//! A [`LogDriver`] is everything a backend must provide: stream admin,
//! durable appends, cursor-based reads, and committed-position storage.
//! The manager, appender, and tailer are written entirely against this
//! trait; backends differ only in how they honor it.
//!
//! Readers are not objects handed to the caller. A backend owns its
//! reader state internally and exposes each cursor as an opaque
//! [`ReaderId`]; the tailer drives the cursor through the id. This keeps
//! reader lifetime under the driver's control, so a driver close can
//! invalidate every cursor in one place.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use brook_core::{GroupName, LogEntry, LogPartition, Offset, Position, Record, StreamName, StreamResult};

/// Opaque handle to a backend-owned read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReaderId(u64);

impl ReaderId {
    /// Creates a handle from a raw id. Backends only.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "reader-{}", self.0)
    }
}

/// Where to place a read cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTarget {
    /// The oldest retained record.
    Start,
    /// Past the newest record; only new appends are visible.
    End,
    /// The group's committed position, falling back to [`Self::Start`]
    /// when the group never committed on this partition.
    LastCommitted,
    /// An explicit offset.
    At(Offset),
}

/// Result of a single bounded read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A record was available at the cursor.
    Entry(LogEntry),
    /// No record became available before the timeout.
    Timeout,
}

/// The operations a backend must provide.
///
/// Implementations are shared behind `Arc<dyn LogDriver>` and must be
/// safe under concurrent calls: one appender per partition plus any
/// number of readers may be in flight at once.
#[async_trait]
pub trait LogDriver: Send + Sync + fmt::Debug {
    /// Creates a stream with a fixed partition count if it does not
    /// already exist.
    ///
    /// Returns `true` if the stream was created, `false` if it already
    /// existed with the same partition count.
    ///
    /// # Errors
    /// Returns [`StreamError::AlreadyExists`] if the stream exists with a
    /// different partition count, or a backend error.
    ///
    /// [`StreamError::AlreadyExists`]: brook_core::StreamError::AlreadyExists
    async fn create_stream(&self, stream: &StreamName, partitions: u32) -> StreamResult<bool>;

    /// Returns true if the stream exists.
    ///
    /// # Errors
    /// Returns a backend error if the check cannot be performed.
    async fn exists(&self, stream: &StreamName) -> StreamResult<bool>;

    /// Returns the stream's partition count.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] if the stream does not
    /// exist.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn partition_count(&self, stream: &StreamName) -> StreamResult<u32>;

    /// Lists every stream known to the backend, sorted by name.
    ///
    /// # Errors
    /// Returns a backend error if the listing cannot be performed.
    async fn list_streams(&self) -> StreamResult<Vec<StreamName>>;

    /// Returns the offset of the oldest retained record, which equals the
    /// end offset when the partition is empty.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn first_offset(&self, partition: &LogPartition) -> StreamResult<Offset>;

    /// Returns the offset one past the newest record.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn end_offset(&self, partition: &LogPartition) -> StreamResult<Offset>;

    /// Durably appends a record, returning its assigned position.
    ///
    /// The returned position is strictly greater than that of every
    /// record previously acknowledged on this partition.
    ///
    /// # Errors
    /// Returns a backend error if the write was not acknowledged.
    async fn append(&self, partition: &LogPartition, record: Record) -> StreamResult<Position>;

    /// Opens a read cursor for a group on one partition, placed at the
    /// given target.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn open_reader(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        target: SeekTarget,
    ) -> StreamResult<ReaderId>;

    /// Repositions an open cursor.
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] if the cursor is gone, or
    /// [`StreamError::PositionNotFound`] for an explicit offset outside
    /// the retained range.
    ///
    /// [`StreamError::Closed`]: brook_core::StreamError::Closed
    /// [`StreamError::PositionNotFound`]: brook_core::StreamError::PositionNotFound
    async fn seek_reader(&self, reader: ReaderId, target: SeekTarget) -> StreamResult<()>;

    /// Reads the record at the cursor, waiting up to `timeout` for one to
    /// appear, and advances the cursor past it.
    ///
    /// A zero timeout is a non-blocking check.
    ///
    /// # Errors
    /// Returns [`StreamError::PositionNotFound`] if the cursor points
    /// into reclaimed data, [`StreamError::Closed`] if the cursor is
    /// gone, or a backend error.
    ///
    /// [`StreamError::PositionNotFound`]: brook_core::StreamError::PositionNotFound
    /// [`StreamError::Closed`]: brook_core::StreamError::Closed
    async fn read_next(&self, reader: ReaderId, timeout: Duration) -> StreamResult<ReadOutcome>;

    /// Returns the cursor's current offset (the next offset it would
    /// read).
    ///
    /// # Errors
    /// Returns [`StreamError::Closed`] if the cursor is gone.
    ///
    /// [`StreamError::Closed`]: brook_core::StreamError::Closed
    async fn reader_position(&self, reader: ReaderId) -> StreamResult<Offset>;

    /// Closes a cursor. Closing an already closed cursor is a no-op.
    ///
    /// # Errors
    /// Returns a backend error if cleanup fails.
    async fn close_reader(&self, reader: ReaderId) -> StreamResult<()>;

    /// Returns the group's committed offset on a partition, if any.
    ///
    /// The committed offset is the next offset the group would read, not
    /// the last offset it processed.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn committed(
        &self,
        group: &GroupName,
        partition: &LogPartition,
    ) -> StreamResult<Option<Offset>>;

    /// Durably records the group's position on a partition.
    ///
    /// # Errors
    /// Returns a backend error if the commit was not persisted.
    async fn commit(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        offset: Offset,
    ) -> StreamResult<()>;

    /// Discards every committed position the group holds on a stream, so
    /// the group restarts from the beginning.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn reset_positions(&self, group: &GroupName, stream: &StreamName) -> StreamResult<()>;

    /// Lists the consumer groups that have committed positions on a
    /// stream, sorted by name.
    ///
    /// # Errors
    /// Returns [`StreamError::UnknownStream`] or a backend error.
    ///
    /// [`StreamError::UnknownStream`]: brook_core::StreamError::UnknownStream
    async fn list_consumer_groups(&self, stream: &StreamName) -> StreamResult<Vec<GroupName>>;

    /// Releases backend resources and invalidates every open cursor.
    ///
    /// # Errors
    /// Returns a backend error if cleanup fails; the driver is considered
    /// closed regardless.
    async fn close(&self) -> StreamResult<()>;
}
