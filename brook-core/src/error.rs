//! The shared error taxonomy.
//!
//! Errors fall into five families, and callers are expected to branch on
//! them programmatically:
//!
//! - **Configuration**: bad names, counts, or unknown streams; never retried.
//! - **State**: operation on a closed handle, double ownership of a writer
//!   slot, duplicate tailer; hard misuse, fail fast.
//! - **Position**: seeking into reclaimed or nonexistent data; recoverable
//!   by seeking to start or end.
//! - **Transient**: backend connectivity; retried internally with backoff up
//!   to a deadline before being surfaced.
//! - **Exhaustion**: an append deadline elapsed; retryable by the caller.
//!   (A poll with no data is *not* an error; it returns `None`.)

use thiserror::Error;

use crate::record::Offset;
use crate::types::{GroupName, LogPartition, PartitionId, StreamName};

/// Result type for Brook operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors surfaced by the log layer.
#[derive(Debug, Clone, Error)]
pub enum StreamError {
    /// A stream already exists with a different partition count.
    #[error("stream '{stream}' already exists with {existing} partitions (requested {requested})")]
    AlreadyExists {
        /// The stream name.
        stream: StreamName,
        /// Partition count of the existing stream.
        existing: u32,
        /// Partition count that was requested.
        requested: u32,
    },

    /// The stream does not exist.
    #[error("unknown stream '{stream}'")]
    UnknownStream {
        /// The stream name.
        stream: StreamName,
    },

    /// A stream or group name failed validation.
    #[error("invalid name '{name}': {reason}")]
    InvalidName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A partition count outside the accepted range.
    #[error("invalid partition count {count} for stream '{stream}': must be >= 1")]
    InvalidPartitionCount {
        /// The stream name.
        stream: StreamName,
        /// The rejected count.
        count: u32,
    },

    /// A partition index outside the stream's range.
    #[error("partition {partition} out of range for stream '{stream}' ({count} partitions)")]
    InvalidPartition {
        /// The stream name.
        stream: StreamName,
        /// The rejected partition index.
        partition: PartitionId,
        /// The stream's partition count.
        count: u32,
    },

    /// An invalid argument outside the cases above.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument {
        /// The argument name.
        name: &'static str,
        /// Why it was invalid.
        reason: &'static str,
    },

    /// A position points into reclaimed or nonexistent data.
    ///
    /// Recoverable: seek to start or end instead of treating as fatal.
    #[error("position {offset} not found on {partition}")]
    PositionNotFound {
        /// The partition that was read.
        partition: LogPartition,
        /// The missing offset.
        offset: Offset,
    },

    /// Operation on a closed appender, tailer, manager, or driver.
    #[error("{resource} is closed")]
    Closed {
        /// What was closed.
        resource: &'static str,
    },

    /// A second appender was requested for a partition that already has a
    /// live writer.
    #[error("partition {partition} already has a live appender")]
    PartitionOwned {
        /// The contended partition.
        partition: LogPartition,
    },

    /// A second tailer was requested for a `(group, partition)` pair that is
    /// already being tailed.
    #[error("group '{group}' already tails {partition}")]
    TailerExists {
        /// The consumer group.
        group: GroupName,
        /// The contended partition.
        partition: LogPartition,
    },

    /// An append did not get acknowledged before its deadline.
    ///
    /// Retryable: the record may or may not have been written.
    #[error("append to {partition} timed out after {waited_ms}ms")]
    AppendTimeout {
        /// The target partition.
        partition: LogPartition,
        /// How long the appender waited.
        waited_ms: u64,
    },

    /// A backend operation failed (I/O, connectivity).
    #[error("backend error during {operation}: {message}")]
    Backend {
        /// The operation that failed.
        operation: &'static str,
        /// Error description.
        message: String,
    },

    /// Stored data failed integrity checks.
    #[error("data corruption: {message}")]
    Corruption {
        /// Description of the corruption.
        message: String,
    },
}

impl StreamError {
    /// Wraps a backend failure.
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Backend {
            operation,
            message: err.to_string(),
        }
    }

    /// Returns true for errors a caller (or a driver's internal retry loop)
    /// may retry.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Backend { .. } | Self::AppendTimeout { .. })
    }

    /// Returns true for hard misuse errors (closed handles, double
    /// ownership); retrying these is a bug.
    #[must_use]
    pub const fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::Closed { .. } | Self::PartitionOwned { .. } | Self::TailerExists { .. }
        )
    }

    /// Returns true if the error means "this position is gone"; recover by
    /// seeking to start or end.
    #[must_use]
    pub const fn is_position_error(&self) -> bool {
        matches!(self, Self::PositionNotFound { .. })
    }
}
