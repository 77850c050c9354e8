//! Records and positions.
//!
//! A record is created by a producer, owned by the appender until the
//! backend acknowledges the write, then immutable. Positions are assigned
//! by the backend on append and are strictly increasing per partition;
//! offsets are comparable but not necessarily contiguous (the broker
//! backend may skip values, the file backend is contiguous).
//!
//! # Binary format
//!
//! `Record::encode` produces the storage/wire form shared by both backends:
//!
//! - 8 bytes: timestamp (i64 little-endian, millis since epoch, -1 = none)
//! - 4 bytes: key length (i32 little-endian, -1 for no key)
//! - N bytes: key
//! - 4 bytes: value length (u32 little-endian)
//! - N bytes: value

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{LogPartition, PartitionId};

/// Millisecond timestamp attached to a record at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// Creates a timestamp from milliseconds since the Unix epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the Unix epoch.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Returns the current wall-clock time.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)] // Millis fit in i64 for centuries.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as i64)
    }

    /// Returns the "no timestamp" sentinel.
    #[must_use]
    pub const fn none() -> Self {
        Self(-1)
    }

    /// Returns true if this is the "no timestamp" sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 < 0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::none()
    }
}

/// Offset of a record within one partition.
///
/// Opaque but comparable: callers may order and compare offsets of the same
/// partition, never do arithmetic across partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Offset(u64);

impl Offset {
    /// Creates an offset from a raw value.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next offset.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A record's location: partition index plus offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Position {
    /// The partition index.
    pub partition: PartitionId,
    /// The offset within the partition.
    pub offset: Offset,
}

impl Position {
    /// Creates a position.
    #[must_use]
    pub const fn new(partition: PartitionId, offset: Offset) -> Self {
        Self { partition, offset }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.partition, self.offset)
    }
}

/// An immutable log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Optional key, used for key-based partitioning by producers.
    pub key: Option<Bytes>,
    /// The opaque payload.
    pub value: Bytes,
    /// Creation timestamp.
    pub timestamp: Timestamp,
}

impl Record {
    /// Creates a record with just a value, stamped with the current time.
    #[must_use]
    pub fn new(value: impl Into<Bytes>) -> Self {
        Self {
            key: None,
            value: value.into(),
            timestamp: Timestamp::now(),
        }
    }

    /// Creates a record with a key and a value.
    #[must_use]
    pub fn with_key(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            key: Some(key.into()),
            value: value.into(),
            timestamp: Timestamp::now(),
        }
    }

    /// Sets the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns the encoded size in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> usize {
        let key_size = self.key.as_ref().map_or(0, Bytes::len);
        8 + 4 + key_size + 4 + self.value.len()
    }

    /// Encodes the record to the shared binary form.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)] // Sizes bounded by frame limits.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_i64_le(self.timestamp.as_millis());
        match &self.key {
            Some(k) => {
                buf.put_i32_le(k.len() as i32);
                buf.put_slice(k);
            }
            None => buf.put_i32_le(-1),
        }
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(&self.value);
    }

    /// Decodes a record from the shared binary form.
    ///
    /// Returns `None` if the buffer is truncated or malformed.
    #[allow(clippy::cast_sign_loss)] // key_len checked non-negative before cast.
    pub fn decode(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 8 + 4 {
            return None;
        }
        let timestamp = Timestamp::from_millis(buf.get_i64_le());

        let key_len = buf.get_i32_le();
        let key = if key_len < 0 {
            None
        } else {
            if buf.remaining() < key_len as usize {
                return None;
            }
            Some(buf.copy_to_bytes(key_len as usize))
        };

        if buf.remaining() < 4 {
            return None;
        }
        let value_len = buf.get_u32_le() as usize;
        if buf.remaining() < value_len {
            return None;
        }
        let value = buf.copy_to_bytes(value_len);

        Some(Self {
            key,
            value,
            timestamp,
        })
    }
}

/// A record as returned by a tailer: the record plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// The partition the record was read from.
    pub partition: LogPartition,
    /// The record's offset within that partition.
    pub offset: Offset,
    /// The record itself.
    pub record: Record,
}

impl LogEntry {
    /// Creates an entry.
    #[must_use]
    pub const fn new(partition: LogPartition, offset: Offset, record: Record) -> Self {
        Self {
            partition,
            offset,
            record,
        }
    }

    /// Returns the entry's position.
    #[must_use]
    pub const fn position(&self) -> Position {
        Position::new(self.partition.partition, self.offset)
    }
}
