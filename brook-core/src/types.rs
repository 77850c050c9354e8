//! Validated identifiers for streams, groups, and partitions.
//!
//! Stream and group names double as directory and file names in the
//! rolling-file backend, so the accepted alphabet is restricted to
//! path-safe characters at construction time.

use std::fmt;
use std::sync::Arc;

use crate::error::{StreamError, StreamResult};

/// Maximum length of a stream or group name.
const NAME_LEN_MAX: usize = 248;

/// Checks a candidate name against the shared naming rules.
fn validate_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        return Err("name is empty");
    }
    if name.len() > NAME_LEN_MAX {
        return Err("name is too long");
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-')
    {
        return Err("name contains characters outside [a-zA-Z0-9._-]");
    }
    Ok(())
}

/// Identifier of a named log (a stream).
///
/// Cheap to clone: the backing string is reference-counted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamName(Arc<str>);

impl StreamName {
    /// Creates a stream name, validating the accepted alphabet.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidName`] if the name is empty, too long,
    /// or contains characters outside `[a-zA-Z0-9._-]`.
    pub fn new(name: impl AsRef<str>) -> StreamResult<Self> {
        let name = name.as_ref();
        validate_name(name).map_err(|reason| StreamError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(Self(Arc::from(name)))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a consumer group.
///
/// Groups share committed positions; two tailers in different groups read
/// the same stream independently.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupName(Arc<str>);

impl GroupName {
    /// Creates a group name, validating the accepted alphabet.
    ///
    /// # Errors
    /// Returns [`StreamError::InvalidName`] if the name is empty, too long,
    /// or contains characters outside `[a-zA-Z0-9._-]`.
    pub fn new(name: impl AsRef<str>) -> StreamResult<Self> {
        let name = name.as_ref();
        validate_name(name).map_err(|reason| StreamError::InvalidName {
            name: name.to_string(),
            reason,
        })?;
        Ok(Self(Arc::from(name)))
    }

    /// Returns the name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GroupName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Index of a partition within a stream, 0-based.
///
/// Partition counts are fixed at stream creation; repartitioning is not
/// supported, so an index valid once stays valid for the stream's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PartitionId(u32);

impl PartitionId {
    /// Creates a partition index from a raw value.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw index.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for PartitionId {
    fn from(index: u32) -> Self {
        Self::new(index)
    }
}

/// A single partition of a named stream.
///
/// This is the unit of assignment: appenders own exactly one, tailers are
/// bound to an ordered set of them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LogPartition {
    /// The stream this partition belongs to.
    pub stream: StreamName,
    /// The partition index within the stream.
    pub partition: PartitionId,
}

impl LogPartition {
    /// Creates a stream/partition pair.
    #[must_use]
    pub const fn new(stream: StreamName, partition: PartitionId) -> Self {
        Self { stream, partition }
    }

    /// Convenience constructor from a raw partition index.
    #[must_use]
    pub const fn of(stream: StreamName, partition: u32) -> Self {
        Self {
            stream,
            partition: PartitionId::new(partition),
        }
    }
}

impl fmt::Display for LogPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.stream, self.partition)
    }
}
