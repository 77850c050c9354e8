//! The log layer: manager, appenders, and tailers over pluggable backends.
//!
//! A [`LogManager`] wraps a [`LogDriver`] (the backend) and hands out the
//! two access handles:
//!
//! - [`Appender`]: the exclusive writer for one partition.
//! - [`Tailer`]: a resumable reader over an ordered set of partitions on
//!   behalf of a consumer group.
//!
//! The manager enforces the exclusivity rules (one live appender per
//! partition, one live tailer per `(group, partition)` pair) and cascades
//! its own close to every handle it created.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod appender;
mod driver;
mod manager;
mod options;
mod retry;
mod tailer;

pub use appender::Appender;
pub use driver::{LogDriver, ReadOutcome, ReaderId, SeekTarget};
pub use manager::LogManager;
pub use options::{OpenOptions, RetentionPolicy};
pub use retry::RetryPolicy;
pub use tailer::{Tailer, TailerState};
