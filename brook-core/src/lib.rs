//! Brook Core - value types shared by every Brook crate.
//!
//! A Brook log is a named, partitioned, append-only sequence of records.
//! This crate holds the model that every backend agrees on:
//!
//! - **Names**: validated identifiers for streams and consumer groups
//! - **Positions**: `(partition, offset)` markers, strictly increasing per
//!   partition in append order
//! - **Records**: immutable `(key, value, timestamp)` payloads with a
//!   length-prefixed binary codec shared by the file and broker backends
//! - **Errors**: the single `StreamError` taxonomy (configuration, state,
//!   position, transient, exhaustion)
//! - **Clock**: an injectable time source so segment rolling can be driven
//!   by simulated time in tests

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod clock;
mod error;
mod lag;
mod record;
mod types;

pub use clock::{Clock, SimulatedClock, SystemClock};
pub use error::{StreamError, StreamResult};
pub use lag::Lag;
pub use record::{LogEntry, Offset, Position, Record, Timestamp};
pub use types::{GroupName, LogPartition, PartitionId, StreamName};
