//! Rolling-file backend for Brook.
//!
//! Each partition is a directory of time-rolled segment files with
//! CRC-framed records; committed positions live in per-group text files.
//! Everything needed to resume is under one root directory, so
//! durability is reopen-from-path: restart the process (or point a new
//! one at the same root) and all acknowledged records and commits are
//! there.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod driver;
mod offsets;
mod partition;
mod retention;
mod segment;

pub use driver::FileDriver;
