//! Cross-crate integration tests.
//!
//! The behaviors shared by every backend live in `contract`, written as
//! generic functions over a [`brook_log::LogManager`] and run against
//! both the file and broker drivers. Backend-specific behaviors
//! (durability across reopen, segment retention, broker reconnects) get
//! their own modules.
//!
//! Test naming: `test_<area>_<behavior>`, suffixed with the backend
//! where a contract test runs against both.

#![forbid(unsafe_code)]

pub mod harness;

#[cfg(test)]
mod contract;
#[cfg(test)]
mod durability;
#[cfg(test)]
mod pipeline;
#[cfg(test)]
mod reconnect;
#[cfg(test)]
mod retention;
