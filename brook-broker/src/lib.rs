//! Broker backend for Brook.
//!
//! Two halves: [`Broker`], an in-memory log service bound to a TCP
//! address, and [`BrokerDriver`], the client-side `LogDriver` that
//! speaks its wire protocol. Offsets are assigned broker-side and are
//! contiguous per partition; a driver reconnects transparently with
//! backoff when the connection drops.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod codec;
mod driver;
mod server;

pub use driver::BrokerDriver;
pub use server::Broker;
