//! Shared setup for the integration tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use brook_broker::{Broker, BrokerDriver};
use brook_core::{Clock, StreamName};
use brook_file::FileDriver;
use brook_log::{LogManager, OpenOptions};

/// Installs a test subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Options tuned for tests: tight polls, short timeouts, hourly rolls.
#[must_use]
pub fn fast_options() -> OpenOptions {
    OpenOptions::new()
        .with_roll_cycle(Duration::from_secs(3600))
        .with_poll_interval(Duration::from_millis(5))
        .with_connection_timeout(Duration::from_secs(2))
        .with_append_timeout(Duration::from_secs(5))
}

/// Opens a manager over a file driver rooted at `root`.
///
/// # Panics
/// Panics if the driver cannot be opened.
pub async fn file_manager(root: &Path, options: OpenOptions) -> LogManager {
    let driver = FileDriver::open(root, &options)
        .await
        .expect("file driver should open");
    LogManager::new(Arc::new(driver), options)
}

/// Opens a manager over a file driver with an explicit clock.
///
/// # Panics
/// Panics if the driver cannot be opened.
pub async fn file_manager_with_clock(
    root: &Path,
    options: OpenOptions,
    clock: Arc<dyn Clock>,
) -> LogManager {
    let driver = FileDriver::open_with_clock(root, &options, clock)
        .await
        .expect("file driver should open");
    LogManager::new(Arc::new(driver), options)
}

/// Starts a broker on an ephemeral port and connects a manager to it.
///
/// # Panics
/// Panics if the broker cannot bind or the driver cannot connect.
pub async fn broker_manager(options: OpenOptions) -> (Broker, LogManager) {
    let broker = Broker::bind("127.0.0.1:0")
        .await
        .expect("broker should bind an ephemeral port");
    let driver = BrokerDriver::connect(broker.local_addr(), &options)
        .await
        .expect("driver should connect to the broker");
    (broker, LogManager::new(Arc::new(driver), options))
}

/// Shorthand for a validated stream name.
///
/// # Panics
/// Panics on an invalid name; tests pass literals.
#[must_use]
pub fn stream(name: &str) -> StreamName {
    StreamName::new(name).expect("test stream name should be valid")
}

/// Shorthand for a validated group name.
///
/// # Panics
/// Panics on an invalid name; tests pass literals.
#[must_use]
pub fn group(name: &str) -> brook_core::GroupName {
    brook_core::GroupName::new(name).expect("test group name should be valid")
}
