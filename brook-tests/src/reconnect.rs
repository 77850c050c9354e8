//! Broker connectivity: reconnect with backoff, bounded by a deadline.

use std::time::Duration;

use brook_broker::{Broker, BrokerDriver};
use brook_core::StreamError;
use brook_log::LogDriver;

use crate::harness::{fast_options, init_tracing};

/// Reserves an ephemeral port, then frees it for the broker to take.
async fn free_port() -> std::net::SocketAddr {
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    probe.local_addr().unwrap()
}

#[tokio::test]
async fn test_connect_retries_until_broker_appears() {
    init_tracing();
    let addr = free_port().await;

    // The broker shows up after the driver has already started trying.
    let server = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        Broker::bind(addr).await.unwrap()
    });

    let options = fast_options().with_connection_timeout(Duration::from_secs(5));
    let driver = BrokerDriver::connect(addr, &options).await.unwrap();
    assert!(driver.list_streams().await.unwrap().is_empty());

    driver.close().await.unwrap();
    server.await.unwrap().shutdown().await;
}

#[tokio::test]
async fn test_connect_surfaces_failure_after_deadline() {
    init_tracing();
    let addr = free_port().await;

    let options = fast_options().with_connection_timeout(Duration::from_millis(200));
    let err = BrokerDriver::connect(addr, &options).await.unwrap_err();
    assert!(matches!(err, StreamError::Backend { .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_calls_fail_once_broker_is_gone() {
    init_tracing();
    let broker = Broker::bind("127.0.0.1:0").await.unwrap();
    let options = fast_options().with_connection_timeout(Duration::from_millis(300));
    let driver = BrokerDriver::connect(broker.local_addr(), &options)
        .await
        .unwrap();

    assert!(driver.list_streams().await.unwrap().is_empty());
    broker.shutdown().await;

    // Retries run until the deadline, then the transport error surfaces.
    let err = driver.list_streams().await.unwrap_err();
    assert!(matches!(err, StreamError::Backend { .. }));

    driver.close().await.unwrap();
    assert!(matches!(
        driver.list_streams().await.unwrap_err(),
        StreamError::Closed { .. }
    ));
}
