//! Segment retention and reclaim on the file backend.

use std::sync::Arc;
use std::time::Duration;

use brook_core::{LogPartition, Offset, Record, SimulatedClock, StreamError};
use brook_file::FileDriver;
use brook_log::{LogManager, RetentionPolicy};

use crate::harness::{fast_options, group, init_tracing, stream};

const POLL_WAIT: Duration = Duration::from_secs(2);
const ROLL: Duration = Duration::from_secs(60);

async fn open(
    root: &std::path::Path,
    clock: &SimulatedClock,
    retention: RetentionPolicy,
) -> (Arc<FileDriver>, LogManager) {
    let options = fast_options()
        .with_roll_cycle(ROLL)
        .with_retention(retention);
    let driver = Arc::new(
        FileDriver::open_with_clock(root, &options, Arc::new(clock.clone()))
            .await
            .unwrap(),
    );
    let manager = LogManager::new(driver.clone(), options);
    (driver, manager)
}

#[tokio::test]
async fn test_until_committed_reclaims_consumed_segments() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let (driver, manager) = open(dir.path(), &clock, RetentionPolicy::UntilCommitted).await;

    let name = stream("events");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);
    let appender = manager.appender(&target).await.unwrap();

    appender.append(Record::new("old")).await.unwrap();
    clock.advance(Duration::from_secs(90));
    appender.append(Record::new("new")).await.unwrap();

    // No group has committed: the sealed segment stays.
    assert_eq!(driver.reclaim().await.unwrap(), 0);

    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"old");
    tailer.commit().await.unwrap();

    // Every known group is past the sealed segment now.
    assert_eq!(driver.reclaim().await.unwrap(), 1);

    // The reclaimed range is gone; the retained range is intact.
    let err = tailer.seek(&target, Offset::new(0)).await.unwrap_err();
    assert!(matches!(err, StreamError::PositionNotFound { .. }));
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"new");
    tailer.close().await.unwrap();
}

#[tokio::test]
async fn test_lagging_group_blocks_reclaim() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let (driver, manager) = open(dir.path(), &clock, RetentionPolicy::UntilCommitted).await;

    let name = stream("events");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);
    let appender = manager.appender(&target).await.unwrap();

    appender.append(Record::new("old")).await.unwrap();
    clock.advance(Duration::from_secs(90));
    appender.append(Record::new("new")).await.unwrap();

    // "fast" is past the sealed segment, "slow" committed at its start.
    let mut fast = manager.tailer_for_stream(&group("fast"), &name).await.unwrap();
    fast.poll(POLL_WAIT).await.unwrap().unwrap();
    fast.commit().await.unwrap();
    fast.close().await.unwrap();

    let mut slow = manager.tailer_for_stream(&group("slow"), &name).await.unwrap();
    slow.to_start().await.unwrap();
    slow.commit().await.unwrap();
    slow.close().await.unwrap();

    assert_eq!(driver.reclaim().await.unwrap(), 0);
}

#[tokio::test]
async fn test_open_cursor_pins_segment() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let (driver, manager) = open(dir.path(), &clock, RetentionPolicy::Ttl(Duration::ZERO)).await;

    let name = stream("events");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let appender = manager
        .appender(&LogPartition::of(name.clone(), 0))
        .await
        .unwrap();

    appender.append(Record::new("old")).await.unwrap();

    // A tailer parked at the start pins the segment even after its TTL.
    let mut parked = manager.tailer_for_stream(&group("parked"), &name).await.unwrap();
    parked.to_start().await.unwrap();

    clock.advance(Duration::from_secs(300));
    appender.append(Record::new("new")).await.unwrap();
    assert_eq!(driver.reclaim().await.unwrap(), 0);

    // Once the tailer is gone the TTL applies.
    parked.close().await.unwrap();
    assert_eq!(driver.reclaim().await.unwrap(), 1);
}

#[tokio::test]
async fn test_dropped_tailer_releases_cursors() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let (driver, manager) = open(dir.path(), &clock, RetentionPolicy::Ttl(Duration::ZERO)).await;

    let name = stream("events");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let appender = manager
        .appender(&LogPartition::of(name.clone(), 0))
        .await
        .unwrap();

    appender.append(Record::new("old")).await.unwrap();
    let mut parked = manager.tailer_for_stream(&group("parked"), &name).await.unwrap();
    parked.to_start().await.unwrap();

    clock.advance(Duration::from_secs(300));
    appender.append(Record::new("new")).await.unwrap();
    assert_eq!(driver.reclaim().await.unwrap(), 0);

    // Dropping the tailer without close() still releases its cursors;
    // the cleanup runs in the background, so give it a beat.
    drop(parked);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(driver.reclaim().await.unwrap(), 1);
}

#[tokio::test]
async fn test_ttl_reclaims_unconsumed_segments() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let (driver, manager) = open(
        dir.path(),
        &clock,
        RetentionPolicy::Ttl(Duration::from_secs(30)),
    )
    .await;

    let name = stream("events");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);
    let appender = manager.appender(&target).await.unwrap();

    appender.append(Record::new("expiring")).await.unwrap();
    clock.advance(Duration::from_secs(60));
    appender.append(Record::new("kept")).await.unwrap();

    // The first segment's cycle ended at 60s; its TTL runs to 90s.
    assert_eq!(driver.reclaim().await.unwrap(), 0);
    clock.advance(Duration::from_secs(60));
    assert_eq!(driver.reclaim().await.unwrap(), 1);

    // A fresh group starts at the oldest retained record.
    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"kept");
    tailer.close().await.unwrap();
}
