//! Behaviors every backend must honor, run against both drivers.

use std::time::Duration;

use brook_core::{LogPartition, Record, StreamError};
use brook_log::{LogManager, TailerState};

use crate::harness::{broker_manager, fast_options, file_manager, group, init_tracing, stream};

const POLL_WAIT: Duration = Duration::from_secs(2);
const POLL_NONE: Duration = Duration::from_millis(50);

async fn check_create_idempotent(manager: &LogManager) {
    let name = stream("orders");
    assert!(manager.create_if_not_exists(&name, 4).await.unwrap());
    assert!(!manager.create_if_not_exists(&name, 4).await.unwrap());
    assert_eq!(manager.partition_count(&name).await.unwrap(), 4);

    let err = manager.create_if_not_exists(&name, 8).await.unwrap_err();
    assert!(matches!(err, StreamError::AlreadyExists { existing: 4, requested: 8, .. }));

    let err = manager
        .create_if_not_exists(&stream("empty"), 0)
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::InvalidPartitionCount { .. }));
}

async fn check_unknown_stream(manager: &LogManager) {
    let missing = stream("missing");
    assert!(!manager.exists(&missing).await.unwrap());
    assert!(matches!(
        manager.partition_count(&missing).await.unwrap_err(),
        StreamError::UnknownStream { .. }
    ));
    assert!(matches!(
        manager
            .appender(&LogPartition::of(missing.clone(), 0))
            .await
            .unwrap_err(),
        StreamError::UnknownStream { .. }
    ));
    assert!(matches!(
        manager
            .tailer_for_stream(&group("g"), &missing)
            .await
            .unwrap_err(),
        StreamError::UnknownStream { .. }
    ));
}

async fn check_append_and_tail(manager: &LogManager) {
    let name = stream("events");
    manager.create_if_not_exists(&name, 2).await.unwrap();

    let p0 = LogPartition::of(name.clone(), 0);
    let p1 = LogPartition::of(name.clone(), 1);
    let a0 = manager.appender(&p0).await.unwrap();
    let a1 = manager.appender(&p1).await.unwrap();

    // Positions are strictly increasing per partition.
    let first = a0.append(Record::new("p0-a")).await.unwrap();
    let second = a0.append(Record::new("p0-b")).await.unwrap();
    assert!(second.offset > first.offset);
    a1.append(Record::with_key("k", "p1-a")).await.unwrap();

    let mut tailer = manager.tailer_for_stream(&group("readers"), &name).await.unwrap();
    assert_eq!(tailer.state(), TailerState::Uninitialized);

    let mut seen = Vec::new();
    for _ in 0..3 {
        let entry = tailer.poll(POLL_WAIT).await.unwrap().expect("record expected");
        seen.push(entry);
    }
    assert!(tailer.poll(POLL_NONE).await.unwrap().is_none());
    assert_eq!(tailer.state(), TailerState::WaitingForNext);

    // Per-partition order is preserved.
    let p0_values: Vec<_> = seen
        .iter()
        .filter(|e| e.partition == p0)
        .map(|e| e.record.value.clone())
        .collect();
    assert_eq!(p0_values, vec!["p0-a", "p0-b"]);
    let keyed = seen.iter().find(|e| e.partition == p1).unwrap();
    assert_eq!(keyed.record.key.as_deref(), Some(b"k".as_ref()));

    tailer.close().await.unwrap();
}

async fn check_commit_resume(manager: &LogManager) {
    let name = stream("audit");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let appender = manager
        .appender(&LogPartition::of(name.clone(), 0))
        .await
        .unwrap();
    for i in 0..5_u32 {
        appender.append(Record::new(format!("r{i}"))).await.unwrap();
    }

    let workers = group("workers");
    let mut tailer = manager.tailer_for_stream(&workers, &name).await.unwrap();
    for expected in ["r0", "r1"] {
        let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
        assert_eq!(entry.record.value.as_ref(), expected.as_bytes());
    }
    tailer.commit().await.unwrap();
    // Read past the commit without committing again.
    tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    tailer.close().await.unwrap();

    // A new tailer for the same group resumes at the commit, not at the
    // furthest read.
    let mut tailer = manager.tailer_for_stream(&workers, &name).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"r2");

    // An unrelated group starts from the beginning.
    let mut fresh = manager.tailer_for_stream(&group("fresh"), &name).await.unwrap();
    let entry = fresh.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"r0");

    tailer.close().await.unwrap();
    fresh.close().await.unwrap();
}

async fn check_seek_start_end(manager: &LogManager) {
    let name = stream("metrics");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);
    let appender = manager.appender(&target).await.unwrap();
    appender.append(Record::new("old")).await.unwrap();

    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();
    tailer.to_end().await.unwrap();
    assert_eq!(tailer.state(), TailerState::FoundPosition);
    assert!(tailer.poll(POLL_NONE).await.unwrap().is_none());

    // Only records appended after the seek are visible.
    appender.append(Record::new("new")).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"new");

    tailer.to_start().await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"old");

    // Explicit seek to a known position.
    tailer.seek(&target, entry.offset.next()).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"new");

    tailer.close().await.unwrap();
}

async fn check_exclusive_appender(manager: &LogManager) {
    let name = stream("single");
    manager.create_if_not_exists(&name, 2).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);

    let appender = manager.appender(&target).await.unwrap();
    let err = manager.appender(&target).await.unwrap_err();
    assert!(matches!(err, StreamError::PartitionOwned { .. }));

    // The other partition is free.
    manager
        .appender(&LogPartition::of(name.clone(), 1))
        .await
        .unwrap();

    // Closing releases the slot.
    appender.close();
    manager.appender(&target).await.unwrap();

    // Out-of-range partition index.
    let err = manager
        .appender(&LogPartition::of(name, 9))
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::InvalidPartition { .. }));
}

async fn check_duplicate_tailer(manager: &LogManager) {
    let name = stream("shared");
    manager.create_if_not_exists(&name, 2).await.unwrap();
    let g = group("team");

    let mut tailer = manager.tailer_for_stream(&g, &name).await.unwrap();
    let err = manager
        .tailer(&g, vec![LogPartition::of(name.clone(), 1)])
        .await
        .unwrap_err();
    assert!(matches!(err, StreamError::TailerExists { .. }));

    // A different group may tail the same partitions.
    let mut other = manager.tailer_for_stream(&group("other"), &name).await.unwrap();

    // Closing frees the pairs.
    tailer.close().await.unwrap();
    let mut reopened = manager.tailer_for_stream(&g, &name).await.unwrap();

    reopened.close().await.unwrap();
    other.close().await.unwrap();
}

async fn check_lag_and_groups(manager: &LogManager) {
    let name = stream("lagged");
    manager.create_if_not_exists(&name, 2).await.unwrap();
    let workers = group("workers");

    for index in 0..2 {
        let appender = manager
            .appender(&LogPartition::of(name.clone(), index))
            .await
            .unwrap();
        for i in 0..3_u32 {
            appender.append(Record::new(format!("p{index}-{i}"))).await.unwrap();
        }
    }

    // Never-committed group lags by everything.
    let lag = manager.lag(&workers, &name).await.unwrap();
    assert_eq!(lag.lag(), 6);
    assert!(manager.list_consumer_groups(&name).await.unwrap().is_empty());

    let mut tailer = manager.tailer_for_stream(&workers, &name).await.unwrap();
    for _ in 0..4 {
        tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    }
    tailer.commit().await.unwrap();

    let lag = manager.lag(&workers, &name).await.unwrap();
    assert_eq!(lag.lag(), 2);
    let per_partition = manager.lag_per_partition(&workers, &name).await.unwrap();
    assert_eq!(per_partition.len(), 2);
    assert_eq!(
        manager.list_consumer_groups(&name).await.unwrap(),
        vec![workers.clone()]
    );

    // Reset is refused while the tailer is live, allowed after close.
    let err = manager.reset_positions(&workers, &name).await.unwrap_err();
    assert!(matches!(err, StreamError::InvalidArgument { .. }));
    tailer.close().await.unwrap();
    manager.reset_positions(&workers, &name).await.unwrap();
    assert_eq!(manager.lag(&workers, &name).await.unwrap().lag(), 6);
}

async fn check_closed_handles(manager: &LogManager) {
    let name = stream("handles");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let target = LogPartition::of(name.clone(), 0);

    // Closing an appender fails its appends while the manager stays up.
    let appender = manager.appender(&target).await.unwrap();
    appender.close();
    assert!(appender.closed());
    assert!(matches!(
        appender.append(Record::new("late")).await.unwrap_err(),
        StreamError::Closed { .. }
    ));

    // Same for a tailer: poll, seeks, and commits all refuse.
    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();
    tailer.close().await.unwrap();
    assert_eq!(tailer.state(), TailerState::Closed);
    assert!(matches!(
        tailer.poll(POLL_NONE).await.unwrap_err(),
        StreamError::Closed { .. }
    ));
    assert!(matches!(
        tailer.to_start().await.unwrap_err(),
        StreamError::Closed { .. }
    ));
    assert!(matches!(
        tailer.commit().await.unwrap_err(),
        StreamError::Closed { .. }
    ));

    // The manager is unaffected; fresh handles work.
    let appender = manager.appender(&target).await.unwrap();
    appender.append(Record::new("fresh")).await.unwrap();
}

async fn check_close_cascade(manager: &LogManager) {
    let name = stream("closing");
    manager.create_if_not_exists(&name, 1).await.unwrap();
    let appender = manager
        .appender(&LogPartition::of(name.clone(), 0))
        .await
        .unwrap();
    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();

    manager.close().await.unwrap();
    assert!(manager.closed());
    // Closing twice is a no-op.
    manager.close().await.unwrap();

    assert!(appender.closed());
    assert!(matches!(
        appender.append(Record::new("late")).await.unwrap_err(),
        StreamError::Closed { .. }
    ));
    assert!(tailer.closed());
    assert!(matches!(
        tailer.poll(POLL_NONE).await.unwrap_err(),
        StreamError::Closed { .. }
    ));
    assert!(matches!(
        manager.list_streams().await.unwrap_err(),
        StreamError::Closed { .. }
    ));
}

macro_rules! contract_tests {
    ($($name:ident => $check:ident),+ $(,)?) => {
        mod file {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    init_tracing();
                    let dir = tempfile::tempdir().unwrap();
                    let manager = file_manager(dir.path(), fast_options()).await;
                    $check(&manager).await;
                }
            )+
        }

        mod broker {
            use super::*;
            $(
                #[tokio::test]
                async fn $name() {
                    init_tracing();
                    let (broker, manager) = broker_manager(fast_options()).await;
                    $check(&manager).await;
                    let _ = manager.close().await;
                    broker.shutdown().await;
                }
            )+
        }
    };
}

contract_tests! {
    test_create_idempotent => check_create_idempotent,
    test_unknown_stream => check_unknown_stream,
    test_append_and_tail => check_append_and_tail,
    test_commit_resume => check_commit_resume,
    test_seek_start_end => check_seek_start_end,
    test_exclusive_appender => check_exclusive_appender,
    test_duplicate_tailer => check_duplicate_tailer,
    test_lag_and_groups => check_lag_and_groups,
    test_closed_handles => check_closed_handles,
    test_close_cascade => check_close_cascade,
}
