//! Reopen-from-path durability of the file backend.

use std::sync::Arc;
use std::time::Duration;

use brook_core::{LogPartition, Record, SimulatedClock};

use crate::harness::{fast_options, file_manager_with_clock, group, init_tracing, stream};

const POLL_WAIT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn test_records_survive_reopen_across_roll_boundary() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let options = fast_options().with_roll_cycle(Duration::from_secs(60));
    let name = stream("journal");

    {
        let manager =
            file_manager_with_clock(dir.path(), options.clone(), Arc::new(clock.clone())).await;
        manager.create_if_not_exists(&name, 1).await.unwrap();
        let appender = manager
            .appender(&LogPartition::of(name.clone(), 0))
            .await
            .unwrap();

        appender.append(Record::new("before-roll")).await.unwrap();
        clock.advance(Duration::from_secs(90));
        appender.append(Record::new("after-roll")).await.unwrap();
        manager.close().await.unwrap();
    }

    // A fresh manager over the same root sees every acknowledged record,
    // in order, across the segment boundary.
    let manager = file_manager_with_clock(dir.path(), options, Arc::new(clock)).await;
    assert_eq!(manager.partition_count(&name).await.unwrap(), 1);

    let mut tailer = manager.tailer_for_stream(&group("g"), &name).await.unwrap();
    let first = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(first.record.value.as_ref(), b"before-roll");
    let second = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(second.record.value.as_ref(), b"after-roll");
    assert!(second.offset > first.offset);
    tailer.close().await.unwrap();
}

#[tokio::test]
async fn test_commits_survive_reopen() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let clock = SimulatedClock::starting_at(1_000);
    let options = fast_options();
    let name = stream("tasks");
    let workers = group("workers");

    {
        let manager =
            file_manager_with_clock(dir.path(), options.clone(), Arc::new(clock.clone())).await;
        manager.create_if_not_exists(&name, 1).await.unwrap();
        let appender = manager
            .appender(&LogPartition::of(name.clone(), 0))
            .await
            .unwrap();
        for i in 0..3_u32 {
            appender.append(Record::new(format!("t{i}"))).await.unwrap();
        }

        let mut tailer = manager.tailer_for_stream(&workers, &name).await.unwrap();
        tailer.poll(POLL_WAIT).await.unwrap().unwrap();
        tailer.poll(POLL_WAIT).await.unwrap().unwrap();
        tailer.commit().await.unwrap();
        tailer.close().await.unwrap();
        manager.close().await.unwrap();
    }

    // The group's position is on disk, not in process memory.
    let manager = file_manager_with_clock(dir.path(), options, Arc::new(clock)).await;
    assert_eq!(
        manager.list_consumer_groups(&name).await.unwrap(),
        vec![workers.clone()]
    );
    let mut tailer = manager.tailer_for_stream(&workers, &name).await.unwrap();
    let entry = tailer.poll(POLL_WAIT).await.unwrap().unwrap();
    assert_eq!(entry.record.value.as_ref(), b"t2");
    tailer.close().await.unwrap();
}
