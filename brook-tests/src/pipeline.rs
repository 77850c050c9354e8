//! End-to-end: assignments drive a group of consumers over real streams.

use std::collections::BTreeMap;
use std::time::Duration;

use brook_assign::{assign, Strategy};
use brook_core::{LogPartition, Record};

use crate::harness::{broker_manager, fast_options, group, init_tracing, stream};

const POLL_NONE: Duration = Duration::from_millis(50);

#[tokio::test]
async fn test_group_of_consumers_covers_every_record_once() {
    init_tracing();
    let (broker, manager) = broker_manager(fast_options()).await;

    // Two streams with different widths, as a processing topology would
    // subscribe to them.
    let subscriptions = [(stream("orders"), 4_u32), (stream("audit"), 2_u32)];
    for (name, partitions) in &subscriptions {
        manager.create_if_not_exists(name, *partitions).await.unwrap();
    }

    // Every partition gets a distinct set of records.
    let mut expected = BTreeMap::new();
    for (name, partitions) in &subscriptions {
        for index in 0..*partitions {
            let target = LogPartition::of(name.clone(), index);
            let appender = manager.appender(&target).await.unwrap();
            for i in 0..3_u32 {
                let value = format!("{target}-{i}");
                appender.append(Record::new(value.clone())).await.unwrap();
                expected.insert(value, false);
            }
        }
    }

    for strategy in [Strategy::RoundRobin, Strategy::Range] {
        let consumers = 3;
        let assignments = assign(strategy, &subscriptions, consumers).unwrap();
        let team = group(match strategy {
            Strategy::RoundRobin => "team-rr",
            Strategy::Range => "team-range",
        });

        let mut delivered = expected.clone();
        for consumer in 0..consumers {
            let partitions = assignments.partitions(consumer).to_vec();
            if partitions.is_empty() {
                continue;
            }
            let mut tailer = manager.tailer(&team, partitions).await.unwrap();
            while let Some(entry) = tailer.poll(POLL_NONE).await.unwrap() {
                let value = String::from_utf8(entry.record.value.to_vec()).unwrap();
                let seen = delivered.get_mut(&value).expect("unexpected record");
                assert!(!*seen, "{value} delivered to two consumers");
                *seen = true;
            }
            tailer.commit().await.unwrap();
            tailer.close().await.unwrap();
        }
        assert!(
            delivered.values().all(|seen| *seen),
            "every record must reach exactly one consumer ({strategy:?})"
        );
    }

    broker.shutdown().await;
}
