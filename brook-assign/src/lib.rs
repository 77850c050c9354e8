//! Partition assignment strategies.
//!
//! Given the streams a consumer group subscribes to and the number of
//! consumer threads in the group, an assignment distributes every
//! partition to exactly one consumer. Assignment is a pure function of
//! its inputs: the same streams, counts, and consumer total always
//! produce the same distribution, so every member of a group can compute
//! it independently and agree.
//!
//! Two strategies are provided:
//!
//! - [`round_robin`] interleaves partitions across streams, balancing
//!   total partition counts per consumer as evenly as possible.
//! - [`range`] splits each stream into contiguous runs, keeping a
//!   consumer's partitions adjacent within each stream at the cost of a
//!   less even total.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use brook_core::{LogPartition, StreamError, StreamName, StreamResult};

/// Which distribution a consumer group uses.
///
/// All members of a group must use the same strategy; mixing strategies
/// within a group leaves partitions double-assigned or orphaned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Interleave partitions across streams.
    RoundRobin,
    /// Contiguous runs per stream.
    Range,
}

/// The partitions assigned to the consumers of one group.
///
/// `partitions(i)` is the ordered set for consumer `i`; the sets are
/// disjoint and their union covers every partition of every subscribed
/// stream exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignments {
    per_consumer: Vec<Vec<LogPartition>>,
}

impl GroupAssignments {
    /// Returns the number of consumers the assignment was computed for.
    #[must_use]
    pub fn consumer_count(&self) -> usize {
        self.per_consumer.len()
    }

    /// Returns the ordered partitions for one consumer.
    ///
    /// # Panics
    /// Panics if `consumer` is out of range.
    #[must_use]
    pub fn partitions(&self, consumer: usize) -> &[LogPartition] {
        &self.per_consumer[consumer]
    }

    /// Consumes the assignment, yielding one partition list per consumer.
    #[must_use]
    pub fn into_inner(self) -> Vec<Vec<LogPartition>> {
        self.per_consumer
    }
}

/// Computes an assignment with the given strategy.
///
/// `streams` pairs each subscribed stream with its partition count.
/// Stream order in the input does not matter: streams are sorted by name
/// before distribution so all group members agree.
///
/// # Errors
/// Returns [`StreamError::InvalidArgument`] if `consumers` is zero, a
/// partition count is zero, or a stream appears twice.
pub fn assign(
    strategy: Strategy,
    streams: &[(StreamName, u32)],
    consumers: usize,
) -> StreamResult<GroupAssignments> {
    let streams = checked_streams(streams, consumers)?;
    let per_consumer = match strategy {
        Strategy::RoundRobin => distribute_round_robin(&streams, consumers),
        Strategy::Range => distribute_range(&streams, consumers),
    };
    debug_assert_eq!(
        per_consumer.iter().map(Vec::len).sum::<usize>(),
        streams.iter().map(|(_, count)| *count as usize).sum::<usize>(),
        "every partition must be assigned exactly once"
    );
    Ok(GroupAssignments { per_consumer })
}

/// Computes a round-robin assignment.
///
/// Partitions are enumerated stream by stream (streams sorted by name,
/// partitions in index order) and dealt to consumers cyclically, so
/// consumer totals differ by at most one.
///
/// # Errors
/// Same conditions as [`assign`].
pub fn round_robin(
    streams: &[(StreamName, u32)],
    consumers: usize,
) -> StreamResult<GroupAssignments> {
    assign(Strategy::RoundRobin, streams, consumers)
}

/// Computes a range assignment.
///
/// Each stream is cut into contiguous runs of `ceil(count / consumers)`
/// partitions; consumer `i` takes the `i`-th run of every stream. Later
/// consumers may receive nothing from a stream with fewer partitions
/// than consumers.
///
/// # Errors
/// Same conditions as [`assign`].
pub fn range(streams: &[(StreamName, u32)], consumers: usize) -> StreamResult<GroupAssignments> {
    assign(Strategy::Range, streams, consumers)
}

/// Validates inputs and returns the streams sorted by name.
fn checked_streams(
    streams: &[(StreamName, u32)],
    consumers: usize,
) -> StreamResult<Vec<(StreamName, u32)>> {
    if consumers == 0 {
        return Err(StreamError::InvalidArgument {
            name: "consumers",
            reason: "consumer count must be >= 1",
        });
    }
    for (stream, count) in streams {
        if *count == 0 {
            return Err(StreamError::InvalidPartitionCount {
                stream: stream.clone(),
                count: 0,
            });
        }
    }
    let mut sorted = streams.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    if sorted.windows(2).any(|pair| pair[0].0 == pair[1].0) {
        return Err(StreamError::InvalidArgument {
            name: "streams",
            reason: "a stream appears more than once",
        });
    }
    Ok(sorted)
}

fn distribute_round_robin(
    streams: &[(StreamName, u32)],
    consumers: usize,
) -> Vec<Vec<LogPartition>> {
    let mut per_consumer = vec![Vec::new(); consumers];
    let mut next = 0;
    for (stream, count) in streams {
        for index in 0..*count {
            per_consumer[next].push(LogPartition::of(stream.clone(), index));
            next = (next + 1) % consumers;
        }
    }
    per_consumer
}

fn distribute_range(streams: &[(StreamName, u32)], consumers: usize) -> Vec<Vec<LogPartition>> {
    let mut per_consumer = vec![Vec::new(); consumers];
    for (stream, count) in streams {
        let count = *count as usize;
        let run = count.div_ceil(consumers);
        for (consumer, slots) in per_consumer.iter_mut().enumerate() {
            let first = consumer * run;
            let last = count.min(first + run);
            for index in first..last {
                slots.push(LogPartition::of(
                    stream.clone(),
                    u32::try_from(index).unwrap_or(u32::MAX),
                ));
            }
        }
    }
    per_consumer
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streams(counts: &[(&str, u32)]) -> Vec<(StreamName, u32)> {
        counts.iter()
            .map(|(name, count)| (StreamName::new(name).unwrap(), *count))
            .collect()
    }

    fn sizes(assignments: &GroupAssignments) -> Vec<usize> {
        (0..assignments.consumer_count())
            .map(|i| assignments.partitions(i).len())
            .collect()
    }

    #[test]
    fn test_round_robin_balances_totals() {
        // 16 + 8 + 1 = 25 partitions over 3 consumers.
        let input = streams(&[("s1", 16), ("s2", 8), ("s3", 1)]);
        let assignments = round_robin(&input, 3).unwrap();
        assert_eq!(sizes(&assignments), vec![9, 8, 8]);
    }

    #[test]
    fn test_range_keeps_contiguous_runs() {
        let input = streams(&[("s1", 16), ("s2", 8), ("s3", 1)]);
        let assignments = range(&input, 3).unwrap();

        // Consumer 0: s1[0..6], s2[0..3], s3[0..1].
        assert_eq!(sizes(&assignments)[0], 10);
        let first = assignments.partitions(0);
        assert_eq!(first[0], LogPartition::of(StreamName::new("s1").unwrap(), 0));
        assert_eq!(first[5], LogPartition::of(StreamName::new("s1").unwrap(), 5));
        assert_eq!(first[6], LogPartition::of(StreamName::new("s2").unwrap(), 0));
        assert_eq!(first[9], LogPartition::of(StreamName::new("s3").unwrap(), 0));

        // Consumer 2 gets the tail runs only: s1[12..16], s2[6..8].
        assert_eq!(sizes(&assignments)[2], 6);
    }

    #[test]
    fn test_assignment_covers_every_partition_once() {
        let input = streams(&[("a", 5), ("b", 7), ("c", 2)]);
        for strategy in [Strategy::RoundRobin, Strategy::Range] {
            let assignments = assign(strategy, &input, 4).unwrap();
            let mut all: Vec<_> = assignments
                .into_inner()
                .into_iter()
                .flatten()
                .collect();
            all.sort();
            all.dedup();
            assert_eq!(all.len(), 14, "{strategy:?} must cover all partitions");
        }
    }

    #[test]
    fn test_assignment_is_deterministic_under_input_order() {
        let forward = streams(&[("s1", 4), ("s2", 4)]);
        let backward = streams(&[("s2", 4), ("s1", 4)]);
        assert_eq!(
            round_robin(&forward, 2).unwrap(),
            round_robin(&backward, 2).unwrap()
        );
    }

    #[test]
    fn test_more_consumers_than_partitions() {
        let input = streams(&[("only", 2)]);
        let assignments = round_robin(&input, 5).unwrap();
        assert_eq!(sizes(&assignments), vec![1, 1, 0, 0, 0]);

        let assignments = range(&input, 5).unwrap();
        assert_eq!(sizes(&assignments), vec![1, 1, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        let input = streams(&[("s", 4)]);
        assert!(round_robin(&input, 0).is_err());

        let zero = streams(&[("s", 0)]);
        assert!(round_robin(&zero, 1).is_err());

        let duplicated = streams(&[("s", 2), ("s", 3)]);
        assert!(range(&duplicated, 1).is_err());
    }
}
