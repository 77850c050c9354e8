//! When a sealed segment may be reclaimed.

use std::time::Duration;

use brook_log::RetentionPolicy;

use crate::segment::SegmentMeta;

/// Everything the retention decision needs about one partition.
#[derive(Debug, Clone)]
pub(crate) struct RetentionView {
    /// Committed offsets of every group known on the partition.
    pub committed: Vec<u64>,
    /// Cursors of every open reader on the partition.
    pub cursors: Vec<u64>,
    /// Current wall-clock time.
    pub now_ms: i64,
}

/// Decides whether one sealed segment may be deleted.
///
/// Regardless of policy, a segment with an open reader cursor at or
/// before its last record is pinned: reclaim never yanks data out from
/// under a live tailer. The caller walks segments oldest first and stops
/// at the first `false`, so the retained range stays a contiguous
/// suffix.
pub(crate) fn segment_reclaimable(
    policy: RetentionPolicy,
    roll_cycle: Duration,
    view: &RetentionView,
    meta: &SegmentMeta,
) -> bool {
    if view.cursors.iter().any(|cursor| *cursor < meta.next_offset) {
        return false;
    }
    match policy {
        RetentionPolicy::UntilCommitted => {
            // With no group on record, nothing is ever reclaimed.
            !view.committed.is_empty()
                && view.committed.iter().all(|c| *c >= meta.next_offset)
        }
        RetentionPolicy::Ttl(ttl) => {
            let cycle_ms = i64::try_from(roll_cycle.as_millis()).unwrap_or(i64::MAX);
            let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
            let expires = meta
                .cycle_start_ms
                .saturating_add(cycle_ms)
                .saturating_add(ttl_ms);
            view.now_ms >= expires
        }
    }
}
