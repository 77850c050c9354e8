//! One partition's directory of segments.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use brook_core::{LogPartition, Offset, Record, StreamError, StreamResult};

use crate::segment::{self, SegmentMeta, SegmentWriter};

/// A partition on disk: a directory of sealed segments plus at most one
/// active segment accepting appends.
///
/// All mutation happens under one async mutex. Reads snapshot the
/// segment list under the lock, then scan files without holding it, so
/// a slow read never blocks the appender.
#[derive(Debug)]
pub(crate) struct FilePartition {
    dir: PathBuf,
    partition: LogPartition,
    state: Mutex<PartitionState>,
}

#[derive(Debug)]
struct PartitionState {
    /// Sealed segments, oldest first.
    sealed: Vec<SegmentMeta>,
    active: Option<SegmentWriter>,
    next_offset: u64,
}

/// Floors a timestamp to the start of its roll cycle.
pub(crate) fn cycle_floor(now_ms: i64, roll_cycle: Duration) -> i64 {
    let cycle = i64::try_from(roll_cycle.as_millis()).unwrap_or(i64::MAX).max(1);
    now_ms.div_euclid(cycle) * cycle
}

impl FilePartition {
    /// Opens a partition directory, recovering every segment found.
    ///
    /// Recovery truncates each file to its valid frame prefix, so a
    /// crash during an append loses at most the unacknowledged record.
    /// All recovered segments are treated as sealed; the next append
    /// starts a fresh segment.
    pub(crate) async fn open(dir: PathBuf, partition: LogPartition) -> StreamResult<Self> {
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StreamError::backend("partition open", e))?;

        let mut sealed = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| StreamError::backend("partition open", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StreamError::backend("partition open", e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if segment::parse_segment_file_name(name).is_none() {
                continue;
            }
            let path = entry.path();
            let (meta, valid_len) = segment::recover(&path).await?;
            let actual_len = tokio::fs::metadata(&path)
                .await
                .map_err(|e| StreamError::backend("partition open", e))?
                .len();
            if valid_len < actual_len {
                info!(path = %path.display(), valid_len, actual_len, "truncating torn segment tail");
                truncate(&path, valid_len).await?;
            }
            sealed.push(meta);
        }
        sealed.sort_by_key(|meta| (meta.cycle_start_ms, meta.base_offset));

        // Empty recovered segments carry no records; drop their files.
        let mut kept = Vec::with_capacity(sealed.len());
        for meta in sealed {
            if meta.record_count() == 0 {
                let _ = tokio::fs::remove_file(&meta.path).await;
            } else {
                kept.push(meta);
            }
        }

        let next_offset = kept.last().map_or(0, |meta| meta.next_offset);
        debug!(partition = %partition, segments = kept.len(), next_offset, "opened partition");
        Ok(Self {
            dir,
            partition,
            state: Mutex::new(PartitionState {
                sealed: kept,
                active: None,
                next_offset,
            }),
        })
    }

    pub(crate) const fn partition(&self) -> &LogPartition {
        &self.partition
    }

    /// Appends one record, rolling to a new segment when the clock has
    /// crossed a cycle boundary.
    ///
    /// Returns the assigned offset and whether a roll happened.
    pub(crate) async fn append(
        &self,
        now_ms: i64,
        roll_cycle: Duration,
        record: &Record,
    ) -> StreamResult<(Offset, bool)> {
        let mut state = self.state.lock().await;
        let cycle = cycle_floor(now_ms, roll_cycle);

        let mut rolled = false;
        let stale = state
            .active
            .as_ref()
            .is_some_and(|writer| writer.meta().cycle_start_ms != cycle);
        if stale {
            if let Some(writer) = state.active.take() {
                let meta = writer.seal().await?;
                debug!(partition = %self.partition, base = meta.base_offset, "sealed segment");
                state.sealed.push(meta);
                rolled = true;
            }
        }
        if state.active.is_none() {
            let writer = SegmentWriter::create(&self.dir, cycle, state.next_offset).await?;
            state.active = Some(writer);
        }

        let writer = state.active.as_mut().ok_or(StreamError::Closed {
            resource: "partition",
        })?;
        let offset = writer.append(record).await?;
        state.next_offset = offset.get() + 1;
        Ok((offset, rolled))
    }

    /// Returns the offset of the oldest retained record; equals the end
    /// offset when nothing is retained.
    pub(crate) async fn first_offset(&self) -> u64 {
        let state = self.state.lock().await;
        state
            .sealed
            .first()
            .map(|meta| meta.base_offset)
            .or_else(|| state.active.as_ref().map(|w| w.meta().base_offset))
            .unwrap_or(state.next_offset)
    }

    /// Returns one past the newest record.
    pub(crate) async fn end_offset(&self) -> u64 {
        self.state.lock().await.next_offset
    }

    /// Reads the record at `offset`.
    ///
    /// Returns `Ok(None)` when the offset is at or past the end (nothing
    /// to read yet).
    ///
    /// # Errors
    /// Returns [`StreamError::PositionNotFound`] when the offset falls
    /// before the oldest retained record.
    pub(crate) async fn read_at(&self, offset: u64) -> StreamResult<Option<Record>> {
        // Snapshot under the lock, scan files without it.
        let (segments, first, end) = {
            let state = self.state.lock().await;
            let mut segments = state.sealed.clone();
            if let Some(writer) = &state.active {
                segments.push(writer.meta().clone());
            }
            let first = segments
                .first()
                .map_or(state.next_offset, |meta| meta.base_offset);
            (segments, first, state.next_offset)
        };

        if offset >= end {
            return Ok(None);
        }
        if offset < first {
            return Err(StreamError::PositionNotFound {
                partition: self.partition.clone(),
                offset: Offset::new(offset),
            });
        }
        let meta = segments
            .iter()
            .find(|meta| meta.contains(offset))
            .ok_or_else(|| StreamError::PositionNotFound {
                partition: self.partition.clone(),
                offset: Offset::new(offset),
            })?;
        segment::read_at(meta, offset).await
    }

    /// Returns descriptions of the sealed segments, oldest first.
    pub(crate) async fn sealed_segments(&self) -> Vec<SegmentMeta> {
        self.state.lock().await.sealed.clone()
    }

    /// Deletes the longest eligible prefix of sealed segments.
    ///
    /// Reclaim only ever removes a prefix: the first ineligible segment
    /// stops the walk, so the retained range stays contiguous. Returns
    /// the number of segments deleted.
    pub(crate) async fn reclaim(
        &self,
        eligible: impl Fn(&SegmentMeta) -> bool,
    ) -> StreamResult<u64> {
        let mut state = self.state.lock().await;
        let mut deleted = 0;
        while let Some(meta) = state.sealed.first() {
            if !eligible(meta) {
                break;
            }
            let meta = state.sealed.remove(0);
            tokio::fs::remove_file(&meta.path)
                .await
                .map_err(|e| StreamError::backend("segment reclaim", e))?;
            info!(partition = %self.partition, base = meta.base_offset, records = meta.record_count(), "reclaimed segment");
            deleted += 1;
        }
        Ok(deleted)
    }

    /// Seals the active segment, if any. Used on driver close.
    pub(crate) async fn seal_active(&self) -> StreamResult<()> {
        let mut state = self.state.lock().await;
        if let Some(writer) = state.active.take() {
            let meta = writer.seal().await?;
            state.sealed.push(meta);
        }
        Ok(())
    }
}

async fn truncate(path: &Path, len: u64) -> StreamResult<()> {
    let file = tokio::fs::OpenOptions::new()
        .write(true)
        .open(path)
        .await
        .map_err(|e| StreamError::backend("segment truncate", e))?;
    file.set_len(len)
        .await
        .map_err(|e| StreamError::backend("segment truncate", e))?;
    file.sync_all()
        .await
        .map_err(|e| StreamError::backend("segment truncate", e))?;
    Ok(())
}
