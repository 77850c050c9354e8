//! The rolling-file backend driver.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use brook_core::{
    Clock, GroupName, LogEntry, LogPartition, Offset, PartitionId, Position, Record, StreamError,
    StreamName, StreamResult, SystemClock,
};
use brook_log::{LogDriver, OpenOptions, ReadOutcome, ReaderId, RetentionPolicy, SeekTarget};

use crate::offsets::OffsetTable;
use crate::partition::FilePartition;
use crate::retention::{segment_reclaimable, RetentionView};

const META_FILE: &str = "meta";
const GROUPS_DIR: &str = "groups";

/// One stream's on-disk state.
#[derive(Debug)]
struct StreamHandle {
    count: u32,
    partitions: Vec<Arc<FilePartition>>,
}

/// A backend-owned read cursor.
#[derive(Debug, Clone)]
struct ReaderState {
    group: GroupName,
    partition: LogPartition,
    cursor: u64,
}

/// Backend storing each partition as a directory of time-rolled segment
/// files under a root directory.
///
/// Durability is reopen-from-path: everything needed to resume lives
/// under the root, so a process restart (or another process pointed at
/// the same root) sees all acknowledged records and commits.
pub struct FileDriver {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    roll_cycle: Duration,
    retention: RetentionPolicy,
    poll_interval: Duration,
    streams: Mutex<HashMap<StreamName, Arc<StreamHandle>>>,
    offsets: OffsetTable,
    readers: Mutex<HashMap<ReaderId, ReaderState>>,
    next_reader: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for FileDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileDriver")
            .field("root", &self.root)
            .field("roll_cycle", &self.roll_cycle)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl FileDriver {
    /// Opens a driver over a root directory using the system clock.
    ///
    /// # Errors
    /// Returns a backend error if the directory cannot be created or an
    /// existing layout fails recovery.
    pub async fn open(root: impl Into<PathBuf>, options: &OpenOptions) -> StreamResult<Self> {
        Self::open_with_clock(root, options, Arc::new(SystemClock)).await
    }

    /// Opens a driver with an explicit clock.
    ///
    /// Segment rolling and TTL retention follow the given clock, which
    /// lets tests cross roll boundaries without waiting.
    ///
    /// # Errors
    /// Same conditions as [`Self::open`].
    pub async fn open_with_clock(
        root: impl Into<PathBuf>,
        options: &OpenOptions,
        clock: Arc<dyn Clock>,
    ) -> StreamResult<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StreamError::backend("driver open", e))?;
        let offsets = OffsetTable::open(root.join(GROUPS_DIR)).await?;

        let mut streams = HashMap::new();
        let mut entries = tokio::fs::read_dir(&root)
            .await
            .map_err(|e| StreamError::backend("driver open", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StreamError::backend("driver open", e))?
        {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name == GROUPS_DIR {
                continue;
            }
            let Ok(stream) = StreamName::new(name) else {
                continue;
            };
            let dir = entry.path();
            if !tokio::fs::try_exists(dir.join(META_FILE))
                .await
                .map_err(|e| StreamError::backend("driver open", e))?
            {
                continue;
            }
            let handle = open_stream(&dir, &stream).await?;
            streams.insert(stream, Arc::new(handle));
        }
        info!(root = %root.display(), streams = streams.len(), "opened file driver");

        Ok(Self {
            root,
            clock,
            roll_cycle: options.roll_cycle,
            retention: options.retention,
            poll_interval: options.poll_interval,
            streams: Mutex::new(streams),
            offsets,
            readers: Mutex::new(HashMap::new()),
            next_reader: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Reclaims every eligible sealed segment across all partitions,
    /// returning the number deleted.
    ///
    /// Reclaim also runs automatically after a segment roll; this is the
    /// explicit admin entry point.
    ///
    /// # Errors
    /// Returns a backend error if a deletion fails.
    pub async fn reclaim(&self) -> StreamResult<u64> {
        self.ensure_open()?;
        let handles: Vec<_> = {
            let streams = self.streams.lock().await;
            streams.values().flat_map(|h| h.partitions.iter().cloned()).collect()
        };
        let mut deleted = 0;
        for part in handles {
            deleted += self.reclaim_partition(&part).await?;
        }
        Ok(deleted)
    }

    async fn reclaim_partition(&self, part: &Arc<FilePartition>) -> StreamResult<u64> {
        let target = part.partition().clone();
        let committed = self.offsets.committed_all(&target).await?;
        let cursors: Vec<u64> = {
            let readers = self.readers.lock().await;
            readers
                .values()
                .filter(|r| r.partition == target)
                .map(|r| r.cursor)
                .collect()
        };
        let view = RetentionView {
            committed,
            cursors,
            now_ms: self.clock.now_millis(),
        };
        let policy = self.retention;
        let roll_cycle = self.roll_cycle;
        part.reclaim(move |meta| segment_reclaimable(policy, roll_cycle, &view, meta))
            .await
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed { resource: "file driver" });
        }
        Ok(())
    }

    async fn stream_handle(&self, stream: &StreamName) -> StreamResult<Arc<StreamHandle>> {
        let streams = self.streams.lock().await;
        streams
            .get(stream)
            .cloned()
            .ok_or_else(|| StreamError::UnknownStream {
                stream: stream.clone(),
            })
    }

    async fn partition_handle(&self, partition: &LogPartition) -> StreamResult<Arc<FilePartition>> {
        let handle = self.stream_handle(&partition.stream).await?;
        handle
            .partitions
            .get(partition.partition.get() as usize)
            .cloned()
            .ok_or_else(|| StreamError::InvalidPartition {
                stream: partition.stream.clone(),
                partition: partition.partition,
                count: handle.count,
            })
    }

    async fn reader_state(&self, reader: ReaderId) -> StreamResult<ReaderState> {
        let readers = self.readers.lock().await;
        readers
            .get(&reader)
            .cloned()
            .ok_or(StreamError::Closed { resource: "reader" })
    }

    async fn resolve_target(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        part: &FilePartition,
        target: SeekTarget,
    ) -> StreamResult<u64> {
        let first = part.first_offset().await;
        let end = part.end_offset().await;
        match target {
            SeekTarget::Start => Ok(first),
            SeekTarget::End => Ok(end),
            SeekTarget::LastCommitted => {
                let committed = self.offsets.committed(group, partition).await?;
                Ok(committed.map_or(first, |offset| offset.clamp(first, end)))
            }
            SeekTarget::At(offset) => {
                let offset = offset.get();
                if offset < first || offset > end {
                    return Err(StreamError::PositionNotFound {
                        partition: partition.clone(),
                        offset: Offset::new(offset),
                    });
                }
                Ok(offset)
            }
        }
    }
}

async fn open_stream(dir: &std::path::Path, stream: &StreamName) -> StreamResult<StreamHandle> {
    let meta = tokio::fs::read_to_string(dir.join(META_FILE))
        .await
        .map_err(|e| StreamError::backend("stream open", e))?;
    let count: u32 = meta.trim().parse().map_err(|_| StreamError::Corruption {
        message: format!("stream '{stream}' has a malformed meta file"),
    })?;

    let mut partitions = Vec::with_capacity(count as usize);
    for index in 0..count {
        let target = LogPartition::new(stream.clone(), PartitionId::new(index));
        let part = FilePartition::open(dir.join(format!("p{index}")), target).await?;
        partitions.push(Arc::new(part));
    }
    Ok(StreamHandle { count, partitions })
}

#[async_trait]
impl LogDriver for FileDriver {
    async fn create_stream(&self, stream: &StreamName, partitions: u32) -> StreamResult<bool> {
        self.ensure_open()?;
        let mut streams = self.streams.lock().await;
        if let Some(existing) = streams.get(stream) {
            if existing.count == partitions {
                return Ok(false);
            }
            return Err(StreamError::AlreadyExists {
                stream: stream.clone(),
                existing: existing.count,
                requested: partitions,
            });
        }

        let dir = self.root.join(stream.as_str());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StreamError::backend("stream create", e))?;

        // Another process may have created the stream since our last
        // scan; the meta file on disk is the source of truth.
        if tokio::fs::try_exists(dir.join(META_FILE))
            .await
            .map_err(|e| StreamError::backend("stream create", e))?
        {
            let handle = open_stream(&dir, stream).await?;
            let existing = handle.count;
            streams.insert(stream.clone(), Arc::new(handle));
            if existing == partitions {
                return Ok(false);
            }
            return Err(StreamError::AlreadyExists {
                stream: stream.clone(),
                existing,
                requested: partitions,
            });
        }

        let tmp = dir.join("meta.tmp");
        tokio::fs::write(&tmp, format!("{partitions}\n"))
            .await
            .map_err(|e| StreamError::backend("stream create", e))?;
        tokio::fs::rename(&tmp, dir.join(META_FILE))
            .await
            .map_err(|e| StreamError::backend("stream create", e))?;

        let handle = open_stream(&dir, stream).await?;
        streams.insert(stream.clone(), Arc::new(handle));
        debug!(stream = %stream, partitions, "created stream directories");
        Ok(true)
    }

    async fn exists(&self, stream: &StreamName) -> StreamResult<bool> {
        self.ensure_open()?;
        Ok(self.streams.lock().await.contains_key(stream))
    }

    async fn partition_count(&self, stream: &StreamName) -> StreamResult<u32> {
        self.ensure_open()?;
        Ok(self.stream_handle(stream).await?.count)
    }

    async fn list_streams(&self) -> StreamResult<Vec<StreamName>> {
        self.ensure_open()?;
        let mut names: Vec<_> = self.streams.lock().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn first_offset(&self, partition: &LogPartition) -> StreamResult<Offset> {
        self.ensure_open()?;
        let part = self.partition_handle(partition).await?;
        Ok(Offset::new(part.first_offset().await))
    }

    async fn end_offset(&self, partition: &LogPartition) -> StreamResult<Offset> {
        self.ensure_open()?;
        let part = self.partition_handle(partition).await?;
        Ok(Offset::new(part.end_offset().await))
    }

    async fn append(&self, partition: &LogPartition, record: Record) -> StreamResult<Position> {
        self.ensure_open()?;
        let part = self.partition_handle(partition).await?;
        let (offset, rolled) = part
            .append(self.clock.now_millis(), self.roll_cycle, &record)
            .await?;
        if rolled {
            self.reclaim_partition(&part).await?;
        }
        Ok(Position::new(partition.partition, offset))
    }

    async fn open_reader(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        target: SeekTarget,
    ) -> StreamResult<ReaderId> {
        self.ensure_open()?;
        let part = self.partition_handle(partition).await?;
        let cursor = self.resolve_target(group, partition, &part, target).await?;
        let reader = ReaderId::new(self.next_reader.fetch_add(1, Ordering::Relaxed));
        self.readers.lock().await.insert(
            reader,
            ReaderState {
                group: group.clone(),
                partition: partition.clone(),
                cursor,
            },
        );
        Ok(reader)
    }

    async fn seek_reader(&self, reader: ReaderId, target: SeekTarget) -> StreamResult<()> {
        self.ensure_open()?;
        let state = self.reader_state(reader).await?;
        let part = self.partition_handle(&state.partition).await?;
        let cursor = self
            .resolve_target(&state.group, &state.partition, &part, target)
            .await?;
        let mut readers = self.readers.lock().await;
        let entry = readers
            .get_mut(&reader)
            .ok_or(StreamError::Closed { resource: "reader" })?;
        entry.cursor = cursor;
        Ok(())
    }

    async fn read_next(&self, reader: ReaderId, timeout: Duration) -> StreamResult<ReadOutcome> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.reader_state(reader).await?;
            let part = self.partition_handle(&state.partition).await?;
            if let Some(record) = part.read_at(state.cursor).await? {
                let mut readers = self.readers.lock().await;
                let entry = readers
                    .get_mut(&reader)
                    .ok_or(StreamError::Closed { resource: "reader" })?;
                entry.cursor = state.cursor + 1;
                return Ok(ReadOutcome::Entry(LogEntry::new(
                    state.partition,
                    Offset::new(state.cursor),
                    record,
                )));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(ReadOutcome::Timeout);
            }
            tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
        }
    }

    async fn reader_position(&self, reader: ReaderId) -> StreamResult<Offset> {
        self.ensure_open()?;
        Ok(Offset::new(self.reader_state(reader).await?.cursor))
    }

    async fn close_reader(&self, reader: ReaderId) -> StreamResult<()> {
        self.readers.lock().await.remove(&reader);
        Ok(())
    }

    async fn committed(
        &self,
        group: &GroupName,
        partition: &LogPartition,
    ) -> StreamResult<Option<Offset>> {
        self.ensure_open()?;
        self.partition_handle(partition).await?;
        Ok(self
            .offsets
            .committed(group, partition)
            .await?
            .map(Offset::new))
    }

    async fn commit(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        offset: Offset,
    ) -> StreamResult<()> {
        self.ensure_open()?;
        self.partition_handle(partition).await?;
        self.offsets.commit(group, partition, offset.get()).await
    }

    async fn reset_positions(&self, group: &GroupName, stream: &StreamName) -> StreamResult<()> {
        self.ensure_open()?;
        self.stream_handle(stream).await?;
        self.offsets.reset(group, stream).await
    }

    async fn list_consumer_groups(&self, stream: &StreamName) -> StreamResult<Vec<GroupName>> {
        self.ensure_open()?;
        self.stream_handle(stream).await?;
        self.offsets.groups_for(stream).await
    }

    async fn close(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.readers.lock().await.clear();
        let handles: Vec<_> = {
            let streams = self.streams.lock().await;
            streams.values().flat_map(|h| h.partitions.iter().cloned()).collect()
        };
        for part in handles {
            part.seal_active().await?;
        }
        info!(root = %self.root.display(), "closed file driver");
        Ok(())
    }
}
