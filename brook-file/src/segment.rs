//! Segment files: the on-disk unit of a partition.
//!
//! A partition directory holds one file per segment, named
//! `<cycle_start_ms>-<base_offset>.seg` with both numbers zero-padded so
//! lexicographic order equals log order.
//!
//! # File format
//!
//! A 24-byte header:
//!
//! - 8 bytes: magic `BRKSEG01`
//! - 8 bytes: base offset (u64 little-endian)
//! - 8 bytes: cycle start (i64 little-endian, millis since epoch)
//!
//! followed by one frame per record:
//!
//! - 4 bytes: payload length (u32 little-endian)
//! - 4 bytes: CRC-32 of the payload
//! - payload: offset (u64 little-endian) + the record's binary form
//!
//! Frames are synced before an append is acknowledged. On reopen the
//! file is scanned frame by frame; the first torn or corrupt frame marks
//! the end of the valid prefix and the caller truncates there, so a
//! crash can lose at most unacknowledged writes.

use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt, SeekFrom};
use tracing::warn;

use brook_core::{Offset, Record, StreamError, StreamResult};

const MAGIC: [u8; 8] = *b"BRKSEG01";
const HEADER_LEN: u64 = 24;
const FRAME_HEADER_LEN: usize = 8;

/// Upper bound on a single frame payload. Anything larger on disk is
/// treated as corruption rather than an allocation request.
const FRAME_LEN_MAX: u32 = 64 * 1024 * 1024;

/// Extension of segment files.
pub(crate) const SEGMENT_EXT: &str = "seg";

/// In-memory description of one segment file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentMeta {
    /// Path of the backing file.
    pub path: PathBuf,
    /// Offset of the segment's first record.
    pub base_offset: u64,
    /// Start of the roll cycle the segment belongs to.
    pub cycle_start_ms: i64,
    /// One past the segment's last record.
    pub next_offset: u64,
}

impl SegmentMeta {
    /// Returns true if the segment holds the given offset.
    pub(crate) const fn contains(&self, offset: u64) -> bool {
        offset >= self.base_offset && offset < self.next_offset
    }

    /// Returns the number of records in the segment.
    pub(crate) const fn record_count(&self) -> u64 {
        self.next_offset - self.base_offset
    }
}

/// Builds a segment file name from its identity.
pub(crate) fn segment_file_name(cycle_start_ms: i64, base_offset: u64) -> String {
    format!("{cycle_start_ms:020}-{base_offset:020}.{SEGMENT_EXT}")
}

/// Parses `(cycle_start_ms, base_offset)` back out of a file name.
pub(crate) fn parse_segment_file_name(name: &str) -> Option<(i64, u64)> {
    let stem = name.strip_suffix(&format!(".{SEGMENT_EXT}"))?;
    let (cycle, base) = stem.split_once('-')?;
    Some((cycle.parse().ok()?, base.parse().ok()?))
}

/// An open segment accepting appends.
#[derive(Debug)]
pub(crate) struct SegmentWriter {
    file: File,
    meta: SegmentMeta,
}

impl SegmentWriter {
    /// Creates a fresh segment file and writes its header.
    pub(crate) async fn create(
        dir: &Path,
        cycle_start_ms: i64,
        base_offset: u64,
    ) -> StreamResult<Self> {
        let path = dir.join(segment_file_name(cycle_start_ms, base_offset));
        let mut file = tokio::fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .await
            .map_err(|e| StreamError::backend("segment create", e))?;

        let mut header = BytesMut::with_capacity(HEADER_LEN as usize);
        header.put_slice(&MAGIC);
        header.put_u64_le(base_offset);
        header.put_i64_le(cycle_start_ms);
        file.write_all(&header)
            .await
            .map_err(|e| StreamError::backend("segment create", e))?;
        file.sync_data()
            .await
            .map_err(|e| StreamError::backend("segment create", e))?;

        Ok(Self {
            file,
            meta: SegmentMeta {
                path,
                base_offset,
                cycle_start_ms,
                next_offset: base_offset,
            },
        })
    }

    /// Returns the segment's description.
    pub(crate) const fn meta(&self) -> &SegmentMeta {
        &self.meta
    }

    /// Appends one record and syncs it to disk.
    ///
    /// The record is durable when this returns.
    pub(crate) async fn append(&mut self, record: &Record) -> StreamResult<Offset> {
        let offset = self.meta.next_offset;
        let mut payload = BytesMut::with_capacity(8 + record.encoded_size());
        payload.put_u64_le(offset);
        record.encode(&mut payload);

        #[allow(clippy::cast_possible_truncation)] // Bounded by FRAME_LEN_MAX.
        let len = payload.len() as u32;
        if len > FRAME_LEN_MAX {
            return Err(StreamError::InvalidArgument {
                name: "record",
                reason: "record exceeds the maximum frame size",
            });
        }
        let mut frame = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.put_u32_le(len);
        frame.put_u32_le(crc32fast::hash(&payload));
        frame.put_slice(&payload);

        self.file
            .write_all(&frame)
            .await
            .map_err(|e| StreamError::backend("segment append", e))?;
        self.file
            .sync_data()
            .await
            .map_err(|e| StreamError::backend("segment append", e))?;
        self.meta.next_offset += 1;
        Ok(Offset::new(offset))
    }

    /// Seals the segment: final sync, then the writer is dropped.
    pub(crate) async fn seal(mut self) -> StreamResult<SegmentMeta> {
        self.file
            .sync_all()
            .await
            .map_err(|e| StreamError::backend("segment seal", e))?;
        Ok(self.meta)
    }
}

/// Scans a segment file, returning its description and the byte length
/// of the valid frame prefix.
///
/// Frames after the first torn or corrupt one are ignored; the caller
/// truncates the file to the returned length so later readers never see
/// them.
pub(crate) async fn recover(path: &Path) -> StreamResult<(SegmentMeta, u64)> {
    let mut file = File::open(path)
        .await
        .map_err(|e| StreamError::backend("segment recover", e))?;

    let mut header = [0_u8; HEADER_LEN as usize];
    file.read_exact(&mut header)
        .await
        .map_err(|_| StreamError::Corruption {
            message: format!("segment {} is shorter than its header", path.display()),
        })?;
    let mut header = &header[..];
    let mut magic = [0_u8; 8];
    header.copy_to_slice(&mut magic);
    if magic != MAGIC {
        return Err(StreamError::Corruption {
            message: format!("segment {} has a bad magic number", path.display()),
        });
    }
    let base_offset = header.get_u64_le();
    let cycle_start_ms = header.get_i64_le();

    let mut next_offset = base_offset;
    let mut valid_len = HEADER_LEN;
    loop {
        match read_frame(&mut file).await {
            Ok(Some((frame_len, payload))) => {
                let mut payload = payload.freeze();
                if payload.remaining() < 8 {
                    break;
                }
                let offset = payload.get_u64_le();
                if offset != next_offset || Record::decode(&mut payload).is_none() {
                    warn!(path = %path.display(), offset, "segment frame out of sequence, truncating");
                    break;
                }
                next_offset += 1;
                valid_len += u64::from(frame_len) + FRAME_HEADER_LEN as u64;
            }
            Ok(None) | Err(_) => break,
        }
    }

    Ok((
        SegmentMeta {
            path: path.to_path_buf(),
            base_offset,
            cycle_start_ms,
            next_offset,
        },
        valid_len,
    ))
}

/// Reads the record at `target` by scanning the segment from its start.
///
/// Returns `None` if `target` falls outside the segment's valid frames.
pub(crate) async fn read_at(meta: &SegmentMeta, target: u64) -> StreamResult<Option<Record>> {
    if !meta.contains(target) {
        return Ok(None);
    }
    let mut file = File::open(&meta.path)
        .await
        .map_err(|e| StreamError::backend("segment read", e))?;
    file.seek(SeekFrom::Start(HEADER_LEN))
        .await
        .map_err(|e| StreamError::backend("segment read", e))?;

    // Skip full frames up to the target, then decode one.
    let mut current = meta.base_offset;
    loop {
        if current < target {
            let Some(frame_len) = read_frame_len(&mut file).await? else {
                return Ok(None);
            };
            file.seek(SeekFrom::Current(i64::from(frame_len) + 4))
                .await
                .map_err(|e| StreamError::backend("segment read", e))?;
            current += 1;
            continue;
        }
        let Some((_, payload)) = read_frame(&mut file).await? else {
            return Ok(None);
        };
        let mut payload = payload.freeze();
        if payload.remaining() < 8 {
            return Err(corrupt_frame(meta, target));
        }
        let offset = payload.get_u64_le();
        if offset != target {
            return Err(corrupt_frame(meta, target));
        }
        return Record::decode(&mut payload)
            .map(Some)
            .ok_or_else(|| corrupt_frame(meta, target));
    }
}

fn corrupt_frame(meta: &SegmentMeta, offset: u64) -> StreamError {
    StreamError::Corruption {
        message: format!(
            "segment {} has a corrupt frame at offset {offset}",
            meta.path.display()
        ),
    }
}

/// Reads one frame, validating its CRC.
///
/// Returns `Ok(None)` on a clean or torn end of file.
async fn read_frame(file: &mut File) -> StreamResult<Option<(u32, BytesMut)>> {
    let Some(frame_len) = read_frame_len(&mut *file).await? else {
        return Ok(None);
    };
    let mut crc = [0_u8; 4];
    if file.read_exact(&mut crc).await.is_err() {
        return Ok(None);
    }
    let expected = u32::from_le_bytes(crc);

    let mut payload = BytesMut::zeroed(frame_len as usize);
    if file.read_exact(&mut payload).await.is_err() {
        return Ok(None);
    }
    if crc32fast::hash(&payload) != expected {
        return Ok(None);
    }
    Ok(Some((frame_len, payload)))
}

/// Reads a frame's length prefix, rejecting absurd values.
async fn read_frame_len(file: &mut File) -> StreamResult<Option<u32>> {
    let mut len = [0_u8; 4];
    if file.read_exact(&mut len).await.is_err() {
        return Ok(None);
    }
    let frame_len = u32::from_le_bytes(len);
    if frame_len > FRAME_LEN_MAX {
        return Ok(None);
    }
    Ok(Some(frame_len))
}
