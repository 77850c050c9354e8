//! Wire protocol between the broker and its client driver.
//!
//! Every message is a frame: a 4-byte little-endian length covering the
//! rest of the frame, a 1-byte message tag, and a tag-specific payload.
//! Strings are a u16 length plus UTF-8 bytes; records use the shared
//! binary form from `brook-core`.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use brook_core::{GroupName, Record, StreamError, StreamName, StreamResult};

/// Upper bound on a frame, guarding allocation on malformed input.
const FRAME_LEN_MAX: u32 = 64 * 1024 * 1024;

/// Most records a single fetch returns.
pub(crate) const FETCH_BATCH_MAX: u32 = 64;

/// A request from the driver to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Request {
    /// Create a stream if absent.
    CreateStream { stream: StreamName, partitions: u32 },
    /// Existence and partition count of a stream.
    StreamInfo { stream: StreamName },
    /// All stream names.
    ListStreams,
    /// First and end offsets of one partition.
    Bounds { stream: StreamName, partition: u32 },
    /// Durably append one record.
    Append {
        stream: StreamName,
        partition: u32,
        record: Record,
    },
    /// Read up to `max_records` starting at `offset`.
    Fetch {
        stream: StreamName,
        partition: u32,
        offset: u64,
        max_records: u32,
    },
    /// Persist a group's position.
    Commit {
        group: GroupName,
        stream: StreamName,
        partition: u32,
        offset: u64,
    },
    /// A group's persisted position, if any.
    Committed {
        group: GroupName,
        stream: StreamName,
        partition: u32,
    },
    /// Drop a group's positions on one stream.
    Reset { group: GroupName, stream: StreamName },
    /// Groups with positions on one stream.
    ListGroups { stream: StreamName },
}

/// A broker reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Response {
    /// Outcome of a create: `true` if the stream was created.
    Created { created: bool },
    /// Stream existence and partition count.
    Info { exists: bool, partitions: u32 },
    /// Stream names, sorted.
    Streams { names: Vec<StreamName> },
    /// Offset bounds of a partition.
    Bounds { first: u64, end: u64 },
    /// Offset assigned to an append.
    Appended { offset: u64 },
    /// Fetched records plus the partition's end offset at fetch time.
    Records {
        entries: Vec<(u64, Record)>,
        end: u64,
    },
    /// A group's committed offset, if any.
    CommittedOffset { offset: Option<u64> },
    /// Group names, sorted.
    Groups { names: Vec<GroupName> },
    /// Acknowledgement with no payload.
    Done,
    /// A typed failure.
    Error(WireError),
}

/// Failure codes carried over the wire.
///
/// The client rebuilds a full [`StreamError`] from the code plus the
/// request it sent; only what the server knows and the client does not
/// crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum WireError {
    /// Stream exists with a different partition count.
    AlreadyExists { existing: u32 },
    /// Stream does not exist.
    UnknownStream,
    /// Partition index out of range.
    InvalidPartition { count: u32 },
    /// Offset outside the retained range.
    PositionNotFound { offset: u64 },
    /// Anything else; carries a description.
    Internal { message: String },
}

const TAG_CREATE: u8 = 0x01;
const TAG_INFO: u8 = 0x02;
const TAG_LIST_STREAMS: u8 = 0x03;
const TAG_BOUNDS: u8 = 0x04;
const TAG_APPEND: u8 = 0x05;
const TAG_FETCH: u8 = 0x06;
const TAG_COMMIT: u8 = 0x07;
const TAG_COMMITTED: u8 = 0x08;
const TAG_RESET: u8 = 0x09;
const TAG_LIST_GROUPS: u8 = 0x0a;

const TAG_R_CREATED: u8 = 0x81;
const TAG_R_INFO: u8 = 0x82;
const TAG_R_STREAMS: u8 = 0x83;
const TAG_R_BOUNDS: u8 = 0x84;
const TAG_R_APPENDED: u8 = 0x85;
const TAG_R_RECORDS: u8 = 0x86;
const TAG_R_COMMITTED: u8 = 0x87;
const TAG_R_GROUPS: u8 = 0x88;
const TAG_R_DONE: u8 = 0x89;
const TAG_R_ERROR: u8 = 0xff;

const CODE_ALREADY_EXISTS: u8 = 1;
const CODE_UNKNOWN_STREAM: u8 = 2;
const CODE_INVALID_PARTITION: u8 = 3;
const CODE_POSITION_NOT_FOUND: u8 = 4;
const CODE_INTERNAL: u8 = 5;

impl Request {
    pub(crate) fn encode(&self) -> (u8, BytesMut) {
        let mut buf = BytesMut::new();
        let tag = match self {
            Self::CreateStream { stream, partitions } => {
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partitions);
                TAG_CREATE
            }
            Self::StreamInfo { stream } => {
                put_name(&mut buf, stream.as_str());
                TAG_INFO
            }
            Self::ListStreams => TAG_LIST_STREAMS,
            Self::Bounds { stream, partition } => {
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partition);
                TAG_BOUNDS
            }
            Self::Append {
                stream,
                partition,
                record,
            } => {
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partition);
                record.encode(&mut buf);
                TAG_APPEND
            }
            Self::Fetch {
                stream,
                partition,
                offset,
                max_records,
            } => {
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partition);
                buf.put_u64_le(*offset);
                buf.put_u32_le(*max_records);
                TAG_FETCH
            }
            Self::Commit {
                group,
                stream,
                partition,
                offset,
            } => {
                put_name(&mut buf, group.as_str());
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partition);
                buf.put_u64_le(*offset);
                TAG_COMMIT
            }
            Self::Committed {
                group,
                stream,
                partition,
            } => {
                put_name(&mut buf, group.as_str());
                put_name(&mut buf, stream.as_str());
                buf.put_u32_le(*partition);
                TAG_COMMITTED
            }
            Self::Reset { group, stream } => {
                put_name(&mut buf, group.as_str());
                put_name(&mut buf, stream.as_str());
                TAG_RESET
            }
            Self::ListGroups { stream } => {
                put_name(&mut buf, stream.as_str());
                TAG_LIST_GROUPS
            }
        };
        (tag, buf)
    }

    pub(crate) fn decode(tag: u8, mut buf: Bytes) -> StreamResult<Self> {
        let request = match tag {
            TAG_CREATE => Self::CreateStream {
                stream: get_stream(&mut buf)?,
                partitions: get_u32(&mut buf)?,
            },
            TAG_INFO => Self::StreamInfo {
                stream: get_stream(&mut buf)?,
            },
            TAG_LIST_STREAMS => Self::ListStreams,
            TAG_BOUNDS => Self::Bounds {
                stream: get_stream(&mut buf)?,
                partition: get_u32(&mut buf)?,
            },
            TAG_APPEND => Self::Append {
                stream: get_stream(&mut buf)?,
                partition: get_u32(&mut buf)?,
                record: get_record(&mut buf)?,
            },
            TAG_FETCH => Self::Fetch {
                stream: get_stream(&mut buf)?,
                partition: get_u32(&mut buf)?,
                offset: get_u64(&mut buf)?,
                max_records: get_u32(&mut buf)?,
            },
            TAG_COMMIT => Self::Commit {
                group: get_group(&mut buf)?,
                stream: get_stream(&mut buf)?,
                partition: get_u32(&mut buf)?,
                offset: get_u64(&mut buf)?,
            },
            TAG_COMMITTED => Self::Committed {
                group: get_group(&mut buf)?,
                stream: get_stream(&mut buf)?,
                partition: get_u32(&mut buf)?,
            },
            TAG_RESET => Self::Reset {
                group: get_group(&mut buf)?,
                stream: get_stream(&mut buf)?,
            },
            TAG_LIST_GROUPS => Self::ListGroups {
                stream: get_stream(&mut buf)?,
            },
            other => {
                return Err(StreamError::Corruption {
                    message: format!("unknown request tag {other:#04x}"),
                })
            }
        };
        Ok(request)
    }
}

impl Response {
    pub(crate) fn encode(&self) -> (u8, BytesMut) {
        let mut buf = BytesMut::new();
        let tag = match self {
            Self::Created { created } => {
                buf.put_u8(u8::from(*created));
                TAG_R_CREATED
            }
            Self::Info { exists, partitions } => {
                buf.put_u8(u8::from(*exists));
                buf.put_u32_le(*partitions);
                TAG_R_INFO
            }
            Self::Streams { names } => {
                put_name_list(&mut buf, names.iter().map(StreamName::as_str));
                TAG_R_STREAMS
            }
            Self::Bounds { first, end } => {
                buf.put_u64_le(*first);
                buf.put_u64_le(*end);
                TAG_R_BOUNDS
            }
            Self::Appended { offset } => {
                buf.put_u64_le(*offset);
                TAG_R_APPENDED
            }
            Self::Records { entries, end } => {
                buf.put_u64_le(*end);
                #[allow(clippy::cast_possible_truncation)] // Bounded by FETCH_BATCH_MAX.
                buf.put_u32_le(entries.len() as u32);
                for (offset, record) in entries {
                    buf.put_u64_le(*offset);
                    record.encode(&mut buf);
                }
                TAG_R_RECORDS
            }
            Self::CommittedOffset { offset } => {
                match offset {
                    Some(offset) => {
                        buf.put_u8(1);
                        buf.put_u64_le(*offset);
                    }
                    None => buf.put_u8(0),
                }
                TAG_R_COMMITTED
            }
            Self::Groups { names } => {
                put_name_list(&mut buf, names.iter().map(GroupName::as_str));
                TAG_R_GROUPS
            }
            Self::Done => TAG_R_DONE,
            Self::Error(error) => {
                match error {
                    WireError::AlreadyExists { existing } => {
                        buf.put_u8(CODE_ALREADY_EXISTS);
                        buf.put_u32_le(*existing);
                    }
                    WireError::UnknownStream => buf.put_u8(CODE_UNKNOWN_STREAM),
                    WireError::InvalidPartition { count } => {
                        buf.put_u8(CODE_INVALID_PARTITION);
                        buf.put_u32_le(*count);
                    }
                    WireError::PositionNotFound { offset } => {
                        buf.put_u8(CODE_POSITION_NOT_FOUND);
                        buf.put_u64_le(*offset);
                    }
                    WireError::Internal { message } => {
                        buf.put_u8(CODE_INTERNAL);
                        put_name(&mut buf, message);
                    }
                }
                TAG_R_ERROR
            }
        };
        (tag, buf)
    }

    pub(crate) fn decode(tag: u8, mut buf: Bytes) -> StreamResult<Self> {
        let response = match tag {
            TAG_R_CREATED => Self::Created {
                created: get_u8(&mut buf)? != 0,
            },
            TAG_R_INFO => Self::Info {
                exists: get_u8(&mut buf)? != 0,
                partitions: get_u32(&mut buf)?,
            },
            TAG_R_STREAMS => {
                let mut names = Vec::new();
                for name in get_name_list(&mut buf)? {
                    names.push(StreamName::new(&name).map_err(|_| malformed("stream name"))?);
                }
                Self::Streams { names }
            }
            TAG_R_BOUNDS => Self::Bounds {
                first: get_u64(&mut buf)?,
                end: get_u64(&mut buf)?,
            },
            TAG_R_APPENDED => Self::Appended {
                offset: get_u64(&mut buf)?,
            },
            TAG_R_RECORDS => {
                let end = get_u64(&mut buf)?;
                let count = get_u32(&mut buf)?;
                if count > FETCH_BATCH_MAX {
                    return Err(malformed("record batch"));
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let offset = get_u64(&mut buf)?;
                    entries.push((offset, get_record(&mut buf)?));
                }
                Self::Records { entries, end }
            }
            TAG_R_COMMITTED => {
                let offset = if get_u8(&mut buf)? != 0 {
                    Some(get_u64(&mut buf)?)
                } else {
                    None
                };
                Self::CommittedOffset { offset }
            }
            TAG_R_GROUPS => {
                let mut names = Vec::new();
                for name in get_name_list(&mut buf)? {
                    names.push(GroupName::new(&name).map_err(|_| malformed("group name"))?);
                }
                Self::Groups { names }
            }
            TAG_R_DONE => Self::Done,
            TAG_R_ERROR => {
                let error = match get_u8(&mut buf)? {
                    CODE_ALREADY_EXISTS => WireError::AlreadyExists {
                        existing: get_u32(&mut buf)?,
                    },
                    CODE_UNKNOWN_STREAM => WireError::UnknownStream,
                    CODE_INVALID_PARTITION => WireError::InvalidPartition {
                        count: get_u32(&mut buf)?,
                    },
                    CODE_POSITION_NOT_FOUND => WireError::PositionNotFound {
                        offset: get_u64(&mut buf)?,
                    },
                    CODE_INTERNAL => WireError::Internal {
                        message: get_string(&mut buf)?,
                    },
                    _ => return Err(malformed("error code")),
                };
                Self::Error(error)
            }
            other => {
                return Err(StreamError::Corruption {
                    message: format!("unknown response tag {other:#04x}"),
                })
            }
        };
        Ok(response)
    }
}

/// Writes one frame: length, tag, payload.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    // Compare before casting: a payload past u32::MAX must not wrap
    // under the limit.
    if payload.len() + 1 > FRAME_LEN_MAX as usize {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "frame exceeds maximum length",
        ));
    }
    #[allow(clippy::cast_possible_truncation)] // Checked against FRAME_LEN_MAX.
    let len = (payload.len() + 1) as u32;
    let mut head = BytesMut::with_capacity(5);
    head.put_u32_le(len);
    head.put_u8(tag);
    writer.write_all(&head).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

/// Reads one frame, returning `None` on a clean end of stream.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> StreamResult<Option<(u8, Bytes)>> {
    let mut head = [0_u8; 4];
    match reader.read_exact(&mut head).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(StreamError::backend("frame read", e)),
    }
    let len = u32::from_le_bytes(head);
    if len == 0 || len > FRAME_LEN_MAX {
        return Err(StreamError::Corruption {
            message: format!("frame length {len} outside the accepted range"),
        });
    }
    let mut body = BytesMut::zeroed(len as usize);
    reader
        .read_exact(&mut body)
        .await
        .map_err(|e| StreamError::backend("frame read", e))?;
    let mut body = body.freeze();
    let tag = body.get_u8();
    Ok(Some((tag, body)))
}

fn put_name(buf: &mut BytesMut, name: &str) {
    #[allow(clippy::cast_possible_truncation)] // Names are length-validated.
    buf.put_u16_le(name.len() as u16);
    buf.put_slice(name.as_bytes());
}

fn put_name_list<'a>(buf: &mut BytesMut, names: impl ExactSizeIterator<Item = &'a str>) {
    #[allow(clippy::cast_possible_truncation)]
    buf.put_u32_le(names.len() as u32);
    for name in names {
        put_name(buf, name);
    }
}

fn get_name_list(buf: &mut Bytes) -> StreamResult<Vec<String>> {
    let count = get_u32(buf)?;
    let mut names = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        names.push(get_string(buf)?);
    }
    Ok(names)
}

fn get_string(buf: &mut Bytes) -> StreamResult<String> {
    if buf.remaining() < 2 {
        return Err(malformed("string"));
    }
    let len = buf.get_u16_le() as usize;
    if buf.remaining() < len {
        return Err(malformed("string"));
    }
    String::from_utf8(buf.copy_to_bytes(len).to_vec()).map_err(|_| malformed("string"))
}

fn get_stream(buf: &mut Bytes) -> StreamResult<StreamName> {
    StreamName::new(get_string(buf)?).map_err(|_| malformed("stream name"))
}

fn get_group(buf: &mut Bytes) -> StreamResult<GroupName> {
    GroupName::new(get_string(buf)?).map_err(|_| malformed("group name"))
}

fn get_record(buf: &mut Bytes) -> StreamResult<Record> {
    Record::decode(buf).ok_or_else(|| malformed("record"))
}

fn get_u8(buf: &mut Bytes) -> StreamResult<u8> {
    if buf.remaining() < 1 {
        return Err(malformed("u8"));
    }
    Ok(buf.get_u8())
}

fn get_u32(buf: &mut Bytes) -> StreamResult<u32> {
    if buf.remaining() < 4 {
        return Err(malformed("u32"));
    }
    Ok(buf.get_u32_le())
}

fn get_u64(buf: &mut Bytes) -> StreamResult<u64> {
    if buf.remaining() < 8 {
        return Err(malformed("u64"));
    }
    Ok(buf.get_u64_le())
}

fn malformed(what: &str) -> StreamError {
    StreamError::Corruption {
        message: format!("malformed {what} field in frame"),
    }
}
