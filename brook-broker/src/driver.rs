//! The client driver: a `LogDriver` speaking to a broker over TCP.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use brook_core::{
    GroupName, LogEntry, LogPartition, Offset, Position, Record, StreamError, StreamName,
    StreamResult,
};
use brook_log::{
    LogDriver, OpenOptions, ReadOutcome, ReaderId, RetryPolicy, SeekTarget,
};

use crate::codec::{self, Request, Response, WireError, FETCH_BATCH_MAX};

/// A client-side read cursor.
///
/// Fetches are batched: records beyond the one returned are parked in
/// `pending` and served without another round trip.
#[derive(Debug)]
struct ClientReader {
    group: GroupName,
    partition: LogPartition,
    cursor: u64,
    pending: VecDeque<(u64, Record)>,
}

/// Driver connecting to a [`Broker`](crate::Broker) over TCP.
///
/// Holds one connection, serializing requests on it. A broken
/// connection is re-established transparently with backoff for up to
/// the configured connection timeout; after that the original failure
/// is surfaced.
pub struct BrokerDriver {
    addr: SocketAddr,
    retry: RetryPolicy,
    poll_interval: Duration,
    conn: Mutex<Option<TcpStream>>,
    readers: Mutex<HashMap<ReaderId, ClientReader>>,
    next_reader: AtomicU64,
    closed: AtomicBool,
}

impl fmt::Debug for BrokerDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BrokerDriver")
            .field("addr", &self.addr)
            .finish_non_exhaustive()
    }
}

impl BrokerDriver {
    /// Connects to a broker.
    ///
    /// # Errors
    /// Returns a backend error if no connection could be established
    /// within the configured connection timeout.
    pub async fn connect(addr: SocketAddr, options: &OpenOptions) -> StreamResult<Self> {
        let driver = Self {
            addr,
            retry: RetryPolicy::with_deadline(options.connection_timeout),
            poll_interval: options.poll_interval,
            conn: Mutex::new(None),
            readers: Mutex::new(HashMap::new()),
            next_reader: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        };
        // Fail fast on a dead address instead of on the first operation.
        driver.call(&Request::ListStreams).await?;
        info!(addr = %addr, "connected to broker");
        Ok(driver)
    }

    fn ensure_open(&self) -> StreamResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StreamError::Closed {
                resource: "broker driver",
            });
        }
        Ok(())
    }

    /// Sends one request, reconnecting with backoff on transport
    /// failures.
    async fn call(&self, request: &Request) -> StreamResult<Response> {
        self.ensure_open()?;
        self.retry
            .run("broker call", || self.try_call(request))
            .await
    }

    /// One attempt: connect if needed, write the request, read the
    /// reply. Any transport failure drops the connection so the next
    /// attempt starts fresh.
    async fn try_call(&self, request: &Request) -> StreamResult<Response> {
        let mut conn = self.conn.lock().await;
        if conn.is_none() {
            let socket = TcpStream::connect(self.addr)
                .await
                .map_err(|e| StreamError::backend("broker connect", e))?;
            debug!(addr = %self.addr, "broker connection established");
            *conn = Some(socket);
        }
        let socket = match conn.as_mut() {
            Some(socket) => socket,
            None => return Err(StreamError::backend("broker connect", "no connection")),
        };

        let (tag, payload) = request.encode();
        if let Err(e) = codec::write_frame(socket, tag, &payload).await {
            *conn = None;
            return Err(StreamError::backend("broker send", e));
        }
        match codec::read_frame(socket).await {
            Ok(Some((tag, body))) => Response::decode(tag, body),
            Ok(None) => {
                *conn = None;
                Err(StreamError::backend("broker recv", "connection closed"))
            }
            Err(e) => {
                *conn = None;
                Err(e)
            }
        }
    }

    /// Resolves a seek target to a concrete offset for one partition.
    async fn resolve_target(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        target: SeekTarget,
    ) -> StreamResult<u64> {
        let (first, end) = self.bounds(partition).await?;
        match target {
            SeekTarget::Start => Ok(first),
            SeekTarget::End => Ok(end),
            SeekTarget::LastCommitted => {
                let committed = self.committed(group, partition).await?;
                Ok(committed.map_or(first, |offset| offset.get().clamp(first, end)))
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

    async fn bounds(&self, partition: &LogPartition) -> StreamResult<(u64, u64)> {
        let response = self
            .call(&Request::Bounds {
                stream: partition.stream.clone(),
                partition: partition.partition.get(),
            })
            .await?;
        match response {
            Response::Bounds { first, end } => Ok((first, end)),
            Response::Error(error) => Err(stream_error(
                error,
                &partition.stream,
                Some(partition),
                0,
            )),
            other => Err(unexpected(&other)),
        }
    }
}

/// Rebuilds a typed error from a wire code plus request context.
fn stream_error(
    error: WireError,
    stream: &StreamName,
    partition: Option<&LogPartition>,
    requested: u32,
) -> StreamError {
    match error {
        WireError::AlreadyExists { existing } => StreamError::AlreadyExists {
            stream: stream.clone(),
            existing,
            requested,
        },
        WireError::UnknownStream => StreamError::UnknownStream {
            stream: stream.clone(),
        },
        WireError::InvalidPartition { count } => StreamError::InvalidPartition {
            stream: stream.clone(),
            partition: partition.map(|p| p.partition).unwrap_or_default(),
            count,
        },
        WireError::PositionNotFound { offset } => match partition {
            Some(partition) => StreamError::PositionNotFound {
                partition: partition.clone(),
                offset: Offset::new(offset),
            },
            None => StreamError::Backend {
                operation: "broker call",
                message: format!("position {offset} not found"),
            },
        },
        WireError::Internal { message } => StreamError::Backend {
            operation: "broker call",
            message,
        },
    }
}

fn unexpected(response: &Response) -> StreamError {
    StreamError::Corruption {
        message: format!("unexpected broker response {response:?}"),
    }
}

#[async_trait]
impl LogDriver for BrokerDriver {
    async fn create_stream(&self, stream: &StreamName, partitions: u32) -> StreamResult<bool> {
        let response = self
            .call(&Request::CreateStream {
                stream: stream.clone(),
                partitions,
            })
            .await?;
        match response {
            Response::Created { created } => Ok(created),
            Response::Error(error) => Err(stream_error(error, stream, None, partitions)),
            other => Err(unexpected(&other)),
        }
    }

    async fn exists(&self, stream: &StreamName) -> StreamResult<bool> {
        let response = self
            .call(&Request::StreamInfo {
                stream: stream.clone(),
            })
            .await?;
        match response {
            Response::Info { exists, .. } => Ok(exists),
            Response::Error(error) => Err(stream_error(error, stream, None, 0)),
            other => Err(unexpected(&other)),
        }
    }

    async fn partition_count(&self, stream: &StreamName) -> StreamResult<u32> {
        let response = self
            .call(&Request::StreamInfo {
                stream: stream.clone(),
            })
            .await?;
        match response {
            Response::Info { exists: true, partitions } => Ok(partitions),
            Response::Info { exists: false, .. } => Err(StreamError::UnknownStream {
                stream: stream.clone(),
            }),
            Response::Error(error) => Err(stream_error(error, stream, None, 0)),
            other => Err(unexpected(&other)),
        }
    }

    async fn list_streams(&self) -> StreamResult<Vec<StreamName>> {
        let response = self.call(&Request::ListStreams).await?;
        match response {
            Response::Streams { names } => Ok(names),
            other => Err(unexpected(&other)),
        }
    }

    async fn first_offset(&self, partition: &LogPartition) -> StreamResult<Offset> {
        Ok(Offset::new(self.bounds(partition).await?.0))
    }

    async fn end_offset(&self, partition: &LogPartition) -> StreamResult<Offset> {
        Ok(Offset::new(self.bounds(partition).await?.1))
    }

    async fn append(&self, partition: &LogPartition, record: Record) -> StreamResult<Position> {
        let response = self
            .call(&Request::Append {
                stream: partition.stream.clone(),
                partition: partition.partition.get(),
                record,
            })
            .await?;
        match response {
            Response::Appended { offset } => {
                Ok(Position::new(partition.partition, Offset::new(offset)))
            }
            Response::Error(error) => {
                Err(stream_error(error, &partition.stream, Some(partition), 0))
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn open_reader(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        target: SeekTarget,
    ) -> StreamResult<ReaderId> {
        self.ensure_open()?;
        let cursor = self.resolve_target(group, partition, target).await?;
        let reader = ReaderId::new(self.next_reader.fetch_add(1, Ordering::Relaxed));
        self.readers.lock().await.insert(
            reader,
            ClientReader {
                group: group.clone(),
                partition: partition.clone(),
                cursor,
                pending: VecDeque::new(),
            },
        );
        Ok(reader)
    }

    async fn seek_reader(&self, reader: ReaderId, target: SeekTarget) -> StreamResult<()> {
        self.ensure_open()?;
        let (group, partition) = {
            let readers = self.readers.lock().await;
            let state = readers
                .get(&reader)
                .ok_or(StreamError::Closed { resource: "reader" })?;
            (state.group.clone(), state.partition.clone())
        };
        let cursor = self.resolve_target(&group, &partition, target).await?;
        let mut readers = self.readers.lock().await;
        let state = readers
            .get_mut(&reader)
            .ok_or(StreamError::Closed { resource: "reader" })?;
        state.cursor = cursor;
        state.pending.clear();
        Ok(())
    }

    async fn read_next(&self, reader: ReaderId, timeout: Duration) -> StreamResult<ReadOutcome> {
        self.ensure_open()?;
        let deadline = Instant::now() + timeout;
        loop {
            // Serve from the batch buffered by the previous fetch first.
            let (partition, cursor) = {
                let mut readers = self.readers.lock().await;
                let state = readers
                    .get_mut(&reader)
                    .ok_or(StreamError::Closed { resource: "reader" })?;
                if let Some((offset, record)) = state.pending.pop_front() {
                    state.cursor = offset + 1;
                    return Ok(ReadOutcome::Entry(LogEntry::new(
                        state.partition.clone(),
                        Offset::new(offset),
                        record,
                    )));
                }
                (state.partition.clone(), state.cursor)
            };

            let response = self
                .call(&Request::Fetch {
                    stream: partition.stream.clone(),
                    partition: partition.partition.get(),
                    offset: cursor,
                    max_records: FETCH_BATCH_MAX,
                })
                .await?;
            let entries = match response {
                Response::Records { entries, .. } => entries,
                Response::Error(error) => {
                    return Err(stream_error(error, &partition.stream, Some(&partition), 0))
                }
                other => return Err(unexpected(&other)),
            };

            if entries.is_empty() {
                let now = Instant::now();
                if now >= deadline {
                    return Ok(ReadOutcome::Timeout);
                }
                tokio::time::sleep((deadline - now).min(self.poll_interval)).await;
                continue;
            }
            let mut readers = self.readers.lock().await;
            let state = readers
                .get_mut(&reader)
                .ok_or(StreamError::Closed { resource: "reader" })?;
            state.pending.extend(entries);
        }
    }

    async fn reader_position(&self, reader: ReaderId) -> StreamResult<Offset> {
        self.ensure_open()?;
        let readers = self.readers.lock().await;
        let state = readers
            .get(&reader)
            .ok_or(StreamError::Closed { resource: "reader" })?;
        Ok(Offset::new(state.cursor))
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
        let response = self
            .call(&Request::Committed {
                group: group.clone(),
                stream: partition.stream.clone(),
                partition: partition.partition.get(),
            })
            .await?;
        match response {
            Response::CommittedOffset { offset } => Ok(offset.map(Offset::new)),
            Response::Error(error) => {
                Err(stream_error(error, &partition.stream, Some(partition), 0))
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn commit(
        &self,
        group: &GroupName,
        partition: &LogPartition,
        offset: Offset,
    ) -> StreamResult<()> {
        let response = self
            .call(&Request::Commit {
                group: group.clone(),
                stream: partition.stream.clone(),
                partition: partition.partition.get(),
                offset: offset.get(),
            })
            .await?;
        match response {
            Response::Done => Ok(()),
            Response::Error(error) => {
                Err(stream_error(error, &partition.stream, Some(partition), 0))
            }
            other => Err(unexpected(&other)),
        }
    }

    async fn reset_positions(&self, group: &GroupName, stream: &StreamName) -> StreamResult<()> {
        let response = self
            .call(&Request::Reset {
                group: group.clone(),
                stream: stream.clone(),
            })
            .await?;
        match response {
            Response::Done => Ok(()),
            Response::Error(error) => Err(stream_error(error, stream, None, 0)),
            other => Err(unexpected(&other)),
        }
    }

    async fn list_consumer_groups(&self, stream: &StreamName) -> StreamResult<Vec<GroupName>> {
        let response = self
            .call(&Request::ListGroups {
                stream: stream.clone(),
            })
            .await?;
        match response {
            Response::Groups { names } => Ok(names),
            Response::Error(error) => Err(stream_error(error, stream, None, 0)),
            other => Err(unexpected(&other)),
        }
    }

    async fn close(&self) -> StreamResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.readers.lock().await.clear();
        *self.conn.lock().await = None;
        info!(addr = %self.addr, "broker driver closed");
        Ok(())
    }
}
