//! The broker: an in-memory log service speaking the wire protocol.
//!
//! Streams live entirely in broker memory; durability here means the
//! append was applied to broker state before the acknowledgement was
//! sent. Offsets are assigned by the broker and are contiguous per
//! partition.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use brook_core::{GroupName, Record, StreamError, StreamName, StreamResult};

use crate::codec::{self, Request, Response, WireError};

#[derive(Debug, Default)]
struct State {
    streams: HashMap<StreamName, Vec<Vec<Record>>>,
    offsets: HashMap<(GroupName, StreamName, u32), u64>,
}

/// A running broker bound to a TCP address.
///
/// Accepts any number of connections; each request is answered in
/// order on its connection. State is shared across connections, so two
/// drivers pointed at the same broker see the same streams.
#[derive(Debug)]
pub struct Broker {
    local_addr: SocketAddr,
    shutdown: Arc<Notify>,
    accept_task: JoinHandle<()>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Broker {
    /// Binds a broker and starts accepting connections.
    ///
    /// Bind to `127.0.0.1:0` to get an ephemeral port for tests.
    ///
    /// # Errors
    /// Returns a backend error if the address cannot be bound.
    pub async fn bind(addr: impl ToSocketAddrs) -> StreamResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamError::backend("broker bind", e))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| StreamError::backend("broker bind", e))?;
        info!(addr = %local_addr, "broker listening");

        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = Arc::new(Notify::new());
        let connections = Arc::new(Mutex::new(Vec::new()));
        let notify = Arc::clone(&shutdown);
        let conn_tasks = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = notify.notified() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((socket, peer)) => {
                                debug!(peer = %peer, "broker connection accepted");
                                let state = Arc::clone(&state);
                                let task = tokio::spawn(serve_connection(socket, state));
                                if let Ok(mut tasks) = conn_tasks.lock() {
                                    tasks.retain(|t: &JoinHandle<()>| !t.is_finished());
                                    tasks.push(task);
                                }
                            }
                            Err(e) => {
                                warn!(error = %e, "broker accept failed");
                            }
                        }
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            shutdown,
            accept_task,
            connections,
        })
    }

    /// Returns the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections, drops the live ones, and shuts the
    /// broker down.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        let _ = self.accept_task.await;
        if let Ok(mut tasks) = self.connections.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        info!(addr = %self.local_addr, "broker stopped");
    }
}

async fn serve_connection(mut socket: TcpStream, state: Arc<Mutex<State>>) {
    loop {
        let frame = match codec::read_frame(&mut socket).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "broker read failed, dropping connection");
                return;
            }
        };
        let response = match Request::decode(frame.0, frame.1) {
            Ok(request) => {
                let mut state = match state.lock() {
                    Ok(guard) => guard,
                    Err(_) => return,
                };
                apply(&mut state, request)
            }
            Err(e) => Response::Error(WireError::Internal {
                message: e.to_string(),
            }),
        };
        let (tag, payload) = response.encode();
        if let Err(e) = codec::write_frame(&mut socket, tag, &payload).await {
            warn!(error = %e, "broker write failed, dropping connection");
            return;
        }
    }
}

/// Applies one request to broker state.
fn apply(state: &mut State, request: Request) -> Response {
    match request {
        Request::CreateStream { stream, partitions } => {
            if let Some(existing) = state.streams.get(&stream) {
                #[allow(clippy::cast_possible_truncation)] // Counts come in as u32.
                let existing = existing.len() as u32;
                if existing == partitions {
                    Response::Created { created: false }
                } else {
                    Response::Error(WireError::AlreadyExists { existing })
                }
            } else {
                state
                    .streams
                    .insert(stream, vec![Vec::new(); partitions as usize]);
                Response::Created { created: true }
            }
        }
        Request::StreamInfo { stream } => state.streams.get(&stream).map_or(
            Response::Info {
                exists: false,
                partitions: 0,
            },
            |partitions| Response::Info {
                exists: true,
                #[allow(clippy::cast_possible_truncation)]
                partitions: partitions.len() as u32,
            },
        ),
        Request::ListStreams => {
            let mut names: Vec<_> = state.streams.keys().cloned().collect();
            names.sort();
            Response::Streams { names }
        }
        Request::Bounds { stream, partition } => match partition_slot(state, &stream, partition) {
            Ok(records) => Response::Bounds {
                first: 0,
                end: records.len() as u64,
            },
            Err(error) => Response::Error(error),
        },
        Request::Append {
            stream,
            partition,
            record,
        } => match partition_slot_mut(state, &stream, partition) {
            Ok(records) => {
                records.push(record);
                Response::Appended {
                    offset: records.len() as u64 - 1,
                }
            }
            Err(error) => Response::Error(error),
        },
        Request::Fetch {
            stream,
            partition,
            offset,
            max_records,
        } => match partition_slot(state, &stream, partition) {
            Ok(records) => {
                let end = records.len() as u64;
                if offset > end {
                    return Response::Error(WireError::PositionNotFound { offset });
                }
                let take = max_records.min(codec::FETCH_BATCH_MAX) as u64;
                let last = end.min(offset + take);
                #[allow(clippy::cast_possible_truncation)] // Bounded by in-memory vec length.
                let entries = (offset..last)
                    .map(|o| (o, records[o as usize].clone()))
                    .collect();
                Response::Records { entries, end }
            }
            Err(error) => Response::Error(error),
        },
        Request::Commit {
            group,
            stream,
            partition,
            offset,
        } => match partition_slot(state, &stream, partition) {
            Ok(_) => {
                state.offsets.insert((group, stream, partition), offset);
                Response::Done
            }
            Err(error) => Response::Error(error),
        },
        Request::Committed {
            group,
            stream,
            partition,
        } => match partition_slot(state, &stream, partition) {
            Ok(_) => Response::CommittedOffset {
                offset: state.offsets.get(&(group, stream, partition)).copied(),
            },
            Err(error) => Response::Error(error),
        },
        Request::Reset { group, stream } => {
            if state.streams.contains_key(&stream) {
                state
                    .offsets
                    .retain(|(g, s, _), _| !(*g == group && *s == stream));
                Response::Done
            } else {
                Response::Error(WireError::UnknownStream)
            }
        }
        Request::ListGroups { stream } => {
            if state.streams.contains_key(&stream) {
                let mut names: Vec<_> = state
                    .offsets
                    .keys()
                    .filter(|(_, s, _)| *s == stream)
                    .map(|(g, _, _)| g.clone())
                    .collect();
                names.sort();
                names.dedup();
                Response::Groups { names }
            } else {
                Response::Error(WireError::UnknownStream)
            }
        }
    }
}

fn partition_slot<'s>(
    state: &'s State,
    stream: &StreamName,
    partition: u32,
) -> Result<&'s Vec<Record>, WireError> {
    let partitions = state
        .streams
        .get(stream)
        .ok_or(WireError::UnknownStream)?;
    partitions
        .get(partition as usize)
        .ok_or(WireError::InvalidPartition {
            #[allow(clippy::cast_possible_truncation)]
            count: partitions.len() as u32,
        })
}

fn partition_slot_mut<'s>(
    state: &'s mut State,
    stream: &StreamName,
    partition: u32,
) -> Result<&'s mut Vec<Record>, WireError> {
    let partitions = state
        .streams
        .get_mut(stream)
        .ok_or(WireError::UnknownStream)?;
    let count = partitions.len();
    partitions
        .get_mut(partition as usize)
        .ok_or(WireError::InvalidPartition {
            #[allow(clippy::cast_possible_truncation)]
            count: count as u32,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(name: &str) -> StreamName {
        StreamName::new(name).unwrap()
    }

    fn create(state: &mut State, name: &str, partitions: u32) {
        let response = apply(
            state,
            Request::CreateStream {
                stream: stream(name),
                partitions,
            },
        );
        assert_eq!(response, Response::Created { created: true });
    }

    #[test]
    fn test_create_is_idempotent_with_same_count() {
        let mut state = State::default();
        create(&mut state, "s", 4);

        let again = apply(
            &mut state,
            Request::CreateStream {
                stream: stream("s"),
                partitions: 4,
            },
        );
        assert_eq!(again, Response::Created { created: false });

        let conflicting = apply(
            &mut state,
            Request::CreateStream {
                stream: stream("s"),
                partitions: 8,
            },
        );
        assert_eq!(
            conflicting,
            Response::Error(WireError::AlreadyExists { existing: 4 })
        );
    }

    #[test]
    fn test_append_assigns_increasing_offsets() {
        let mut state = State::default();
        create(&mut state, "s", 1);

        for expected in 0..3_u64 {
            let response = apply(
                &mut state,
                Request::Append {
                    stream: stream("s"),
                    partition: 0,
                    record: Record::new("v"),
                },
            );
            assert_eq!(response, Response::Appended { offset: expected });
        }
        let bounds = apply(
            &mut state,
            Request::Bounds {
                stream: stream("s"),
                partition: 0,
            },
        );
        assert_eq!(bounds, Response::Bounds { first: 0, end: 3 });
    }

    #[test]
    fn test_fetch_bounds_and_errors() {
        let mut state = State::default();
        create(&mut state, "s", 1);
        for i in 0..5_u64 {
            apply(
                &mut state,
                Request::Append {
                    stream: stream("s"),
                    partition: 0,
                    record: Record::new(format!("v{i}")),
                },
            );
        }

        let fetched = apply(
            &mut state,
            Request::Fetch {
                stream: stream("s"),
                partition: 0,
                offset: 3,
                max_records: 10,
            },
        );
        let Response::Records { entries, end } = fetched else {
            panic!("expected records");
        };
        assert_eq!(end, 5);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, 3);

        // Fetch exactly at the end is empty, past the end is an error.
        let at_end = apply(
            &mut state,
            Request::Fetch {
                stream: stream("s"),
                partition: 0,
                offset: 5,
                max_records: 10,
            },
        );
        assert!(matches!(at_end, Response::Records { ref entries, .. } if entries.is_empty()));

        let past = apply(
            &mut state,
            Request::Fetch {
                stream: stream("s"),
                partition: 0,
                offset: 6,
                max_records: 10,
            },
        );
        assert_eq!(
            past,
            Response::Error(WireError::PositionNotFound { offset: 6 })
        );
    }

    #[test]
    fn test_commit_reset_and_group_listing() {
        let mut state = State::default();
        create(&mut state, "s", 2);
        let group = GroupName::new("workers").unwrap();

        apply(
            &mut state,
            Request::Commit {
                group: group.clone(),
                stream: stream("s"),
                partition: 1,
                offset: 9,
            },
        );
        let committed = apply(
            &mut state,
            Request::Committed {
                group: group.clone(),
                stream: stream("s"),
                partition: 1,
            },
        );
        assert_eq!(committed, Response::CommittedOffset { offset: Some(9) });

        let groups = apply(&mut state, Request::ListGroups { stream: stream("s") });
        assert_eq!(groups, Response::Groups { names: vec![group.clone()] });

        apply(
            &mut state,
            Request::Reset {
                group: group.clone(),
                stream: stream("s"),
            },
        );
        let committed = apply(
            &mut state,
            Request::Committed {
                group,
                stream: stream("s"),
                partition: 1,
            },
        );
        assert_eq!(committed, Response::CommittedOffset { offset: None });
    }

    #[test]
    fn test_unknown_stream_and_partition() {
        let mut state = State::default();
        create(&mut state, "s", 1);

        let response = apply(
            &mut state,
            Request::Bounds {
                stream: stream("missing"),
                partition: 0,
            },
        );
        assert_eq!(response, Response::Error(WireError::UnknownStream));

        let response = apply(
            &mut state,
            Request::Bounds {
                stream: stream("s"),
                partition: 9,
            },
        );
        assert_eq!(
            response,
            Response::Error(WireError::InvalidPartition { count: 1 })
        );
    }
}
