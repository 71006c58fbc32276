/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! An in-process grid server standing in for the remote side of the
//! protocol, with programmable fault injection. Backing store, handle
//! tables, and the replica-token protocol behave like a real server so the
//! session and transfer engine can be exercised end-to-end in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;

use crate::account::Account;
use crate::error::{self, Error, ErrorCode};
use crate::protocol::{Connector, FileDescriptor, Request, Response, ServerFeatures, Whence, Wire};

const MOCK_RESOURCE_HIERARCHY: &str = "demoResc;unixfs1";

/// Remote code the mock reports when transaction reset is rejected.
pub const MOCK_RESET_REJECTED: ErrorCode = ErrorCode(-169000);

/// Remote code the mock reports for handle-protocol violations.
pub const MOCK_PROTOCOL_VIOLATION: ErrorCode = ErrorCode(-130000);

/// A programmable failure injected into the mock grid.
#[derive(Debug, Clone)]
pub enum Fault {
    /// The `nth` read round-trip (1-based, counted grid-wide) fails with an
    /// I/O error, once. Models a transient socket failure.
    IoErrorOnRead {
        /// Which read fails
        nth: u64,
    },
    /// Every read after `limit` payload bytes have been served fails with a
    /// remote error. Models a fatal, non-retryable server condition.
    RemoteErrorAfterBytes {
        /// Bytes served before the fault engages
        limit: u64,
        /// Remote code to report
        code: i32,
    },
}

#[derive(Debug)]
struct FaultState {
    fault: Fault,
    reads_seen: u64,
    fired: bool,
}

/// Counters describing everything the mock grid has observed.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct GridCounters {
    /// Channels handed out by the connector
    pub connects: u64,
    /// Ordinary opens (read or write)
    pub opens: u64,
    /// Primary parallel-put opens
    pub primary_opens: u64,
    /// Replica-token opens
    pub replica_opens: u64,
    /// Replica-close round-trips
    pub replica_closes: u64,
    /// Transaction resets served (or rejected)
    pub resets: u64,
    /// Server-side replications
    pub replications: u64,
    /// Read round-trips served
    pub reads: u64,
    /// Times a primary handle was closed while replicas were still open
    pub close_order_violations: u64,
}

#[derive(Debug)]
struct GridState {
    objects: HashMap<String, Vec<u8>>,
    features: ServerFeatures,
    counters: GridCounters,
    fault: Option<FaultState>,
    reset_transaction_fails: bool,
    connect_fails: bool,
    bytes_served: u64,
    replica_tokens: HashMap<String, String>,
    open_replicas: HashMap<String, usize>,
    next_token: u64,
    next_descriptor: FileDescriptor,
}

/// The in-process grid shared by every connection of a [`MockConnector`].
#[derive(Debug, Clone)]
pub struct MockGrid {
    inner: Arc<Mutex<GridState>>,
}

impl Default for MockGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl MockGrid {
    /// Create an empty grid that supports parallel upload.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(GridState {
                objects: HashMap::new(),
                features: ServerFeatures {
                    parallel_upload: true,
                },
                counters: GridCounters::default(),
                fault: None,
                reset_transaction_fails: false,
                connect_fails: false,
                bytes_served: 0,
                replica_tokens: HashMap::new(),
                open_replicas: HashMap::new(),
                next_token: 1,
                next_descriptor: 3,
            })),
        }
    }

    /// A connector producing channels into this grid.
    pub fn connector(&self) -> MockConnector {
        MockConnector { grid: self.clone() }
    }

    fn state(&self) -> MutexGuard<'_, GridState> {
        self.inner.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Toggle the server's parallel-upload capability for new connections.
    pub fn set_parallel_upload(&self, enabled: bool) {
        self.state().features.parallel_upload = enabled;
    }

    /// Make transaction-reset round-trips fail with a remote error.
    pub fn set_reset_transaction_fails(&self, fails: bool) {
        self.state().reset_transaction_fails = fails;
    }

    /// Make new connections fail with an I/O error.
    pub fn set_connect_fails(&self, fails: bool) {
        self.state().connect_fails = fails;
    }

    /// Arm a fault. Replaces any previous fault.
    pub fn set_fault(&self, fault: Fault) {
        self.state().fault = Some(FaultState {
            fault,
            reads_seen: 0,
            fired: false,
        });
    }

    /// Disarm the current fault.
    pub fn clear_fault(&self) {
        self.state().fault = None;
    }

    /// Store an object, replacing any existing content.
    pub fn insert_object(&self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.state().objects.insert(path.into(), data.into());
    }

    /// Current content of an object, if present.
    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).cloned()
    }

    /// Snapshot of the grid counters.
    pub fn counters(&self) -> GridCounters {
        self.state().counters.clone()
    }

    /// Replica handles currently open for a path.
    pub fn open_replicas(&self, path: &str) -> usize {
        self.state().open_replicas.get(path).copied().unwrap_or(0)
    }
}

/// [`Connector`] implementation backed by a [`MockGrid`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    grid: MockGrid,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _account: &Account) -> Result<Box<dyn Wire>, Error> {
        let features = {
            let mut state = self.grid.state();
            if state.connect_fails {
                return Err(error::io_error("connection refused (injected)"));
            }
            state.counters.connects += 1;
            state.features
        };
        Ok(Box::new(MockWire {
            grid: self.grid.clone(),
            features,
            handles: HashMap::new(),
            connected: true,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleKind {
    Plain,
    Primary,
    Replica,
}

#[derive(Debug)]
struct HandleState {
    path: String,
    pos: u64,
    kind: HandleKind,
    replica_token: Option<String>,
}

/// One channel into a [`MockGrid`]. Handles are per-channel; object content
/// and the replica-token table are shared grid-wide.
#[derive(Debug)]
pub struct MockWire {
    grid: MockGrid,
    features: ServerFeatures,
    handles: HashMap<FileDescriptor, HandleState>,
    connected: bool,
}

impl MockWire {
    fn open_handle(
        &mut self,
        state: &mut GridState,
        path: String,
        kind: HandleKind,
        replica_token: Option<String>,
    ) -> FileDescriptor {
        let descriptor = state.next_descriptor;
        state.next_descriptor += 1;
        self.handles.insert(
            descriptor,
            HandleState {
                path,
                pos: 0,
                kind,
                replica_token,
            },
        );
        descriptor
    }

    fn handle(&self, descriptor: FileDescriptor) -> Result<&HandleState, Error> {
        self.handles.get(&descriptor).ok_or_else(|| {
            error::remote(
                MOCK_PROTOCOL_VIOLATION,
                format!("unknown descriptor {descriptor}"),
            )
        })
    }
}

fn check_read_fault(state: &mut GridState) -> Result<(), Error> {
    let Some(fault) = state.fault.as_mut() else {
        return Ok(());
    };
    fault.reads_seen += 1;
    match fault.fault {
        Fault::IoErrorOnRead { nth } => {
            if !fault.fired && fault.reads_seen == nth {
                fault.fired = true;
                return Err(error::io_error("connection reset by peer (injected)"));
            }
        }
        Fault::RemoteErrorAfterBytes { limit, code } => {
            if state.bytes_served >= limit {
                return Err(error::remote(ErrorCode(code), "injected remote failure"));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Wire for MockWire {
    async fn call(&mut self, request: Request) -> Result<Response, Error> {
        if !self.connected {
            return Err(error::io_error("channel is shut down"));
        }

        match request {
            Request::Create {
                path,
                resource: _,
                mode: _,
                force,
            } => {
                let grid = self.grid.clone();
                let mut state = grid.state();
                if state.objects.contains_key(&path) && !force {
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        format!("object {path:?} already exists"),
                    ));
                }
                state.objects.insert(path.clone(), Vec::new());
                state.counters.opens += 1;
                let descriptor = self.open_handle(&mut state, path, HandleKind::Plain, None);
                Ok(Response::Descriptor(descriptor))
            }
            Request::Open {
                path,
                resource: _,
                mode: _,
            } => {
                let grid = self.grid.clone();
                let mut state = grid.state();
                if !state.objects.contains_key(&path) {
                    return Err(error::remote(
                        ErrorCode::CAT_UNKNOWN_FILE,
                        format!("no such object {path:?}"),
                    ));
                }
                state.counters.opens += 1;
                let descriptor = self.open_handle(&mut state, path, HandleKind::Plain, None);
                Ok(Response::Descriptor(descriptor))
            }
            Request::OpenForPutParallel {
                path,
                resource: _,
                mode: _,
                task_count: _,
                object_length: _,
            } => {
                if !self.features.parallel_upload {
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        "parallel upload is not supported",
                    ));
                }
                let grid = self.grid.clone();
                let mut state = grid.state();
                state.objects.insert(path.clone(), Vec::new());
                state.counters.primary_opens += 1;
                let token = format!("replica-token-{}", state.next_token);
                state.next_token += 1;
                state.replica_tokens.insert(token.clone(), path.clone());
                let descriptor =
                    self.open_handle(&mut state, path, HandleKind::Primary, Some(token));
                Ok(Response::Descriptor(descriptor))
            }
            Request::OpenWithReplicaToken {
                path,
                resource: _,
                mode: _,
                replica_token,
                resource_hierarchy: _,
                task_count: _,
                object_length: _,
            } => {
                let grid = self.grid.clone();
                let mut state = grid.state();
                match state.replica_tokens.get(&replica_token) {
                    Some(token_path) if *token_path == path => {}
                    _ => {
                        return Err(error::remote(
                            MOCK_PROTOCOL_VIOLATION,
                            format!("replica token not valid for {path:?}"),
                        ))
                    }
                }
                state.counters.replica_opens += 1;
                *state.open_replicas.entry(path.clone()).or_insert(0) += 1;
                let descriptor = self.open_handle(&mut state, path, HandleKind::Replica, None);
                Ok(Response::Descriptor(descriptor))
            }
            Request::ReplicaAccessInfo { descriptor } => {
                let handle = self.handle(descriptor)?;
                if handle.kind != HandleKind::Primary {
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        "replica access info requires a primary handle",
                    ));
                }
                let replica_token = handle
                    .replica_token
                    .clone()
                    .expect("primary handle has a token");
                Ok(Response::ReplicaAccessInfo {
                    replica_token,
                    resource_hierarchy: MOCK_RESOURCE_HIERARCHY.to_owned(),
                })
            }
            Request::Seek {
                descriptor,
                offset,
                whence,
            } => {
                let path = self.handle(descriptor)?.path.clone();
                let object_len = {
                    let grid = self.grid.clone();
                    let state = grid.state();
                    state.objects.get(&path).map(|data| data.len()).unwrap_or(0) as i64
                };
                let handle = self.handles.get_mut(&descriptor).expect("checked above");
                let base = match whence {
                    Whence::Start => 0,
                    Whence::Current => handle.pos as i64,
                    Whence::End => object_len,
                };
                let target = base + offset;
                if target < 0 {
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        format!("seek to negative offset {target}"),
                    ));
                }
                handle.pos = target as u64;
                Ok(Response::Offset(target))
            }
            Request::Read { descriptor, length } => {
                let path = self.handle(descriptor)?.path.clone();
                let grid = self.grid.clone();
                let mut state = grid.state();
                state.counters.reads += 1;
                check_read_fault(&mut state)?;
                let data = state.objects.get(&path).ok_or_else(|| {
                    error::remote(
                        ErrorCode::CAT_UNKNOWN_FILE,
                        format!("no such object {path:?}"),
                    )
                })?;
                let handle = self.handles.get_mut(&descriptor).expect("checked above");
                let start = (handle.pos as usize).min(data.len());
                let end = (start + length).min(data.len());
                let chunk = Bytes::copy_from_slice(&data[start..end]);
                handle.pos += chunk.len() as u64;
                state.bytes_served += chunk.len() as u64;
                Ok(Response::Data(chunk))
            }
            Request::Write { descriptor, data } => {
                let path = self.handle(descriptor)?.path.clone();
                let grid = self.grid.clone();
                let mut state = grid.state();
                let object = state.objects.entry(path).or_default();
                let handle = self.handles.get_mut(&descriptor).expect("checked above");
                let start = handle.pos as usize;
                let end = start + data.len();
                if object.len() < end {
                    object.resize(end, 0);
                }
                object[start..end].copy_from_slice(&data);
                handle.pos = end as u64;
                Ok(Response::Written(data.len()))
            }
            Request::Close { descriptor } => {
                let handle = self.handles.remove(&descriptor).ok_or_else(|| {
                    error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        format!("unknown descriptor {descriptor}"),
                    )
                })?;
                if handle.kind == HandleKind::Replica {
                    self.handles.insert(descriptor, handle);
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        "replica handles must be closed with replica-close",
                    ));
                }
                if handle.kind == HandleKind::Primary {
                    let grid = self.grid.clone();
                    let mut state = grid.state();
                    if state.open_replicas.get(&handle.path).copied().unwrap_or(0) > 0 {
                        state.counters.close_order_violations += 1;
                    }
                }
                Ok(Response::Ack)
            }
            Request::CloseReplica { descriptor } => {
                let handle = self.handles.remove(&descriptor).ok_or_else(|| {
                    error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        format!("unknown descriptor {descriptor}"),
                    )
                })?;
                if handle.kind != HandleKind::Replica {
                    self.handles.insert(descriptor, handle);
                    return Err(error::remote(
                        MOCK_PROTOCOL_VIOLATION,
                        "replica-close requires a replica handle",
                    ));
                }
                let grid = self.grid.clone();
                let mut state = grid.state();
                if let Some(count) = state.open_replicas.get_mut(&handle.path) {
                    *count = count.saturating_sub(1);
                }
                state.counters.replica_closes += 1;
                Ok(Response::Ack)
            }
            Request::Replicate { path, resource: _ } => {
                let grid = self.grid.clone();
                let mut state = grid.state();
                if !state.objects.contains_key(&path) {
                    return Err(error::remote(
                        ErrorCode::CAT_UNKNOWN_FILE,
                        format!("no such object {path:?}"),
                    ));
                }
                state.counters.replications += 1;
                Ok(Response::Ack)
            }
            Request::ResetTransaction => {
                let grid = self.grid.clone();
                let mut state = grid.state();
                state.counters.resets += 1;
                if state.reset_transaction_fails {
                    return Err(error::remote(
                        MOCK_RESET_REJECTED,
                        "transaction reset rejected",
                    ));
                }
                Ok(Response::Ack)
            }
        }
    }

    async fn shutdown(&mut self) -> Result<(), Error> {
        self.connected = false;
        Ok(())
    }

    fn features(&self) -> ServerFeatures {
        self.features
    }
}

/// An account suitable for connecting to a [`MockGrid`].
pub fn test_account() -> Account {
    Account::builder()
        .host("mock.grid.invalid")
        .port(1247)
        .zone("tempZone")
        .username("rods")
        .password("rods")
        .default_resource("demoResc")
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_write_seek_round_trip() {
        let grid = MockGrid::new();
        let connector = grid.connector();
        let mut wire = connector.connect(&test_account()).await.unwrap();

        let Response::Descriptor(fd) = wire
            .call(Request::Create {
                path: "/zone/a".into(),
                resource: "demoResc".into(),
                mode: crate::protocol::OpenMode::ReadWrite,
                force: true,
            })
            .await
            .unwrap()
        else {
            panic!("expected descriptor");
        };

        wire.call(Request::Write {
            descriptor: fd,
            data: Bytes::from_static(b"hello world"),
        })
        .await
        .unwrap();
        wire.call(Request::Seek {
            descriptor: fd,
            offset: 6,
            whence: Whence::Start,
        })
        .await
        .unwrap();
        let Response::Data(data) = wire
            .call(Request::Read {
                descriptor: fd,
                length: 64,
            })
            .await
            .unwrap()
        else {
            panic!("expected data");
        };
        assert_eq!(&data[..], b"world");
        wire.call(Request::Close { descriptor: fd }).await.unwrap();
        assert_eq!(grid.object("/zone/a").unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn replica_handles_reject_ordinary_close() {
        let grid = MockGrid::new();
        let connector = grid.connector();
        let mut wire = connector.connect(&test_account()).await.unwrap();

        let Response::Descriptor(primary) = wire
            .call(Request::OpenForPutParallel {
                path: "/zone/p".into(),
                resource: "demoResc".into(),
                mode: crate::protocol::OpenMode::ReadWrite,
                task_count: 2,
                object_length: 8,
            })
            .await
            .unwrap()
        else {
            panic!("expected descriptor");
        };
        let Response::ReplicaAccessInfo { replica_token, .. } = wire
            .call(Request::ReplicaAccessInfo {
                descriptor: primary,
            })
            .await
            .unwrap()
        else {
            panic!("expected replica access info");
        };

        let Response::Descriptor(replica) = wire
            .call(Request::OpenWithReplicaToken {
                path: "/zone/p".into(),
                resource: "demoResc".into(),
                mode: crate::protocol::OpenMode::Write,
                replica_token,
                resource_hierarchy: MOCK_RESOURCE_HIERARCHY.into(),
                task_count: 2,
                object_length: 8,
            })
            .await
            .unwrap()
        else {
            panic!("expected descriptor");
        };

        let err = wire
            .call(Request::Close {
                descriptor: replica,
            })
            .await
            .unwrap_err();
        assert_eq!(err.remote_code(), Some(MOCK_PROTOCOL_VIOLATION));

        wire.call(Request::CloseReplica {
            descriptor: replica,
        })
        .await
        .unwrap();
        wire.call(Request::Close {
            descriptor: primary,
        })
        .await
        .unwrap();
        assert_eq!(grid.counters().close_order_violations, 0);
    }
}
