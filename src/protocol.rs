/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! The seam between this crate and the wire protocol.
//!
//! Message framing, encoding, and the authentication handshake are not part
//! of this crate. An application supplies a [`Connector`] that dials and
//! authenticates, returning a [`Wire`]; the session, pool, and transfer
//! engine drive everything through the typed [`Request`]/[`Response`] pairs
//! below. The [`mock`](crate::mock) module ships an in-process
//! implementation for tests.

use core::fmt;

use async_trait::async_trait;
use bytes::Bytes;

use crate::account::Account;
use crate::error::Error;

/// A remote file descriptor for an open data object handle.
pub type FileDescriptor = i32;

/// Open mode for a data object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenMode {
    /// Read only (`r`)
    #[default]
    Read,
    /// Write only (`w`)
    Write,
    /// Read and write, created or truncated (`w+`)
    ReadWrite,
}

/// Origin for a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the object
    Start,
    /// From the current position
    Current,
    /// From the end of the object
    End,
}

/// Capability flags reported by the server after the handshake.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct ServerFeatures {
    /// Whether the server supports the replica-token parallel upload protocol
    pub parallel_upload: bool,
}

/// A single protocol operation the core can issue.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Request {
    /// Create (or truncate) a data object and open a handle on it
    Create {
        /// Logical path of the data object
        path: String,
        /// Target storage resource
        resource: String,
        /// Open mode for the returned handle
        mode: OpenMode,
        /// Overwrite an existing object
        force: bool,
    },
    /// Open a handle on an existing data object
    Open {
        /// Logical path of the data object
        path: String,
        /// Storage resource to read from
        resource: String,
        /// Open mode for the returned handle
        mode: OpenMode,
    },
    /// Open the primary handle for a parallel put
    OpenForPutParallel {
        /// Logical path of the data object
        path: String,
        /// Target storage resource
        resource: String,
        /// Open mode for the returned handle
        mode: OpenMode,
        /// Number of writers that will participate
        task_count: usize,
        /// Final length of the object
        object_length: u64,
    },
    /// Open a replica handle authorized by the primary's replica token
    OpenWithReplicaToken {
        /// Logical path of the data object
        path: String,
        /// Target storage resource
        resource: String,
        /// Open mode for the returned handle
        mode: OpenMode,
        /// Token issued for the primary handle
        replica_token: String,
        /// Resource hierarchy of the replica being written
        resource_hierarchy: String,
        /// Number of writers that will participate
        task_count: usize,
        /// Final length of the object
        object_length: u64,
    },
    /// Fetch the replica token and resource hierarchy for a primary handle
    ReplicaAccessInfo {
        /// Descriptor of the primary handle
        descriptor: FileDescriptor,
    },
    /// Reposition an open handle
    Seek {
        /// Descriptor of the handle
        descriptor: FileDescriptor,
        /// Offset relative to `whence`
        offset: i64,
        /// Seek origin
        whence: Whence,
    },
    /// Read up to `length` bytes from an open handle
    Read {
        /// Descriptor of the handle
        descriptor: FileDescriptor,
        /// Maximum number of bytes to return
        length: usize,
    },
    /// Write bytes at the current position of an open handle
    Write {
        /// Descriptor of the handle
        descriptor: FileDescriptor,
        /// Payload
        data: Bytes,
    },
    /// Close an ordinary or primary handle
    Close {
        /// Descriptor of the handle
        descriptor: FileDescriptor,
    },
    /// Close a replica handle opened with a replica token
    CloseReplica {
        /// Descriptor of the replica handle
        descriptor: FileDescriptor,
    },
    /// Replicate a data object to a resource, server-side
    Replicate {
        /// Logical path of the data object
        path: String,
        /// Destination resource
        resource: String,
    },
    /// No-op round-trip that commits the implicit server transaction and
    /// starts a fresh one, refreshing read visibility
    ResetTransaction,
}

/// Successful reply to a [`Request`].
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum Response {
    /// A handle was opened
    Descriptor(FileDescriptor),
    /// Replica access info for a primary handle
    ReplicaAccessInfo {
        /// Token authorizing additional concurrent writers
        replica_token: String,
        /// Resource hierarchy of the replica
        resource_hierarchy: String,
    },
    /// Offset reached by a seek
    Offset(i64),
    /// Data read from a handle; empty means end of object
    Data(Bytes),
    /// Number of bytes accepted by a write
    Written(usize),
    /// Operation completed with no payload
    Ack,
}

/// A live, authenticated channel to the server.
///
/// Implementations own the socket and the message codec. Errors of kind
/// [`ErrorKind::IoError`](crate::error::ErrorKind::IoError) are treated as
/// socket failures by [`Connection`](crate::connection::Connection); errors
/// of kind [`ErrorKind::Remote`](crate::error::ErrorKind::Remote) are server
/// rejections that leave the socket healthy.
#[async_trait]
pub trait Wire: Send + fmt::Debug {
    /// Perform one request/response round-trip.
    async fn call(&mut self, request: Request) -> Result<Response, Error>;

    /// Close the channel, best-effort.
    async fn shutdown(&mut self) -> Result<(), Error>;

    /// Capabilities negotiated with the server.
    fn features(&self) -> ServerFeatures;
}

/// Dials and authenticates new [`Wire`] channels for an [`Account`].
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    /// Open a new authenticated channel.
    async fn connect(&self, account: &Account) -> Result<Box<dyn Wire>, Error>;
}
