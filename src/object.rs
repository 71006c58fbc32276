/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Typed data-object primitives over a [`Connection`].
//!
//! Each helper performs one locked round-trip. A handle is only valid on
//! the connection that opened it and must be closed there: ordinary and
//! primary handles with [`close`], replica handles with [`close_replica`].

use bytes::Bytes;

use crate::connection::Connection;
use crate::error::{self, Error};
use crate::protocol::{FileDescriptor, OpenMode, Request, Response, Whence};

/// An open handle on a remote data object.
#[derive(Debug, Clone)]
pub struct ObjectHandle {
    descriptor: FileDescriptor,
    path: String,
    mode: OpenMode,
}

impl ObjectHandle {
    /// Remote file descriptor
    pub fn descriptor(&self) -> FileDescriptor {
        self.descriptor
    }

    /// Logical path of the object
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Mode the handle was opened with
    pub fn mode(&self) -> OpenMode {
        self.mode
    }
}

/// Authorization for additional concurrent writers during a parallel put.
#[derive(Debug, Clone)]
pub struct ReplicaAccess {
    /// Server-issued opaque token from the primary handle
    pub replica_token: String,
    /// Resource hierarchy of the replica being written
    pub resource_hierarchy: String,
}

/// Map catalog not-found codes to [`ErrorKind::NotFound`](crate::error::ErrorKind::NotFound).
fn map_not_found(err: Error) -> Error {
    match err.remote_code() {
        Some(code) if code.is_not_found() => error::not_found(err),
        _ => err,
    }
}

fn descriptor_response(response: Response, path: &str, mode: OpenMode) -> Result<ObjectHandle, Error> {
    match response {
        Response::Descriptor(descriptor) => Ok(ObjectHandle {
            descriptor,
            path: path.to_owned(),
            mode,
        }),
        other => Err(error::runtime(format!(
            "unexpected response to open of {path:?}: {other:?}"
        ))),
    }
}

/// Create (or truncate) a data object and open a handle on it.
pub async fn create(
    conn: &Connection,
    path: &str,
    resource: &str,
    mode: OpenMode,
    force: bool,
) -> Result<ObjectHandle, Error> {
    let response = conn
        .request(Request::Create {
            path: path.to_owned(),
            resource: resource.to_owned(),
            mode,
            force,
        })
        .await
        .map_err(map_not_found)?;
    descriptor_response(response, path, mode)
}

/// Open a handle on an existing data object.
pub async fn open(
    conn: &Connection,
    path: &str,
    resource: &str,
    mode: OpenMode,
) -> Result<ObjectHandle, Error> {
    let response = conn
        .request(Request::Open {
            path: path.to_owned(),
            resource: resource.to_owned(),
            mode,
        })
        .await
        .map_err(map_not_found)?;
    descriptor_response(response, path, mode)
}

/// Open the primary handle for a parallel put.
pub async fn open_for_put_parallel(
    conn: &Connection,
    path: &str,
    resource: &str,
    task_count: usize,
    object_length: u64,
) -> Result<ObjectHandle, Error> {
    if !conn.supports_parallel_upload() {
        return Err(error::unsupported(
            "server does not support parallel upload",
        ));
    }
    let mode = OpenMode::ReadWrite;
    let response = conn
        .request(Request::OpenForPutParallel {
            path: path.to_owned(),
            resource: resource.to_owned(),
            mode,
            task_count,
            object_length,
        })
        .await
        .map_err(map_not_found)?;
    descriptor_response(response, path, mode)
}

/// Fetch the replica token and resource hierarchy of a primary handle.
pub async fn replica_access_info(
    conn: &Connection,
    handle: &ObjectHandle,
) -> Result<ReplicaAccess, Error> {
    let response = conn
        .request(Request::ReplicaAccessInfo {
            descriptor: handle.descriptor,
        })
        .await?;
    match response {
        Response::ReplicaAccessInfo {
            replica_token,
            resource_hierarchy,
        } => Ok(ReplicaAccess {
            replica_token,
            resource_hierarchy,
        }),
        other => Err(error::runtime(format!(
            "unexpected response to replica access info for {:?}: {other:?}",
            handle.path
        ))),
    }
}

/// Open a replica handle authorized by a primary's [`ReplicaAccess`].
///
/// Opened in plain write mode so the server does not seek to the end.
pub async fn open_with_replica_token(
    conn: &Connection,
    path: &str,
    resource: &str,
    access: &ReplicaAccess,
    task_count: usize,
    object_length: u64,
) -> Result<ObjectHandle, Error> {
    let mode = OpenMode::Write;
    let response = conn
        .request(Request::OpenWithReplicaToken {
            path: path.to_owned(),
            resource: resource.to_owned(),
            mode,
            replica_token: access.replica_token.clone(),
            resource_hierarchy: access.resource_hierarchy.clone(),
            task_count,
            object_length,
        })
        .await
        .map_err(map_not_found)?;
    descriptor_response(response, path, mode)
}

/// Reposition a handle, returning the offset the server reached.
pub async fn seek(
    conn: &Connection,
    handle: &ObjectHandle,
    offset: i64,
    whence: Whence,
) -> Result<i64, Error> {
    let response = conn
        .request(Request::Seek {
            descriptor: handle.descriptor,
            offset,
            whence,
        })
        .await?;
    match response {
        Response::Offset(reached) => Ok(reached),
        other => Err(error::runtime(format!(
            "unexpected response to seek of {:?}: {other:?}",
            handle.path
        ))),
    }
}

/// Read up to `length` bytes. An empty buffer means end of object.
pub async fn read(conn: &Connection, handle: &ObjectHandle, length: usize) -> Result<Bytes, Error> {
    let response = conn
        .request(Request::Read {
            descriptor: handle.descriptor,
            length,
        })
        .await?;
    match response {
        Response::Data(data) => Ok(data),
        other => Err(error::runtime(format!(
            "unexpected response to read of {:?}: {other:?}",
            handle.path
        ))),
    }
}

/// Write a buffer at the handle's current position.
pub async fn write(conn: &Connection, handle: &ObjectHandle, data: Bytes) -> Result<(), Error> {
    let len = data.len();
    let response = conn
        .request(Request::Write {
            descriptor: handle.descriptor,
            data,
        })
        .await?;
    match response {
        Response::Written(written) if written == len => Ok(()),
        Response::Written(written) => Err(error::runtime(format!(
            "short write to {:?}: {written} of {len} bytes",
            handle.path
        ))),
        other => Err(error::runtime(format!(
            "unexpected response to write of {:?}: {other:?}",
            handle.path
        ))),
    }
}

/// Close an ordinary or primary handle.
pub async fn close(conn: &Connection, handle: &ObjectHandle) -> Result<(), Error> {
    conn.request(Request::Close {
        descriptor: handle.descriptor,
    })
    .await
    .map(|_| ())
}

/// Close a replica handle. Never valid for ordinary or primary handles.
pub async fn close_replica(conn: &Connection, handle: &ObjectHandle) -> Result<(), Error> {
    if !conn.supports_parallel_upload() {
        return Err(error::unsupported(
            "server does not support closing a replica handle",
        ));
    }
    conn.request(Request::CloseReplica {
        descriptor: handle.descriptor,
    })
    .await
    .map_err(map_not_found)
    .map(|_| ())
}

/// Replicate a data object to a resource, server-side.
pub async fn replicate(conn: &Connection, path: &str, resource: &str) -> Result<(), Error> {
    conn.request(Request::Replicate {
        path: path.to_owned(),
        resource: resource.to_owned(),
    })
    .await
    .map_err(map_not_found)
    .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{test_account, MockGrid};
    use std::sync::Arc;
    use std::time::Duration;

    async fn connect(grid: &MockGrid) -> Connection {
        Connection::connect(
            &grid.connector(),
            Arc::new(test_account()),
            Duration::ZERO,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn open_missing_object_is_not_found() {
        let grid = MockGrid::new();
        let conn = connect(&grid).await;
        let err = open(&conn, "/zone/missing", "demoResc", OpenMode::Read)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn create_write_read_close() {
        let grid = MockGrid::new();
        let conn = connect(&grid).await;

        let handle = create(&conn, "/zone/x", "demoResc", OpenMode::ReadWrite, true)
            .await
            .unwrap();
        write(&conn, &handle, Bytes::from_static(b"abc123"))
            .await
            .unwrap();
        let reached = seek(&conn, &handle, 3, Whence::Start).await.unwrap();
        assert_eq!(reached, 3);
        let data = read(&conn, &handle, 16).await.unwrap();
        assert_eq!(&data[..], b"123");
        let eof = read(&conn, &handle, 16).await.unwrap();
        assert!(eof.is_empty());
        close(&conn, &handle).await.unwrap();
    }
}
