/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::AsyncReadExt;
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::connection::Connection;
use crate::error::{self, Error};
use crate::io::file_util;
use crate::object::{self, ObjectHandle, ReplicaAccess};
use crate::operation::{partition_tasks, resolve_resource, TransferTask};
use crate::protocol::{OpenMode, Whence};
use crate::session::Session;
use crate::types::{ProgressCallback, TaskCount};
use crate::TRANSFER_BLOCK_SIZE;

/// Options for an upload.
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub(crate) resource: Option<String>,
    pub(crate) task_count: TaskCount,
    pub(crate) replicate: bool,
    pub(crate) progress: Option<ProgressCallback>,
}

impl UploadOptions {
    /// Target storage resource. Defaults to the account's default resource.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Worker task count for parallel uploads.
    pub fn task_count(mut self, task_count: TaskCount) -> Self {
        self.task_count = task_count;
        self
    }

    /// Replicate the object server-side after the upload completes.
    pub fn replicate(mut self, replicate: bool) -> Self {
        self.replicate = replicate;
        self
    }

    /// Progress callback, invoked as `(processed_total, grand_total)`.
    pub fn progress(mut self, progress: impl Into<ProgressCallback>) -> Self {
        self.progress = Some(progress.into());
        self
    }
}

fn notify(progress: &Option<ProgressCallback>, processed: u64, total: u64) {
    if let Some(progress) = progress {
        progress.call(processed, total);
    }
}

/// Serial upload of an in-memory buffer.
pub(crate) async fn upload_from_buffer(
    session: &Arc<Session>,
    data: Bytes,
    remote_path: &str,
    options: &UploadOptions,
) -> Result<(), Error> {
    let resource = resolve_resource(session, &options.resource);
    let total = data.len() as u64;

    let conn = session.acquire_connection().await?;
    let result = write_serial(
        session,
        &conn,
        SerialSource::Buffer(data),
        remote_path,
        &resource,
        total,
        options,
    )
    .await;
    session.return_connection(&conn).await;
    result
}

/// Serial upload of a local file.
pub(crate) async fn upload_file(
    session: &Arc<Session>,
    local_path: &Path,
    remote_path: &str,
    options: &UploadOptions,
) -> Result<(), Error> {
    let resource = resolve_resource(session, &options.resource);
    let metadata = tokio::fs::metadata(local_path).await?;
    let total = metadata.len();

    tracing::debug!(local = %local_path.display(), remote = remote_path, "uploading data object");

    let conn = session.acquire_connection().await?;
    let result = write_serial(
        session,
        &conn,
        SerialSource::File(local_path),
        remote_path,
        &resource,
        total,
        options,
    )
    .await;
    session.return_connection(&conn).await;
    result
}

enum SerialSource<'a> {
    Buffer(Bytes),
    File(&'a Path),
}

impl SerialSource<'_> {
    async fn stream(
        self,
        session: &Arc<Session>,
        conn: &Connection,
        handle: &ObjectHandle,
        total: u64,
        progress: &Option<ProgressCallback>,
    ) -> Result<(), Error> {
        let mut uploaded = 0u64;
        match self {
            SerialSource::Buffer(data) => {
                let mut at = 0usize;
                while at < data.len() {
                    let end = cmp::min(at + TRANSFER_BLOCK_SIZE, data.len());
                    let chunk = data.slice(at..end);
                    let len = chunk.len() as u64;
                    object::write(conn, handle, chunk).await?;
                    uploaded += len;
                    session.metrics().add_bytes_sent(len);
                    notify(progress, uploaded, total);
                    at = end;
                }
            }
            SerialSource::File(path) => {
                let mut file = tokio::fs::File::open(path).await?;
                let mut buf = BytesMut::with_capacity(TRANSFER_BLOCK_SIZE);
                loop {
                    buf.reserve(TRANSFER_BLOCK_SIZE);
                    let read = file.read_buf(&mut buf).await?;
                    if read == 0 {
                        break;
                    }
                    let chunk = buf.split().freeze();
                    let len = chunk.len() as u64;
                    object::write(conn, handle, chunk).await?;
                    uploaded += len;
                    session.metrics().add_bytes_sent(len);
                    notify(progress, uploaded, total);
                }
            }
        }
        Ok(())
    }
}

async fn write_serial(
    session: &Arc<Session>,
    conn: &Arc<Connection>,
    source: SerialSource<'_>,
    remote_path: &str,
    resource: &str,
    total: u64,
    options: &UploadOptions,
) -> Result<(), Error> {
    if !conn.is_connected() {
        return Err(error::not_connected("connection is not usable"));
    }

    let handle = object::create(conn, remote_path, resource, OpenMode::ReadWrite, true).await?;
    notify(&options.progress, 0, total);

    let body = source
        .stream(session, conn, &handle, total, &options.progress)
        .await;
    let closed = object::close(conn, &handle).await;
    body?;
    closed?;

    if options.replicate {
        object::replicate(conn, remote_path, resource).await?;
    }
    Ok(())
}

/// Parallel upload of a local file using the replica-token protocol.
///
/// Falls back to the serial path when the server lacks parallel-upload
/// support, the file is empty, or the task count resolves to one.
pub(crate) async fn upload_file_parallel(
    session: &Arc<Session>,
    local_path: &Path,
    remote_path: &str,
    options: &UploadOptions,
) -> Result<(), Error> {
    if !session.supports_parallel_upload() {
        return upload_file(session, local_path, remote_path, options).await;
    }

    let metadata = tokio::fs::metadata(local_path).await?;
    let object_length = metadata.len();
    if object_length == 0 {
        return upload_file(session, local_path, remote_path, options).await;
    }

    let task_count = options.task_count.resolve(object_length);
    if task_count == 1 {
        return upload_file(session, local_path, remote_path, options).await;
    }

    let resource = resolve_resource(session, &options.resource);
    tracing::debug!(
        remote = remote_path,
        size = object_length,
        tasks = task_count,
        "uploading data object in parallel"
    );

    // the primary connection is unmanaged, a pooled one must not be shared
    // with the replica writers
    let primary_conn = session.acquire_unmanaged_connection().await?;
    let result = parallel_put(
        session,
        &primary_conn,
        local_path,
        remote_path,
        &resource,
        object_length,
        task_count,
        options,
    )
    .await;
    session.discard_connection(&primary_conn).await;
    result
}

#[allow(clippy::too_many_arguments)]
async fn parallel_put(
    session: &Arc<Session>,
    primary_conn: &Arc<Connection>,
    local_path: &Path,
    remote_path: &str,
    resource: &str,
    object_length: u64,
    task_count: usize,
    options: &UploadOptions,
) -> Result<(), Error> {
    if !primary_conn.is_connected() {
        return Err(error::not_connected("connection is not usable"));
    }

    let primary = object::open_for_put_parallel(
        primary_conn,
        remote_path,
        resource,
        task_count,
        object_length,
    )
    .await?;

    let access = match object::replica_access_info(primary_conn, &primary).await {
        Ok(access) => access,
        Err(err) => {
            if let Err(close_err) = object::close(primary_conn, &primary).await {
                tracing::debug!(error = %close_err, "failed to close primary handle");
            }
            return Err(err);
        }
    };
    tracing::debug!(
        token = %access.replica_token,
        hierarchy = %access.resource_hierarchy,
        "replica access granted"
    );

    notify(&options.progress, 0, object_length);

    let ctx = UploadContext {
        session: session.clone(),
        local_path: Arc::new(local_path.to_owned()),
        remote_path: remote_path.to_owned(),
        resource: resource.to_owned(),
        access: Arc::new(access),
        object_length,
        task_count,
        total: Arc::new(AtomicU64::new(0)),
        progress: options.progress.clone(),
    };

    let (err_tx, err_rx) = async_channel::bounded(task_count);
    let mut workers = JoinSet::new();
    for task in partition_tasks(object_length, task_count) {
        let ctx = ctx.clone();
        let err_tx = err_tx.clone();
        workers.spawn(
            async move {
                if let Err(err) = run_upload_task(&ctx, task).await {
                    let _ = err_tx.try_send(error::task_failed(task.id, err));
                }
            }
            .instrument(tracing::debug_span!("upload-task", task = task.id)),
        );
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(join_err) = joined {
            let _ = err_tx.try_send(Error::from(join_err));
        }
    }
    drop(err_tx);

    if let Ok(err) = err_rx.try_recv() {
        if let Err(close_err) = object::close(primary_conn, &primary).await {
            tracing::debug!(error = %close_err, "failed to close primary handle");
        }
        return Err(err);
    }

    object::close(primary_conn, &primary).await?;

    if options.replicate {
        object::replicate(primary_conn, remote_path, resource).await?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct UploadContext {
    session: Arc<Session>,
    local_path: Arc<PathBuf>,
    remote_path: String,
    resource: String,
    access: Arc<ReplicaAccess>,
    object_length: u64,
    task_count: usize,
    total: Arc<AtomicU64>,
    progress: Option<ProgressCallback>,
}

/// One replica writer: fresh unmanaged connection, replica handle, exact
/// seek, positional local reads. Socket failure here is fatal, the
/// primary/replica handle state cannot be rebuilt mid-put.
async fn run_upload_task(ctx: &UploadContext, task: TransferTask) -> Result<(), Error> {
    let conn = ctx.session.acquire_unmanaged_connection().await?;
    let result = write_task_range(ctx, task, &conn).await;
    ctx.session.discard_connection(&conn).await;
    result
}

async fn write_task_range(
    ctx: &UploadContext,
    task: TransferTask,
    conn: &Arc<Connection>,
) -> Result<(), Error> {
    if !conn.is_connected() {
        return Err(error::not_connected("connection is not usable"));
    }

    let handle = object::open_with_replica_token(
        conn,
        &ctx.remote_path,
        &ctx.resource,
        &ctx.access,
        ctx.task_count,
        ctx.object_length,
    )
    .await?;

    let body = stream_task_range(ctx, task, conn, &handle).await;

    // replica handles use the replica-close primitive, never ordinary close
    let closed = object::close_replica(conn, &handle).await;
    body?;
    closed
}

async fn stream_task_range(
    ctx: &UploadContext,
    task: TransferTask,
    conn: &Arc<Connection>,
    handle: &ObjectHandle,
) -> Result<(), Error> {
    let reached = object::seek(conn, handle, task.offset as i64, Whence::Start).await?;
    if reached != task.offset as i64 {
        return Err(error::seek_mismatch(
            &ctx.remote_path,
            task.offset as i64,
            reached,
        ));
    }

    let mut remain = task.length;
    while remain > 0 {
        let want = cmp::min(TRANSFER_BLOCK_SIZE as u64, remain) as usize;
        let read_offset = task.offset + (task.length - remain);
        let chunk = read_local_chunk(ctx.local_path.clone(), read_offset, want).await?;
        object::write(conn, handle, chunk).await?;

        let len = want as u64;
        let processed = ctx.total.fetch_add(len, Ordering::SeqCst) + len;
        ctx.session.metrics().add_bytes_sent(len);
        notify(&ctx.progress, processed, ctx.object_length);
        remain -= len;
    }
    Ok(())
}

async fn read_local_chunk(path: Arc<PathBuf>, offset: u64, len: usize) -> Result<Bytes, Error> {
    let chunk = tokio::task::spawn_blocking(move || {
        let mut dst = BytesMut::with_capacity(len);
        dst.resize(len, 0);
        file_util::read_file_chunk_sync(&mut dst, path.as_ref(), offset)?;
        Ok::<_, Error>(dst.freeze())
    })
    .await??;
    Ok(chunk)
}
