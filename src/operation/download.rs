/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::cmp;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::task::JoinSet;
use tracing::Instrument;

use crate::connection::Connection;
use crate::error::{self, Error, ErrorKind};
use crate::io::file_util;
use crate::io::journal::{JournalEntry, ResumeJournal};
use crate::object::{self, ObjectHandle};
use crate::operation::{partition_tasks, resolve_resource, TransferTask};
use crate::protocol::{OpenMode, Whence};
use crate::session::Session;
use crate::types::{ProgressCallback, TaskCount};
use crate::TRANSFER_BLOCK_SIZE;

/// Options for a download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    pub(crate) resource: Option<String>,
    pub(crate) task_count: TaskCount,
    pub(crate) progress: Option<ProgressCallback>,
}

impl DownloadOptions {
    /// Storage resource to read from. Defaults to the account's default.
    pub fn resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Worker task count. Capped by the session's `connection_max_number`;
    /// a resumed download keeps the partitioning recorded in its journal.
    pub fn task_count(mut self, task_count: TaskCount) -> Self {
        self.task_count = task_count;
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

/// Serial download of a whole object into memory.
pub(crate) async fn download_to_buffer(
    session: &Arc<Session>,
    remote_path: &str,
    object_length: u64,
    options: &DownloadOptions,
) -> Result<Bytes, Error> {
    let resource = resolve_resource(session, &options.resource);
    tracing::debug!(remote = remote_path, "downloading data object to buffer");

    let conn = session.acquire_connection().await?;
    let result = read_to_buffer(session, &conn, remote_path, &resource, object_length, options).await;
    session.return_connection(&conn).await;
    result
}

async fn read_to_buffer(
    session: &Arc<Session>,
    conn: &Arc<Connection>,
    remote_path: &str,
    resource: &str,
    object_length: u64,
    options: &DownloadOptions,
) -> Result<Bytes, Error> {
    if !conn.is_connected() {
        return Err(error::not_connected("connection is not usable"));
    }

    let handle = object::open(conn, remote_path, resource, OpenMode::Read).await?;
    notify(&options.progress, 0, object_length);

    let mut out = BytesMut::with_capacity(object_length as usize);
    let mut downloaded = 0u64;
    let body = loop {
        match object::read(conn, &handle, TRANSFER_BLOCK_SIZE).await {
            Ok(chunk) if chunk.is_empty() => break Ok(()),
            Ok(chunk) => {
                downloaded += chunk.len() as u64;
                session.metrics().add_bytes_received(chunk.len() as u64);
                out.extend_from_slice(&chunk);
                notify(&options.progress, downloaded, object_length);
            }
            Err(err) => break Err(err),
        }
    };

    if conn.is_connected() {
        if let Err(close_err) = object::close(conn, &handle).await {
            tracing::debug!(error = %close_err, "failed to close remote handle");
        }
    }
    body?;
    Ok(out.freeze())
}

/// Parallel download of an object to a local file.
///
/// When `resumable` is set, per-task progress is journaled next to the
/// target so an interrupted download can pick up where it left off; the
/// journal is deleted only after a fully successful transfer.
pub(crate) async fn download_file(
    session: &Arc<Session>,
    remote_path: &str,
    object_length: u64,
    local_path: &Path,
    options: &DownloadOptions,
    resumable: bool,
) -> Result<(), Error> {
    let resource = resolve_resource(session, &options.resource);

    if object_length == 0 {
        tokio::fs::File::create(local_path).await?;
        notify(&options.progress, 0, 0);
        return Ok(());
    }

    let mut task_count = options
        .task_count
        .resolve(object_length)
        .min(session.config().connection_max_number())
        .max(1);

    let journal = if resumable {
        let journal = ResumeJournal::open_or_create(
            local_path,
            remote_path,
            object_length,
            task_count,
            TRANSFER_BLOCK_SIZE,
        )?;
        // a previous run's partitioning wins, otherwise resumed offsets
        // would not line up with previously written bytes
        task_count = journal.task_count();
        Some(Arc::new(journal))
    } else {
        None
    };

    tracing::debug!(
        remote = remote_path,
        size = object_length,
        tasks = task_count,
        resumable,
        "downloading data object in parallel"
    );

    // pre-create the local file: truncated for a fresh download, preserved
    // when resuming over partial data
    if resumable {
        tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .open(local_path)
            .await?;
    } else {
        tokio::fs::File::create(local_path).await?;
    }

    let tasks = partition_tasks(object_length, task_count);
    let total = Arc::new(AtomicU64::new(0));
    notify(&options.progress, 0, object_length);

    // seed progress recorded by a previous run
    let mut resumed = vec![0u64; tasks.len()];
    if let Some(journal) = &journal {
        for task in &tasks {
            if let Some(done) = journal.completed(task.offset) {
                let done = done.min(task.length);
                if done > 0 {
                    resumed[task.id] = done;
                    let processed = total.fetch_add(done, Ordering::SeqCst) + done;
                    notify(&options.progress, processed, object_length);
                }
            }
        }
    }

    let connections = session.acquire_connections_multi(tasks.len()).await?;

    let ctx = DownloadContext {
        session: session.clone(),
        remote_path: remote_path.to_owned(),
        resource,
        local_path: Arc::new(local_path.to_owned()),
        object_length,
        total: total.clone(),
        progress: options.progress.clone(),
        journal: journal.clone(),
    };

    let (err_tx, err_rx) = async_channel::bounded(tasks.len());
    let mut workers = JoinSet::new();
    for task in tasks {
        let conn = connections[task.id % connections.len()].clone();
        let ctx = ctx.clone();
        let err_tx = err_tx.clone();
        let seeded = resumed[task.id];
        workers.spawn(
            async move {
                download_task(ctx, task, seeded, conn, err_tx).await;
            }
            .instrument(tracing::debug_span!("download-task", task = task.id)),
        );
    }

    while let Some(joined) = workers.join_next().await {
        if let Err(join_err) = joined {
            let _ = err_tx.try_send(Error::from(join_err));
        }
    }
    drop(err_tx);
    drop(ctx);

    if let Ok(err) = err_rx.try_recv() {
        if let Some(journal) = journal {
            if let Ok(journal) = Arc::try_unwrap(journal) {
                // keep the file so a future invocation can resume
                journal.close();
            }
        }
        return Err(err);
    }

    if let Some(journal) = journal {
        let transferred = total.load(Ordering::SeqCst);
        if transferred < object_length {
            // advisory: the object was shorter than the declared length
            if let Ok(journal) = Arc::try_unwrap(journal) {
                journal.close();
            }
            return Err(Error::new(
                ErrorKind::TransferIncomplete,
                format!("transferred {transferred} of {object_length} bytes"),
            ));
        }
        if let Ok(journal) = Arc::try_unwrap(journal) {
            journal.finish()?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone)]
struct DownloadContext {
    session: Arc<Session>,
    remote_path: String,
    resource: String,
    local_path: Arc<PathBuf>,
    object_length: u64,
    total: Arc<AtomicU64>,
    progress: Option<ProgressCallback>,
    journal: Option<Arc<ResumeJournal>>,
}

#[derive(Debug)]
struct TaskState {
    last_offset: u64,
    remain: u64,
}

/// One download worker. Socket failures retry indefinitely with a fresh
/// session connection from the last good offset; any other error is fatal
/// for the whole transfer and is enqueued for the orchestrator.
async fn download_task(
    ctx: DownloadContext,
    task: TransferTask,
    seeded: u64,
    mut conn: Arc<Connection>,
    err_tx: async_channel::Sender<Error>,
) {
    let mut state = TaskState {
        last_offset: task.offset + seeded,
        remain: task.length - seeded,
    };

    loop {
        match run_trial(&ctx, task, &mut state, &conn, &err_tx).await {
            Ok(()) => {
                ctx.session.return_connection(&conn).await;
                return;
            }
            Err(err) => {
                if conn.is_socket_failed() {
                    tracing::debug!(
                        task = task.id,
                        offset = state.last_offset,
                        "socket failed, retrying with a fresh connection"
                    );
                    ctx.session.return_connection(&conn).await;
                    match ctx.session.acquire_connection().await {
                        Ok(fresh) => {
                            conn = fresh;
                            continue;
                        }
                        Err(acquire_err) => {
                            let _ = err_tx.try_send(error::task_failed(task.id, acquire_err));
                            return;
                        }
                    }
                }
                let _ = err_tx.try_send(error::task_failed(task.id, err));
                ctx.session.return_connection(&conn).await;
                return;
            }
        }
    }
}

async fn run_trial(
    ctx: &DownloadContext,
    task: TransferTask,
    state: &mut TaskState,
    conn: &Arc<Connection>,
    err_tx: &async_channel::Sender<Error>,
) -> Result<(), Error> {
    if !conn.is_connected() {
        return Err(error::not_connected("connection is not usable"));
    }

    let handle = object::open(conn, &ctx.remote_path, &ctx.resource, OpenMode::Read).await?;
    let body = stream_chunks(ctx, task, state, conn, &handle, err_tx).await;

    if conn.is_connected() {
        if let Err(close_err) = object::close(conn, &handle).await {
            tracing::debug!(task = task.id, error = %close_err, "failed to close remote handle");
        }
    }
    body
}

async fn stream_chunks(
    ctx: &DownloadContext,
    task: TransferTask,
    state: &mut TaskState,
    conn: &Arc<Connection>,
    handle: &ObjectHandle,
    err_tx: &async_channel::Sender<Error>,
) -> Result<(), Error> {
    if state.last_offset > 0 {
        tracing::debug!(
            task = task.id,
            offset = state.last_offset,
            "seeking to the last good offset"
        );
        let reached = object::seek(conn, handle, state.last_offset as i64, Whence::Start).await?;
        if reached != state.last_offset as i64 {
            return Err(error::seek_mismatch(
                &ctx.remote_path,
                state.last_offset as i64,
                reached,
            ));
        }
    }

    while state.remain > 0 {
        let want = cmp::min(TRANSFER_BLOCK_SIZE as u64, state.remain) as usize;
        let chunk = object::read(conn, handle, want).await?;
        if chunk.is_empty() {
            // the object is shorter than the computed partition
            tracing::debug!(task = task.id, remaining = state.remain, "received EOF");
            return Ok(());
        }

        let len = chunk.len() as u64;
        let write_offset = task.offset + (task.length - state.remain);
        write_local_chunk(ctx.local_path.clone(), chunk, write_offset).await?;

        let processed = ctx.total.fetch_add(len, Ordering::SeqCst) + len;
        ctx.session.metrics().add_bytes_received(len);

        if let Some(journal) = &ctx.journal {
            journal.append(JournalEntry {
                start_offset: task.offset,
                length: task.length,
                completed_length: (task.length - state.remain) + len,
            })?;
        }

        notify(&ctx.progress, processed, ctx.object_length);
        state.remain -= len;
        state.last_offset += len;

        if !err_tx.is_empty() {
            // a sibling task already failed
            return Err(error::operation_cancelled());
        }
    }

    tracing::debug!(task = task.id, downloaded = task.length, "task done");
    Ok(())
}

async fn write_local_chunk(path: Arc<PathBuf>, data: Bytes, offset: u64) -> Result<(), Error> {
    tokio::task::spawn_blocking(move || {
        file_util::write_file_chunk_sync(&data, path.as_ref(), offset).map_err(Error::from)
    })
    .await??;
    Ok(())
}
