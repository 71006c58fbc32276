/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;

use crate::account::Account;
use crate::config::Config;
use crate::error::Error;
use crate::metrics::Metrics;
use crate::operation;
use crate::operation::download::DownloadOptions;
use crate::operation::upload::UploadOptions;
use crate::protocol::Connector;
use crate::session::Session;

/// Transfer manager client.
///
/// A thin, cheaply cloneable facade over a shared [`Session`]. All transfer
/// entry points are safe to call concurrently; connections are drawn from
/// (and shared through) the session.
///
/// # Examples
///
/// ```no_run
/// # async fn example(connector: std::sync::Arc<dyn irods_transfer_manager::protocol::Connector>)
/// # -> Result<(), irods_transfer_manager::error::Error> {
/// use irods_transfer_manager::{account::Account, Client, Config};
///
/// let account = Account::builder()
///     .host("grid.example.org")
///     .port(1247)
///     .zone("tempZone")
///     .username("rods")
///     .password("secret")
///     .default_resource("demoResc")
///     .build();
/// let client = Client::connect(connector, account, Config::default()).await?;
/// client
///     .put_file("report.dat", "/tempZone/home/rods/report.dat", &Default::default())
///     .await?;
/// client.release().await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    session: Arc<Session>,
}

impl Client {
    /// Create a client: builds the session, warms the pool, and probes the
    /// server's capabilities.
    pub async fn connect(
        connector: Arc<dyn Connector>,
        account: Account,
        config: Config,
    ) -> Result<Self, Error> {
        let session = Session::new(account, config, connector).await?;
        Ok(Self {
            session: Arc::new(session),
        })
    }

    /// The underlying session.
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Counters updated by this client's session and transfers.
    pub fn metrics(&self) -> &Arc<Metrics> {
        self.session.metrics()
    }

    fn track<T>(&self, result: Result<T, Error>) -> Result<T, Error> {
        if result.is_err() {
            self.session.metrics().add_transfer_failures(1);
        }
        result
    }

    /// Upload an in-memory buffer as a data object.
    pub async fn put_buffer(
        &self,
        data: Bytes,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<(), Error> {
        let result =
            operation::upload::upload_from_buffer(&self.session, data, remote_path, options).await;
        self.track(result)
    }

    /// Upload a local file serially over one connection.
    pub async fn put_file(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<(), Error> {
        let result =
            operation::upload::upload_file(&self.session, local_path.as_ref(), remote_path, options)
                .await;
        self.track(result)
    }

    /// Upload a local file with parallel writers.
    ///
    /// Falls back to the serial path when the server lacks parallel-upload
    /// support, the file is empty, or the task count resolves to one.
    pub async fn put_file_parallel(
        &self,
        local_path: impl AsRef<Path>,
        remote_path: &str,
        options: &UploadOptions,
    ) -> Result<(), Error> {
        let result = operation::upload::upload_file_parallel(
            &self.session,
            local_path.as_ref(),
            remote_path,
            options,
        )
        .await;
        self.track(result)
    }

    /// Download a whole object of known length into memory.
    pub async fn get_buffer(
        &self,
        remote_path: &str,
        object_length: u64,
        options: &DownloadOptions,
    ) -> Result<Bytes, Error> {
        let result =
            operation::download::download_to_buffer(&self.session, remote_path, object_length, options)
                .await;
        self.track(result)
    }

    /// Download an object of known length to a local file in parallel.
    pub async fn get_file(
        &self,
        remote_path: &str,
        object_length: u64,
        local_path: impl AsRef<Path>,
        options: &DownloadOptions,
    ) -> Result<(), Error> {
        let result = operation::download::download_file(
            &self.session,
            remote_path,
            object_length,
            local_path.as_ref(),
            options,
            false,
        )
        .await;
        self.track(result)
    }

    /// Download an object to a local file in parallel, journaling per-task
    /// progress so an interrupted transfer can resume.
    ///
    /// The journal lives next to the target (see
    /// [`resume_journal_path`](crate::io::resume_journal_path)) and is
    /// deleted only after a fully successful transfer.
    pub async fn get_file_resumable(
        &self,
        remote_path: &str,
        object_length: u64,
        local_path: impl AsRef<Path>,
        options: &DownloadOptions,
    ) -> Result<(), Error> {
        let result = operation::download::download_file(
            &self.session,
            remote_path,
            object_length,
            local_path.as_ref(),
            options,
            true,
        )
        .await;
        self.track(result)
    }

    /// Release the session: drop share bookkeeping and close pooled
    /// connections.
    pub async fn release(&self) {
        self.session.release().await;
    }
}
