/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, MutexGuard};

use crate::account::Account;
use crate::error::{self, Error, ErrorKind};
use crate::protocol::{Connector, Request, Response, ServerFeatures, Wire};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A single live, authenticated channel to the grid server.
///
/// All request/response exchanges on a connection are serialized by its
/// exclusive lock: callers obtain a [`ConnectionGuard`] via
/// [`lock`](Connection::lock) and issue round-trips through it. An I/O error
/// (or a round-trip timeout) raises the sticky socket-failed flag; from then
/// on every request fails with
/// [`ErrorKind::NotConnected`](crate::error::ErrorKind::NotConnected)
/// without touching the socket.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    account: Arc<Account>,
    features: ServerFeatures,
    operation_timeout: Duration,
    wire: Mutex<Box<dyn Wire>>,
    socket_failed: AtomicBool,
    connected: AtomicBool,
    created_at: Instant,
    last_used: std::sync::Mutex<Instant>,
}

impl Connection {
    /// Dial and authenticate a new connection.
    pub(crate) async fn connect(
        connector: &dyn Connector,
        account: Arc<Account>,
        operation_timeout: Duration,
    ) -> Result<Self, Error> {
        let wire = connector.connect(&account).await?;
        let features = wire.features();
        let now = Instant::now();
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(connection = id, host = account.host(), "connected");
        Ok(Self {
            id,
            account,
            features,
            operation_timeout,
            wire: Mutex::new(wire),
            socket_failed: AtomicBool::new(false),
            connected: AtomicBool::new(true),
            created_at: now,
            last_used: std::sync::Mutex::new(now),
        })
    }

    /// Identity of this connection, unique within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The account this connection authenticated as.
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// Capabilities reported by the server.
    pub fn features(&self) -> ServerFeatures {
        self.features
    }

    /// Whether the server supports the replica-token parallel upload protocol.
    pub fn supports_parallel_upload(&self) -> bool {
        self.features.parallel_upload
    }

    /// Whether the connection is usable: connected and the socket healthy.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.is_socket_failed()
    }

    /// Whether a round-trip ever hit a socket error. Sticky until destroyed.
    pub fn is_socket_failed(&self) -> bool {
        self.socket_failed.load(Ordering::Acquire)
    }

    /// Acquire the connection's exclusive lock.
    pub async fn lock(&self) -> ConnectionGuard<'_> {
        ConnectionGuard {
            conn: self,
            wire: self.wire.lock().await,
        }
    }

    /// Single-shot round-trip: lock, send, unlock.
    pub async fn request(&self, request: Request) -> Result<Response, Error> {
        self.lock().await.request_and_check(request).await
    }

    /// Close the channel. Safe to call more than once.
    pub(crate) async fn disconnect(&self) {
        if !self.connected.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.is_socket_failed() {
            // the socket is already gone, nothing to shut down cleanly
            return;
        }
        let mut wire = self.wire.lock().await;
        if let Err(err) = wire.shutdown().await {
            tracing::debug!(connection = self.id, error = %err, "shutdown failed");
        }
    }

    pub(crate) fn mark_socket_failed(&self) {
        self.socket_failed.store(true, Ordering::Release);
    }

    /// Age of the connection since creation.
    pub(crate) fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the connection was last returned to the pool.
    pub(crate) fn idle_time(&self) -> Duration {
        self.last_used
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    pub(crate) fn touch(&self) {
        if let Ok(mut at) = self.last_used.lock() {
            *at = Instant::now();
        }
    }
}

/// Exclusive access to a [`Connection`] for one or more round-trips.
///
/// Holding the guard guarantees no other caller can interleave wire traffic.
#[derive(Debug)]
pub struct ConnectionGuard<'a> {
    conn: &'a Connection,
    wire: MutexGuard<'a, Box<dyn Wire>>,
}

impl ConnectionGuard<'_> {
    /// Perform one request/response round-trip and check the result.
    ///
    /// A socket-level failure (I/O error or timeout) marks the connection
    /// failed; later requests on it fail without touching the socket.
    pub async fn request_and_check(&mut self, request: Request) -> Result<Response, Error> {
        if self.conn.is_socket_failed() {
            return Err(error::not_connected("socket previously failed"));
        }
        if !self.conn.connected.load(Ordering::Acquire) {
            return Err(error::not_connected("connection is closed"));
        }

        let timeout = self.conn.operation_timeout;
        let result = if timeout.is_zero() {
            self.wire.call(request).await
        } else {
            match tokio::time::timeout(timeout, self.wire.call(request)).await {
                Ok(result) => result,
                Err(_) => {
                    self.conn.mark_socket_failed();
                    tracing::warn!(connection = self.conn.id, "round-trip timed out");
                    return Err(error::io_error(format!(
                        "round-trip timed out after {timeout:?}"
                    )));
                }
            }
        };

        match result {
            Err(err) if matches!(err.kind(), ErrorKind::IoError) => {
                self.conn.mark_socket_failed();
                tracing::warn!(connection = self.conn.id, error = %err, "socket failed");
                Err(err)
            }
            other => other,
        }
    }

    /// Issue the no-op transaction-reset round-trip.
    pub async fn reset_transaction(&mut self) -> Result<(), Error> {
        self.request_and_check(Request::ResetTransaction)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Default)]
    struct FlakyWire {
        calls: Arc<AtomicUsize>,
        fail_io: bool,
    }

    #[async_trait]
    impl Wire for FlakyWire {
        async fn call(&mut self, _request: Request) -> Result<Response, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_io {
                Err(error::io_error("connection reset by peer"))
            } else {
                Ok(Response::Ack)
            }
        }

        async fn shutdown(&mut self) -> Result<(), Error> {
            Ok(())
        }

        fn features(&self) -> ServerFeatures {
            ServerFeatures::default()
        }
    }

    #[derive(Debug)]
    struct FlakyConnector {
        calls: Arc<AtomicUsize>,
        fail_io: bool,
    }

    #[async_trait]
    impl Connector for FlakyConnector {
        async fn connect(&self, _account: &Account) -> Result<Box<dyn Wire>, Error> {
            Ok(Box::new(FlakyWire {
                calls: self.calls.clone(),
                fail_io: self.fail_io,
            }))
        }
    }

    fn account() -> Arc<Account> {
        Arc::new(
            Account::builder()
                .host("localhost")
                .port(1247)
                .zone("tempZone")
                .username("rods")
                .build(),
        )
    }

    #[tokio::test]
    async fn socket_failure_is_sticky_and_skips_the_wire() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = FlakyConnector {
            calls: calls.clone(),
            fail_io: true,
        };
        let conn = Connection::connect(&connector, account(), Duration::ZERO)
            .await
            .unwrap();

        let err = conn.request(Request::ResetTransaction).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::IoError);
        assert!(conn.is_socket_failed());
        assert!(!conn.is_connected());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // second attempt must not touch the wire
        let err = conn.request(Request::ResetTransaction).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotConnected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn healthy_round_trip_leaves_connection_usable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let connector = FlakyConnector {
            calls,
            fail_io: false,
        };
        let conn = Connection::connect(&connector, account(), Duration::from_secs(5))
            .await
            .unwrap();

        let mut guard = conn.lock().await;
        guard.reset_transaction().await.unwrap();
        drop(guard);
        assert!(conn.is_connected());
        assert!(!conn.is_socket_failed());

        conn.disconnect().await;
        assert!(!conn.is_connected());
        let err = conn.request(Request::ResetTransaction).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotConnected);
    }
}
