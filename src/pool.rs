/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::account::Account;
use crate::connection::Connection;
use crate::error::{self, Error};
use crate::metrics::Metrics;
use crate::protocol::Connector;

/// Capacity and lifetime limits for a [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Connections created at startup
    pub initial_cap: usize,
    /// Maximum idle connections retained
    pub max_idle: usize,
    /// Maximum open (idle + outstanding) connections
    pub max_cap: usize,
    /// Age ceiling for a connection
    pub lifespan: Duration,
    /// Idle time after which a connection is discarded at `get`
    pub idle_timeout: Duration,
    /// Timeout applied to every round-trip on pooled connections
    pub operation_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let config = crate::config::Config::default();
        Self {
            initial_cap: config.connection_init_number(),
            max_idle: config.connection_max_idle(),
            max_cap: config.connection_max(),
            lifespan: config.connection_lifespan(),
            idle_timeout: config.connection_idle_timeout(),
            operation_timeout: config.operation_timeout(),
        }
    }
}

#[derive(Debug, Default)]
struct PoolState {
    idle: VecDeque<Arc<Connection>>,
    outstanding: usize,
}

impl PoolState {
    fn open(&self) -> usize {
        self.idle.len() + self.outstanding
    }
}

/// A bounded pool of authenticated connections.
///
/// Eviction is lazy: expiry (age beyond `lifespan`) and staleness (idle
/// beyond `idle_timeout`) are only inspected when a connection is handed
/// out. The pool is internally synchronized.
#[derive(Debug)]
pub struct ConnectionPool {
    account: Arc<Account>,
    connector: Arc<dyn Connector>,
    config: PoolConfig,
    metrics: Arc<Metrics>,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// Create a pool and pre-create `initial_cap` connections.
    pub async fn new(
        account: Arc<Account>,
        connector: Arc<dyn Connector>,
        config: PoolConfig,
        metrics: Arc<Metrics>,
    ) -> Result<Self, Error> {
        let pool = Self {
            account,
            connector,
            config,
            metrics,
            state: Mutex::new(PoolState::default()),
        };

        let warm = pool
            .config
            .initial_cap
            .min(pool.config.max_idle)
            .min(pool.config.max_cap);
        {
            let mut state = pool.state.lock().await;
            for _ in 0..warm {
                let conn = pool.create().await?;
                state.idle.push_back(conn);
            }
        }
        Ok(pool)
    }

    async fn create(&self) -> Result<Arc<Connection>, Error> {
        let conn = Connection::connect(
            self.connector.as_ref(),
            self.account.clone(),
            self.config.operation_timeout,
        )
        .await?;
        self.metrics.add_connections_opened(1);
        Ok(Arc::new(conn))
    }

    async fn destroy(&self, conn: &Arc<Connection>) {
        conn.disconnect().await;
        self.metrics.add_connections_closed(1);
    }

    /// Hand out a connection, reusing an idle one when possible.
    ///
    /// Returns the connection and whether it was newly created. Fails with
    /// [`ErrorKind::PoolFull`](crate::error::ErrorKind::PoolFull) when every
    /// slot up to `max_cap` is outstanding.
    pub async fn get(&self) -> Result<(Arc<Connection>, bool), Error> {
        let mut state = self.state.lock().await;

        while let Some(conn) = state.idle.pop_front() {
            if !conn.is_connected() {
                tracing::debug!(connection = conn.id(), "dropping dead idle connection");
                self.destroy(&conn).await;
                continue;
            }
            if conn.age() > self.config.lifespan {
                tracing::debug!(connection = conn.id(), "dropping expired idle connection");
                self.destroy(&conn).await;
                continue;
            }
            if conn.idle_time() > self.config.idle_timeout {
                tracing::debug!(connection = conn.id(), "dropping stale idle connection");
                self.destroy(&conn).await;
                continue;
            }
            state.outstanding += 1;
            return Ok((conn, false));
        }

        if state.open() >= self.config.max_cap {
            return Err(error::pool_full(format!(
                "all {} connections are outstanding",
                self.config.max_cap
            )));
        }
        let conn = self.create().await?;
        state.outstanding += 1;
        Ok((conn, true))
    }

    /// Unconditionally create a fresh connection, subject to `max_cap`.
    pub async fn get_new(&self) -> Result<Arc<Connection>, Error> {
        let mut state = self.state.lock().await;
        if state.open() >= self.config.max_cap {
            return Err(error::pool_full(format!(
                "all {} connections are outstanding",
                self.config.max_cap
            )));
        }
        let conn = self.create().await?;
        state.outstanding += 1;
        Ok(conn)
    }

    /// Return an outstanding connection to the idle list.
    ///
    /// Socket-failed, expired, or surplus (beyond `max_idle`) connections
    /// are destroyed instead.
    pub async fn return_connection(&self, conn: Arc<Connection>) {
        let mut state = self.state.lock().await;
        state.outstanding = state.outstanding.saturating_sub(1);

        if !conn.is_connected()
            || conn.age() > self.config.lifespan
            || state.idle.len() >= self.config.max_idle
        {
            self.destroy(&conn).await;
            return;
        }
        conn.touch();
        state.idle.push_back(conn);
    }

    /// Destroy an outstanding connection unconditionally.
    pub async fn discard(&self, conn: Arc<Connection>) {
        let mut state = self.state.lock().await;
        state.outstanding = state.outstanding.saturating_sub(1);
        self.destroy(&conn).await;
    }

    /// Destroy every idle connection and forget outstanding ones.
    ///
    /// Callers still holding outstanding connections are responsible for
    /// discarding them.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        while let Some(conn) = state.idle.pop_front() {
            self.destroy(&conn).await;
        }
        state.outstanding = 0;
    }

    /// Idle connections plus remaining headroom to `max_cap`.
    pub async fn available_connections(&self) -> usize {
        let state = self.state.lock().await;
        state.idle.len() + self.config.max_cap.saturating_sub(state.open())
    }

    /// Idle plus outstanding connections.
    pub async fn open_connections(&self) -> usize {
        self.state.lock().await.open()
    }

    /// Idle connections currently retained.
    pub async fn idle_connections(&self) -> usize {
        self.state.lock().await.idle.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::MockGrid;

    fn pool_config(max_cap: usize, max_idle: usize) -> PoolConfig {
        PoolConfig {
            initial_cap: 0,
            max_idle,
            max_cap,
            lifespan: Duration::from_secs(3600),
            idle_timeout: Duration::from_secs(3600),
            operation_timeout: Duration::ZERO,
        }
    }

    async fn new_pool(config: PoolConfig) -> (ConnectionPool, MockGrid) {
        let grid = MockGrid::new();
        let pool = ConnectionPool::new(
            Arc::new(crate::mock::test_account()),
            Arc::new(grid.connector()),
            config,
            Arc::new(Metrics::default()),
        )
        .await
        .unwrap();
        (pool, grid)
    }

    #[tokio::test]
    async fn warms_initial_connections() {
        let config = PoolConfig {
            initial_cap: 2,
            ..pool_config(4, 4)
        };
        let (pool, grid) = new_pool(config).await;
        assert_eq!(pool.idle_connections().await, 2);
        assert_eq!(pool.open_connections().await, 2);
        assert_eq!(grid.counters().connects, 2);
    }

    #[tokio::test]
    async fn get_reuses_idle_before_creating() {
        let (pool, grid) = new_pool(pool_config(2, 2)).await;

        let (first, is_new) = pool.get().await.unwrap();
        assert!(is_new);
        pool.return_connection(first.clone()).await;

        let (second, is_new) = pool.get().await.unwrap();
        assert!(!is_new);
        assert_eq!(second.id(), first.id());
        assert_eq!(grid.counters().connects, 1);
    }

    #[tokio::test]
    async fn full_pool_rejects() {
        let (pool, _grid) = new_pool(pool_config(1, 1)).await;
        let (_held, _) = pool.get().await.unwrap();
        let err = pool.get().await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PoolFull);
        let err = pool.get_new().await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::PoolFull);
    }

    #[tokio::test]
    async fn surplus_idle_is_destroyed_on_return() {
        let (pool, _grid) = new_pool(pool_config(4, 1)).await;
        let (a, _) = pool.get().await.unwrap();
        let (b, _) = pool.get().await.unwrap();

        pool.return_connection(a).await;
        pool.return_connection(b.clone()).await;
        assert_eq!(pool.idle_connections().await, 1);
        assert!(!b.is_connected());
    }

    #[tokio::test]
    async fn socket_failed_connection_is_destroyed_on_return() {
        let (pool, _grid) = new_pool(pool_config(2, 2)).await;
        let (conn, _) = pool.get().await.unwrap();
        conn.mark_socket_failed();
        pool.return_connection(conn).await;
        assert_eq!(pool.open_connections().await, 0);
    }

    #[tokio::test]
    async fn expired_idle_connection_is_skipped_at_get() {
        let config = PoolConfig {
            lifespan: Duration::ZERO,
            ..pool_config(2, 2)
        };
        let grid = MockGrid::new();
        let pool = ConnectionPool::new(
            Arc::new(crate::mock::test_account()),
            Arc::new(grid.connector()),
            config,
            Arc::new(Metrics::default()),
        )
        .await
        .unwrap();

        let (first, _) = pool.get().await.unwrap();
        let first_id = first.id();
        pool.return_connection(first).await;

        // expired immediately with a zero lifespan, so get creates a new one
        let (second, is_new) = pool.get().await.unwrap();
        assert!(is_new);
        assert_ne!(second.id(), first_id);
    }

    #[tokio::test]
    async fn counts_and_release() {
        let (pool, _grid) = new_pool(pool_config(3, 3)).await;
        assert_eq!(pool.available_connections().await, 3);

        let (a, _) = pool.get().await.unwrap();
        assert_eq!(pool.available_connections().await, 2);
        assert_eq!(pool.open_connections().await, 1);

        pool.return_connection(a).await;
        assert_eq!(pool.available_connections().await, 3);
        assert_eq!(pool.open_connections().await, 1);

        pool.release().await;
        assert_eq!(pool.open_connections().await, 0);
        assert_eq!(pool.available_connections().await, 3);
    }
}
