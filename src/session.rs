/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::account::Account;
use crate::config::Config;
use crate::connection::Connection;
use crate::error::{self, Error, ErrorKind};
use crate::metrics::Metrics;
use crate::pool::{ConnectionPool, PoolConfig};
use crate::protocol::{Connector, ServerFeatures};

#[derive(Debug)]
struct SharedConnection {
    conn: Arc<Connection>,
    shares: usize,
}

#[derive(Debug, Default)]
struct SessionState {
    shared: HashMap<u64, SharedConnection>,
    transaction_reset_fails: bool,
}

/// Application-facing facade over the connection pool.
///
/// Adds connection *sharing* (a single connection may be handed to multiple
/// callers when the pool is exhausted; its exclusive lock serializes their
/// wire traffic), transaction hygiene (reused connections get a
/// transaction-reset before handout, or are replaced when the server rejects
/// the reset), and batch acquisition for parallel transfers. All bookkeeping
/// is guarded by a single internal mutex.
#[derive(Debug)]
pub struct Session {
    account: Arc<Account>,
    config: Config,
    connector: Arc<dyn Connector>,
    pool: ConnectionPool,
    metrics: Arc<Metrics>,
    start_new_transaction: bool,
    server_features: ServerFeatures,
    state: Mutex<SessionState>,
}

impl Session {
    /// Create a session, warm the pool, and probe server capabilities.
    ///
    /// Anonymous accounts cannot use transactions (no home collection to
    /// roll back into), so `start_new_transaction` is forced off for them.
    /// Otherwise, when transactions are enabled, the transaction-reset
    /// round-trip is probed once; servers that reject it flip the session
    /// into always-discard-on-reuse mode.
    pub async fn new(
        account: Account,
        config: Config,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, Error> {
        let account = Arc::new(account);
        let metrics = Arc::new(Metrics::default());

        let pool_config = PoolConfig {
            initial_cap: config.connection_init_number(),
            max_idle: config.connection_max_idle(),
            max_cap: config.connection_max(),
            lifespan: config.connection_lifespan(),
            idle_timeout: config.connection_idle_timeout(),
            operation_timeout: config.operation_timeout(),
        };
        let pool =
            ConnectionPool::new(account.clone(), connector.clone(), pool_config, metrics.clone())
                .await?;

        let mut start_new_transaction = config.start_new_transaction();
        let mut transaction_reset_fails = false;
        if account.is_anonymous() {
            start_new_transaction = false;
            transaction_reset_fails = true;
        }

        // one pooled connection serves both the capability probe and, when
        // transactions are enabled, the transaction-reset probe
        let (probe_conn, _) = match pool.get().await {
            Ok(got) => got,
            Err(err) => {
                pool.release().await;
                return Err(err);
            }
        };
        let server_features = probe_conn.features();

        if start_new_transaction {
            let reset = {
                let mut guard = probe_conn.lock().await;
                guard.reset_transaction().await
            };
            match reset {
                Ok(()) => pool.return_connection(probe_conn).await,
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        "transaction reset not supported by the server, \
                         reused connections will be discarded"
                    );
                    pool.discard(probe_conn).await;
                    transaction_reset_fails = true;
                }
            }
        } else {
            pool.return_connection(probe_conn).await;
        }

        Ok(Self {
            account,
            config,
            connector,
            pool,
            metrics,
            start_new_transaction,
            server_features,
            state: Mutex::new(SessionState {
                shared: HashMap::new(),
                transaction_reset_fails,
            }),
        })
    }

    /// The account this session authenticated as.
    pub fn account(&self) -> &Arc<Account> {
        &self.account
    }

    /// The session configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Counters updated by this session and its transfers.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Capabilities of the server this session is connected to.
    pub fn server_features(&self) -> ServerFeatures {
        self.server_features
    }

    /// Whether the server supports the replica-token parallel upload protocol.
    pub fn supports_parallel_upload(&self) -> bool {
        self.server_features.parallel_upload
    }

    /// Whether reused pooled connections get a transaction refresh.
    pub fn start_new_transaction(&self) -> bool {
        self.start_new_transaction
    }

    /// Whether the server has rejected the transaction-reset round-trip.
    ///
    /// Exposed for observability and tests; flips at most once, from `false`
    /// to `true`.
    pub async fn transaction_reset_fails(&self) -> bool {
        self.state.lock().await.transaction_reset_fails
    }

    /// Open connections currently managed by the pool.
    pub async fn open_connections(&self) -> usize {
        self.pool.open_connections().await
    }

    /// Number of distinct connections currently shared out to callers.
    pub async fn shared_connections(&self) -> usize {
        self.state.lock().await.shared.len()
    }

    /// Pull a connection from the pool and apply transaction hygiene.
    ///
    /// A reused (not newly created) connection carries the server-side
    /// transaction of its previous borrower; it is refreshed with a
    /// transaction-reset, or replaced with a fresh connection once the
    /// server is known to reject resets.
    async fn connection_from_pool(
        &self,
        state: &mut SessionState,
    ) -> Result<Arc<Connection>, Error> {
        let (conn, is_new) = self.pool.get().await?;
        if !self.start_new_transaction || is_new {
            return Ok(conn);
        }

        if state.transaction_reset_fails {
            // refresh is known to fail, always hand out a fresh connection
            self.pool.discard(conn).await;
            return self.pool.get_new().await;
        }

        let reset = {
            let mut guard = conn.lock().await;
            guard.reset_transaction().await
        };
        if let Err(err) = reset {
            tracing::warn!(
                connection = conn.id(),
                error = %err,
                "transaction reset failed, replacing the pooled connection"
            );
            self.pool.discard(conn).await;
            state.transaction_reset_fails = true;
            return self.pool.get_new().await;
        }
        Ok(conn)
    }

    fn record_share(state: &mut SessionState, conn: &Arc<Connection>) {
        let entry = state
            .shared
            .entry(conn.id())
            .or_insert_with(|| SharedConnection {
                conn: conn.clone(),
                shares: 0,
            });
        entry.shares += 1;
    }

    /// Acquire a connection, sharing an in-use one when the pool is exhausted.
    ///
    /// Fails with
    /// [`ErrorKind::NoConnectionAvailable`](crate::error::ErrorKind::NoConnectionAvailable)
    /// only when the pool can produce nothing and no connection is shared
    /// out either.
    pub async fn acquire_connection(&self) -> Result<Arc<Connection>, Error> {
        let mut state = self.state.lock().await;

        if self.pool.available_connections().await > 0 {
            match self.connection_from_pool(&mut state).await {
                Ok(conn) => {
                    Self::record_share(&mut state, &conn);
                    return Ok(conn);
                }
                Err(err) => {
                    if !matches!(err.kind(), ErrorKind::PoolFull) {
                        tracing::warn!(error = %err, "failed to get a connection from the pool");
                    }
                    // fall through to sharing
                }
            }
        }

        tracing::debug!("pool exhausted, sharing an in-use connection");
        let mut min_id = None;
        let mut min_shares = usize::MAX;
        for (id, shared) in state.shared.iter() {
            if !shared.conn.is_connected() {
                // a dead connection can never serve another borrower
                continue;
            }
            if shared.shares < min_shares {
                min_shares = shared.shares;
                min_id = Some(*id);
                if min_shares == 1 {
                    // can't be smaller
                    break;
                }
            }
        }

        if let Some(id) = min_id {
            if let Some(shared) = state.shared.get_mut(&id) {
                shared.shares += 1;
                return Ok(shared.conn.clone());
            }
        }

        self.metrics.add_pool_failures(1);
        Err(error::no_connection_available(
            "pool is exhausted and no connection is shared out",
        ))
    }

    /// Acquire up to `number` connections for a parallel transfer.
    ///
    /// Best-effort: the pool is drained first, then share counts are
    /// distributed round-robin over the in-use connections. The returned
    /// list is deduplicated by connection identity and may hold fewer
    /// distinct connections than requested; callers should map task *i* to
    /// `connections[i % connections.len()]` and return the connection once
    /// per task, which leaves every share count at zero.
    pub async fn acquire_connections_multi(
        &self,
        number: usize,
    ) -> Result<Vec<Arc<Connection>>, Error> {
        if number == 0 {
            return Ok(Vec::new());
        }

        let mut state = self.state.lock().await;
        let mut acquired: Vec<Arc<Connection>> = Vec::new();

        while acquired.len() < number && self.pool.available_connections().await > 0 {
            match self.connection_from_pool(&mut state).await {
                Ok(conn) => {
                    Self::record_share(&mut state, &conn);
                    acquired.push(conn);
                }
                Err(err) => {
                    if !matches!(err.kind(), ErrorKind::PoolFull) {
                        tracing::warn!(error = %err, "failed to get a connection from the pool");
                    }
                    break;
                }
            }
        }

        let from_pool = acquired.len();
        if from_pool < number {
            // top up with connections already shared out, most-idle first
            let mut extra_ids: Vec<u64> = state
                .shared
                .iter()
                .filter(|(_, shared)| shared.conn.is_connected())
                .map(|(id, _)| *id)
                .filter(|id| !acquired.iter().any(|conn| conn.id() == *id))
                .collect();
            extra_ids.sort_unstable();
            for id in extra_ids {
                if acquired.len() >= number {
                    break;
                }
                if let Some(shared) = state.shared.get(&id) {
                    acquired.push(shared.conn.clone());
                }
            }

            if acquired.is_empty() {
                self.metrics.add_pool_failures(1);
                return Err(error::no_connection_available(
                    "pool is exhausted and no connection is shared out",
                ));
            }

            // distribute the remaining share slots in list order so a caller
            // assigning task i to acquired[i % len] stays balanced
            for slot in from_pool..number {
                let conn = &acquired[slot % acquired.len()];
                if let Some(shared) = state.shared.get_mut(&conn.id()) {
                    shared.shares += 1;
                }
            }
        }

        Ok(acquired)
    }

    /// Create a connection outside the pool, for callers that must not share.
    ///
    /// Unmanaged connections bypass the pool caps; destroy them with
    /// [`discard_connection`](Self::discard_connection) when done.
    pub async fn acquire_unmanaged_connection(&self) -> Result<Arc<Connection>, Error> {
        let conn = Connection::connect(
            self.connector.as_ref(),
            self.account.clone(),
            self.config.operation_timeout(),
        )
        .await?;
        self.metrics.add_connections_opened(1);
        Ok(Arc::new(conn))
    }

    /// Give back one share of a connection.
    ///
    /// When the last share is returned the connection goes back to the pool,
    /// or is discarded when the session cannot refresh its server-side
    /// transaction. Unknown connections are a no-op.
    pub async fn return_connection(&self, conn: &Arc<Connection>) {
        let mut state = self.state.lock().await;

        let Some(shared) = state.shared.get_mut(&conn.id()) else {
            return;
        };
        shared.shares -= 1;
        if shared.shares > 0 {
            return;
        }

        let Some(shared) = state.shared.remove(&conn.id()) else {
            return;
        };
        if self.start_new_transaction && state.transaction_reset_fails {
            // the server-side transaction is stale and cannot be refreshed
            self.pool.discard(shared.conn).await;
        } else {
            self.pool.return_connection(shared.conn).await;
        }
    }

    /// Give back one share of a connection, destroying it at zero shares.
    ///
    /// An unknown connection is treated as unmanaged and disconnected
    /// directly.
    pub async fn discard_connection(&self, conn: &Arc<Connection>) {
        let mut state = self.state.lock().await;

        match state.shared.get_mut(&conn.id()) {
            Some(shared) => {
                shared.shares -= 1;
                if shared.shares == 0 {
                    if let Some(shared) = state.shared.remove(&conn.id()) {
                        self.pool.discard(shared.conn).await;
                    }
                }
            }
            None => {
                conn.disconnect().await;
                self.metrics.add_connections_closed(1);
            }
        }
    }

    /// Drop all share bookkeeping and release the pool.
    ///
    /// Callers still holding borrowed connections terminate independently;
    /// their connections are not disconnected here.
    pub async fn release(&self) {
        let mut state = self.state.lock().await;
        state.shared.clear();
        self.pool.release().await;
    }

    #[cfg(test)]
    pub(crate) async fn share_count(&self, conn: &Arc<Connection>) -> usize {
        self.state
            .lock()
            .await
            .shared
            .get(&conn.id())
            .map(|shared| shared.shares)
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{test_account, MockGrid};

    fn small_config(max_cap: usize) -> Config {
        Config::builder()
            .connection_init_number(0)
            .connection_max_idle(max_cap)
            .connection_max(max_cap)
            .build()
    }

    async fn new_session(config: Config) -> (Session, MockGrid) {
        let grid = MockGrid::new();
        let session = Session::new(test_account(), config, Arc::new(grid.connector()))
            .await
            .unwrap();
        (session, grid)
    }

    #[tokio::test]
    async fn oversubscribed_pool_shares_one_connection() {
        let (session, _grid) = new_session(small_config(1)).await;

        let first = session.acquire_connection().await.unwrap();
        assert_eq!(session.share_count(&first).await, 1);

        let second = session.acquire_connection().await.unwrap();
        assert_eq!(second.id(), first.id());
        assert_eq!(session.share_count(&first).await, 2);

        session.return_connection(&second).await;
        assert_eq!(session.share_count(&first).await, 1);
        session.return_connection(&first).await;

        assert_eq!(session.shared_connections().await, 0);
        assert_eq!(session.open_connections().await, 1);
    }

    #[tokio::test]
    async fn return_of_unknown_connection_is_a_noop() {
        let (session, _grid) = new_session(small_config(2)).await;
        let unmanaged = session.acquire_unmanaged_connection().await.unwrap();
        session.return_connection(&unmanaged).await;
        assert_eq!(session.shared_connections().await, 0);
        assert!(unmanaged.is_connected());

        session.discard_connection(&unmanaged).await;
        assert!(!unmanaged.is_connected());
    }

    #[tokio::test]
    async fn anonymous_account_disables_transactions() {
        let grid = MockGrid::new();
        let account = Account::builder()
            .host("mock.grid.invalid")
            .port(1247)
            .zone("tempZone")
            .username("rods")
            .client_username(crate::account::ANONYMOUS_USER)
            .build();
        let session = Session::new(account, small_config(2), Arc::new(grid.connector()))
            .await
            .unwrap();

        assert!(!session.start_new_transaction());
        assert!(session.transaction_reset_fails().await);
        // no reset round-trip must have been attempted
        assert_eq!(grid.counters().resets, 0);
    }

    #[tokio::test]
    async fn reset_probe_failure_latches_the_flag() {
        let grid = MockGrid::new();
        grid.set_reset_transaction_fails(true);
        let session = Session::new(
            test_account(),
            small_config(2),
            Arc::new(grid.connector()),
        )
        .await
        .unwrap();

        assert!(session.transaction_reset_fails().await);
        // the probe connection was discarded, not pooled
        assert_eq!(session.open_connections().await, 0);
    }

    #[tokio::test]
    async fn reused_connection_gets_transaction_reset() {
        let (session, grid) = new_session(small_config(2)).await;
        let resets_after_probe = grid.counters().resets;

        let conn = session.acquire_connection().await.unwrap();
        session.return_connection(&conn).await;

        // the pooled connection is reused, so it must be refreshed
        let again = session.acquire_connection().await.unwrap();
        assert_eq!(again.id(), conn.id());
        assert_eq!(grid.counters().resets, resets_after_probe + 1);
        session.return_connection(&again).await;
    }

    #[tokio::test]
    async fn reset_failure_mid_session_replaces_the_connection() {
        let (session, grid) = new_session(small_config(2)).await;

        let conn = session.acquire_connection().await.unwrap();
        let first_id = conn.id();
        session.return_connection(&conn).await;

        grid.set_reset_transaction_fails(true);
        let replacement = session.acquire_connection().await.unwrap();
        assert_ne!(replacement.id(), first_id);
        assert!(session.transaction_reset_fails().await);
        session.return_connection(&replacement).await;

        // with the flag latched, returned connections are discarded
        assert_eq!(session.open_connections().await, 0);
    }

    #[tokio::test]
    async fn multi_acquire_balances_share_counts() {
        let (session, _grid) = new_session(small_config(2)).await;

        let conns = session.acquire_connections_multi(5).await.unwrap();
        assert!(!conns.is_empty());
        assert!(conns.len() <= 2);

        let mut total_shares = 0;
        for conn in &conns {
            total_shares += session.share_count(conn).await;
        }
        assert_eq!(total_shares, 5);

        // the documented caller contract: task i returns conns[i % len]
        for task in 0..5 {
            session.return_connection(&conns[task % conns.len()]).await;
        }
        assert_eq!(session.shared_connections().await, 0);
    }

    #[tokio::test]
    async fn no_connection_available_when_pool_and_shares_are_empty() {
        let (session, grid) = new_session(small_config(1)).await;

        // drain the pool, then make the grid unreachable
        let conn = session.acquire_connection().await.unwrap();
        session.discard_connection(&conn).await;
        grid.set_connect_fails(true);

        let err = session.acquire_connection().await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NoConnectionAvailable);
        assert_eq!(session.metrics().pool_failures(), 1);

        let err = session.acquire_connections_multi(2).await.unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NoConnectionAvailable);
    }
}
