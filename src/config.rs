/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::time::Duration;

/// Configuration for a [`Client`](crate::client::Client) session.
#[derive(Debug, Clone)]
pub struct Config {
    application_name: String,
    connection_init_number: usize,
    connection_max_idle: usize,
    connection_max: usize,
    connection_lifespan: Duration,
    connection_idle_timeout: Duration,
    operation_timeout: Duration,
    start_new_transaction: bool,
    connection_max_number: usize,
}

impl Config {
    /// Create a new `Config` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Application name reported to the server at connect time
    pub fn application_name(&self) -> &str {
        &self.application_name
    }

    /// Number of connections the pool creates at startup
    pub fn connection_init_number(&self) -> usize {
        self.connection_init_number
    }

    /// Maximum number of idle connections kept in the pool
    pub fn connection_max_idle(&self) -> usize {
        self.connection_max_idle
    }

    /// Maximum number of open (idle + outstanding) pooled connections
    pub fn connection_max(&self) -> usize {
        self.connection_max
    }

    /// Age ceiling for a pooled connection
    pub fn connection_lifespan(&self) -> Duration {
        self.connection_lifespan
    }

    /// Idle time after which a pooled connection is considered stale
    pub fn connection_idle_timeout(&self) -> Duration {
        self.connection_idle_timeout
    }

    /// Timeout applied to every remote round-trip
    pub fn operation_timeout(&self) -> Duration {
        self.operation_timeout
    }

    /// Whether reused connections get a transaction refresh before handout
    pub fn start_new_transaction(&self) -> bool {
        self.start_new_transaction
    }

    /// Cap on the number of worker tasks for a parallel download
    pub fn connection_max_number(&self) -> usize {
        self.connection_max_number
    }
}

impl Default for Config {
    fn default() -> Self {
        Builder::default().build()
    }
}

/// Fluent style builder for [`Config`]
#[derive(Debug, Clone)]
pub struct Builder {
    application_name: String,
    connection_init_number: usize,
    connection_max_idle: usize,
    connection_max: usize,
    connection_lifespan: Duration,
    connection_idle_timeout: Duration,
    operation_timeout: Duration,
    start_new_transaction: bool,
    connection_max_number: usize,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            application_name: env!("CARGO_PKG_NAME").to_owned(),
            connection_init_number: 1,
            connection_max_idle: 4,
            connection_max: 10,
            connection_lifespan: Duration::from_secs(60 * 60),
            connection_idle_timeout: Duration::from_secs(5 * 60),
            operation_timeout: Duration::from_secs(5 * 60),
            start_new_transaction: true,
            connection_max_number: 8,
        }
    }
}

impl Builder {
    /// Set the application name reported to the server
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// Set the number of connections created at startup
    pub fn connection_init_number(mut self, n: usize) -> Self {
        self.connection_init_number = n;
        self
    }

    /// Set the maximum number of idle connections kept in the pool
    pub fn connection_max_idle(mut self, n: usize) -> Self {
        self.connection_max_idle = n;
        self
    }

    /// Set the maximum number of open pooled connections
    pub fn connection_max(mut self, n: usize) -> Self {
        self.connection_max = n;
        self
    }

    /// Set the age ceiling for a pooled connection
    pub fn connection_lifespan(mut self, lifespan: Duration) -> Self {
        self.connection_lifespan = lifespan;
        self
    }

    /// Set the idle timeout after which a pooled connection is discarded
    pub fn connection_idle_timeout(mut self, timeout: Duration) -> Self {
        self.connection_idle_timeout = timeout;
        self
    }

    /// Set the timeout applied to every remote round-trip.
    ///
    /// `Duration::ZERO` disables the timeout.
    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Set whether reused connections get a transaction refresh
    pub fn start_new_transaction(mut self, enabled: bool) -> Self {
        self.start_new_transaction = enabled;
        self
    }

    /// Set the cap on parallel download task count
    pub fn connection_max_number(mut self, n: usize) -> Self {
        self.connection_max_number = n;
        self
    }

    /// Consumes the builder and constructs a [`Config`]
    pub fn build(self) -> Config {
        Config {
            application_name: self.application_name,
            connection_init_number: self.connection_init_number,
            connection_max_idle: self.connection_max_idle,
            connection_max: self.connection_max,
            connection_lifespan: self.connection_lifespan,
            connection_idle_timeout: self.connection_idle_timeout,
            operation_timeout: self.operation_timeout,
            start_new_transaction: self.start_new_transaction,
            connection_max_number: self.connection_max_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.connection_init_number(), 1);
        assert_eq!(config.connection_max_idle(), 4);
        assert_eq!(config.connection_max(), 10);
        assert!(config.start_new_transaction());
        assert_eq!(config.connection_max_number(), 8);
    }

    #[test]
    fn builder_overrides() {
        let config = Config::builder()
            .application_name("tester")
            .connection_max(2)
            .connection_max_idle(1)
            .start_new_transaction(false)
            .operation_timeout(Duration::ZERO)
            .build();
        assert_eq!(config.application_name(), "tester");
        assert_eq!(config.connection_max(), 2);
        assert_eq!(config.connection_max_idle(), 1);
        assert!(!config.start_new_transaction());
        assert_eq!(config.operation_timeout(), Duration::ZERO);
    }
}
