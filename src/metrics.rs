/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated by the session, pool, and transfer engine.
///
/// Emission (export, aggregation) is the caller's concern; the core only
/// increments. All counters are monotonically increasing.
#[derive(Debug, Default)]
pub struct Metrics {
    connections_opened: AtomicU64,
    connections_closed: AtomicU64,
    pool_failures: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    transfer_failures: AtomicU64,
}

impl Metrics {
    pub(crate) fn add_connections_opened(&self, n: u64) {
        self.connections_opened.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_connections_closed(&self, n: u64) {
        self.connections_closed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_pool_failures(&self, n: u64) {
        self.pool_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_transfer_failures(&self, n: u64) {
        self.transfer_failures.fetch_add(n, Ordering::Relaxed);
    }

    /// Total connections ever opened (pooled and unmanaged)
    pub fn connections_opened(&self) -> u64 {
        self.connections_opened.load(Ordering::Relaxed)
    }

    /// Total connections destroyed
    pub fn connections_closed(&self) -> u64 {
        self.connections_closed.load(Ordering::Relaxed)
    }

    /// Times the session could produce no connection at all
    pub fn pool_failures(&self) -> u64 {
        self.pool_failures.load(Ordering::Relaxed)
    }

    /// Payload bytes written to the grid
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Payload bytes read from the grid
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    /// Transfers that returned an error
    pub fn transfer_failures(&self) -> u64 {
        self.transfer_failures.load(Ordering::Relaxed)
    }
}
