/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! iRODS Transfer Manager
//!
//! A client-side session and transfer engine for iRODS-style data grids:
//! a bounded, shareable connection pool, a session layer with transaction
//! hygiene, and parallel chunked upload/download with per-task retry and
//! resumable downloads.
//!
//! The wire protocol (framing, authentication) is intentionally not part of
//! this crate. Applications supply a [`protocol::Connector`] that produces
//! authenticated [`protocol::Wire`] channels; everything above that seam —
//! pooling, sharing, partitioning, retry, resume — lives here. The
//! [`mock`] module provides an in-process grid for tests.

#![warn(
    missing_debug_implementations,
    missing_docs,
    rustdoc::missing_crate_level_docs,
    unreachable_pub,
    rust_2018_idioms
)]

pub(crate) const MEBIBYTE: u64 = 1024 * 1024;

/// Block size used by every transfer path when streaming a data object.
pub(crate) const TRANSFER_BLOCK_SIZE: usize = MEBIBYTE as usize;

/// Error types emitted by `irods-transfer-manager`
pub mod error;

/// Common types used by `irods-transfer-manager`
pub mod types;

/// Account identity for a data grid server
pub mod account;

/// Session configuration
pub mod config;

/// Wire-protocol seam: request/response model and connector traits
pub mod protocol;

/// A single authenticated connection
pub mod connection;

/// Bounded connection pool
pub mod pool;

/// Session layer: connection sharing and transaction hygiene
pub mod session;

/// Data-object I/O primitives
pub mod object;

/// Counters updated by the core
pub mod metrics;

/// Types and helpers for local I/O
pub mod io;

/// Transfer manager client
pub mod client;

/// Transfer operations
pub mod operation;

/// In-process mock grid for tests. Not for production use.
pub mod mock;

pub use client::Client;
pub use config::Config;
