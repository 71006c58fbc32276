/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use core::fmt;
use std::sync::Arc;

use crate::MEBIBYTE;

/// The number of worker tasks to use for a single parallel transfer.
#[derive(Debug, Clone, Default)]
pub enum TaskCount {
    /// Derive the task count from the object size.
    #[default]
    Auto,

    /// Explicitly configured task count.
    ///
    /// NOTE: This is a suggestion and may be adjusted for an individual
    /// request (downloads are capped by the session's `connection_max_number`,
    /// and a resumed download keeps the partitioning recorded in its journal).
    Explicit(usize),
}

impl TaskCount {
    /// Resolve to a concrete task count for an object of `object_length` bytes.
    pub(crate) fn resolve(&self, object_length: u64) -> usize {
        match self {
            TaskCount::Auto => auto_task_count(object_length),
            TaskCount::Explicit(n) if *n > 0 => *n,
            TaskCount::Explicit(_) => auto_task_count(object_length),
        }
    }
}

/// Deterministic size → task-count schedule, monotonically non-decreasing.
pub(crate) fn auto_task_count(object_length: u64) -> usize {
    match object_length {
        n if n < 32 * MEBIBYTE => 1,
        n if n < 128 * MEBIBYTE => 2,
        n if n < 512 * MEBIBYTE => 3,
        _ => 4,
    }
}

/// Progress notification for a transfer.
///
/// Invoked as `(processed_total, grand_total)`. The callback must tolerate
/// concurrent invocation from multiple workers and should return quickly; it
/// is best-effort. During retries a worker re-reads from its last good
/// offset, so consumers wanting a monotonic display must track the maximum
/// themselves.
#[derive(Clone)]
pub struct ProgressCallback {
    pub(crate) inner: Arc<dyn Fn(u64, u64) + Send + Sync + 'static>,
}

impl ProgressCallback {
    pub(crate) fn call(&self, processed: u64, total: u64) {
        (self.inner)(processed, total);
    }
}

impl fmt::Debug for ProgressCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut formatter = f.debug_struct("ProgressCallback");
        formatter.field("inner", &"<closure>");
        formatter.finish()
    }
}

impl<F> From<F> for ProgressCallback
where
    F: Fn(u64, u64) + Send + Sync + 'static,
{
    fn from(value: F) -> Self {
        ProgressCallback {
            inner: Arc::new(value),
        }
    }
}
