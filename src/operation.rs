/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

/// Download operations
pub mod download;

/// Upload operations
pub mod upload;

use std::sync::Arc;

use crate::session::Session;

/// One worker's share of a parallel transfer: a contiguous byte range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TransferTask {
    pub(crate) id: usize,
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

/// Tile `[0, object_length)` into `task_count` contiguous ranges.
///
/// Every task covers `ceil(object_length / task_count)` bytes except the
/// last, which is clipped to the end of the object.
pub(crate) fn partition_tasks(object_length: u64, task_count: usize) -> Vec<TransferTask> {
    let task_count = task_count.max(1) as u64;
    let mut per_task = object_length / task_count;
    if object_length % task_count > 0 {
        per_task += 1;
    }

    let mut tasks = Vec::with_capacity(task_count as usize);
    let mut offset = 0u64;
    for id in 0..task_count {
        if offset >= object_length {
            break;
        }
        let length = per_task.min(object_length - offset);
        tasks.push(TransferTask {
            id: id as usize,
            offset,
            length,
        });
        offset += length;
    }
    tasks
}

/// Use the account's default resource when the caller supplied none.
pub(crate) fn resolve_resource(session: &Arc<Session>, resource: &Option<String>) -> String {
    match resource {
        Some(resource) if !resource.is_empty() => resource.clone(),
        _ => session.account().default_resource().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(object_length: u64, task_count: usize) {
        let tasks = partition_tasks(object_length, task_count);
        let mut expected_offset = 0u64;
        for (position, task) in tasks.iter().enumerate() {
            assert_eq!(task.id, position);
            assert_eq!(task.offset, expected_offset, "ranges must be contiguous");
            assert!(task.length > 0);
            expected_offset += task.length;
        }
        assert_eq!(expected_offset, object_length, "union must cover the object");
    }

    #[test]
    fn tiles_are_disjoint_and_cover_the_object() {
        assert_tiles(100, 4);
        assert_tiles(100, 3);
        assert_tiles(1, 4);
        assert_tiles(10 * 1024 * 1024, 3);
        assert_tiles(7, 7);
    }

    #[test]
    fn last_task_is_clipped() {
        let tasks = partition_tasks(10, 3);
        // ceil(10/3) = 4, so ranges are 4 + 4 + 2
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[2].offset, 8);
        assert_eq!(tasks[2].length, 2);
    }

    #[test]
    fn more_tasks_than_bytes_drops_empty_tails() {
        let tasks = partition_tasks(2, 8);
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].length, 1);
        assert_eq!(tasks[1].length, 1);
    }
}
