/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

pub(crate) mod file_util;
pub(crate) mod journal;

use std::path::{Path, PathBuf};

/// Path of the resume journal kept alongside a download target.
///
/// Its presence signals a potentially resumable transfer for that target.
/// The journal format itself is private to this crate.
pub fn resume_journal_path(target: &Path) -> PathBuf {
    journal::journal_path(target)
}
