/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! On-disk per-task progress journal for resumable downloads.
//!
//! Layout: a header written exactly once at creation, followed by
//! fixed-size status entries appended after every successful chunk write.
//! Entries are keyed by task start-offset; on reopen the last entry per
//! offset wins and a truncated trailing entry is discarded. The format is
//! private to this crate.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::Error;

const MAGIC: [u8; 8] = *b"IRODSRSM";
const VERSION: u8 = 1;
const ENTRY_LEN: usize = 24;
const JOURNAL_SUFFIX: &str = "irodsresume";

/// Sidecar path for a download target: `.{file name}.irodsresume`.
pub(crate) fn journal_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!(".{name}.{JOURNAL_SUFFIX}"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct JournalHeader {
    object_path: String,
    object_length: u64,
    task_count: u32,
    chunk_size: u32,
}

/// Progress of one transfer task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct JournalEntry {
    /// Byte offset where the task's range starts
    pub(crate) start_offset: u64,
    /// Length of the task's range
    pub(crate) length: u64,
    /// Contiguous bytes completed from the start of the range
    pub(crate) completed_length: u64,
}

impl JournalEntry {
    fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut buf = [0u8; ENTRY_LEN];
        buf[0..8].copy_from_slice(&self.start_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.length.to_le_bytes());
        buf[16..24].copy_from_slice(&self.completed_length.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8; ENTRY_LEN]) -> Self {
        let u64_at = |at: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(bytes)
        };
        Self {
            start_offset: u64_at(0),
            length: u64_at(8),
            completed_length: u64_at(16),
        }
    }
}

/// A resume journal open for appending.
#[derive(Debug)]
pub(crate) struct ResumeJournal {
    path: PathBuf,
    header: JournalHeader,
    entries: HashMap<u64, JournalEntry>,
    writer: Mutex<File>,
}

impl ResumeJournal {
    /// Open the journal next to `target`, resuming a compatible existing one
    /// or starting fresh.
    ///
    /// An existing journal is honored only when its object path and length
    /// match; its task count then overrides `task_count`, so offsets
    /// computed on resume align with previously written bytes.
    pub(crate) fn open_or_create(
        target: &Path,
        object_path: &str,
        object_length: u64,
        task_count: usize,
        chunk_size: usize,
    ) -> Result<Self, Error> {
        let path = journal_path(target);

        if let Some((header, entries)) = read_journal(&path)? {
            if header.object_path == object_path && header.object_length == object_length {
                tracing::debug!(
                    journal = %path.display(),
                    tasks = header.task_count,
                    "resuming from existing journal"
                );
                let writer = OpenOptions::new().append(true).open(&path)?;
                return Ok(Self {
                    path,
                    header,
                    entries,
                    writer: Mutex::new(writer),
                });
            }
            tracing::debug!(
                journal = %path.display(),
                "existing journal does not match the transfer, starting fresh"
            );
        }

        let header = JournalHeader {
            object_path: object_path.to_owned(),
            object_length,
            task_count: task_count as u32,
            chunk_size: chunk_size as u32,
        };
        let mut writer = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        write_header(&mut writer, &header)?;
        writer.flush()?;
        Ok(Self {
            path,
            header,
            entries: HashMap::new(),
            writer: Mutex::new(writer),
        })
    }

    /// The partitioning this journal was created with.
    pub(crate) fn task_count(&self) -> usize {
        self.header.task_count as usize
    }

    /// Completed length recorded for the task starting at `start_offset`.
    pub(crate) fn completed(&self, start_offset: u64) -> Option<u64> {
        self.entries
            .get(&start_offset)
            .map(|entry| entry.completed_length)
    }

    /// Append a status entry and flush it to disk.
    pub(crate) fn append(&self, entry: JournalEntry) -> Result<(), Error> {
        let mut writer = self.writer.lock().unwrap_or_else(|err| err.into_inner());
        writer.write_all(&entry.encode())?;
        writer.flush()?;
        Ok(())
    }

    /// Close the journal and delete it from disk. For successful transfers.
    pub(crate) fn finish(self) -> Result<(), Error> {
        drop(self.writer);
        std::fs::remove_file(&self.path)?;
        Ok(())
    }

    /// Close the journal, leaving the file in place for a future resume.
    pub(crate) fn close(self) {
        drop(self.writer);
    }
}

fn write_header(writer: &mut File, header: &JournalHeader) -> Result<(), std::io::Error> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[VERSION])?;
    let path_bytes = header.object_path.as_bytes();
    writer.write_all(&(path_bytes.len() as u32).to_le_bytes())?;
    writer.write_all(path_bytes)?;
    writer.write_all(&header.object_length.to_le_bytes())?;
    writer.write_all(&header.task_count.to_le_bytes())?;
    writer.write_all(&header.chunk_size.to_le_bytes())?;
    Ok(())
}

/// Read a journal, returning `None` when the file is absent or malformed.
///
/// A truncated trailing entry is discarded; everything before it is kept.
fn read_journal(
    path: &Path,
) -> Result<Option<(JournalHeader, HashMap<u64, JournalEntry>)>, Error> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let mut data = Vec::new();
    file.read_to_end(&mut data)?;

    let header_fixed = MAGIC.len() + 1 + 4;
    if data.len() < header_fixed || data[..MAGIC.len()] != MAGIC || data[MAGIC.len()] != VERSION {
        return Ok(None);
    }
    let mut at = MAGIC.len() + 1;
    let path_len = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]) as usize;
    at += 4;
    if data.len() < at + path_len + 8 + 4 + 4 {
        return Ok(None);
    }
    let object_path = match std::str::from_utf8(&data[at..at + path_len]) {
        Ok(path) => path.to_owned(),
        Err(_) => return Ok(None),
    };
    at += path_len;
    let u64_at = |data: &[u8], at: usize| {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&data[at..at + 8]);
        u64::from_le_bytes(bytes)
    };
    let object_length = u64_at(&data, at);
    at += 8;
    let task_count = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    at += 4;
    let chunk_size = u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
    at += 4;

    let mut entries = HashMap::new();
    while at + ENTRY_LEN <= data.len() {
        let mut buf = [0u8; ENTRY_LEN];
        buf.copy_from_slice(&data[at..at + ENTRY_LEN]);
        let entry = JournalEntry::decode(&buf);
        entries.insert(entry.start_offset, entry);
        at += ENTRY_LEN;
    }

    Ok(Some((
        JournalHeader {
            object_path,
            object_length,
            task_count,
            chunk_size,
        },
        entries,
    )))
}
