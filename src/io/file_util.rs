/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

//! Positional local-file helpers, run under `spawn_blocking`.

#[cfg(unix)]
pub(crate) use unix::{read_file_chunk_sync, write_file_chunk_sync};
#[cfg(windows)]
pub(crate) use windows::{read_file_chunk_sync, write_file_chunk_sync};

#[cfg(unix)]
mod unix {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::unix::fs::FileExt;
    use std::path::Path;

    pub(crate) fn read_file_chunk_sync(
        dst: &mut [u8],
        path: impl AsRef<Path>,
        offset: u64,
    ) -> Result<(), io::Error> {
        let file = File::open(path)?;
        file.read_exact_at(dst, offset)
    }

    pub(crate) fn write_file_chunk_sync(
        src: &[u8],
        path: impl AsRef<Path>,
        offset: u64,
    ) -> Result<(), io::Error> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.write_all_at(src, offset)
    }
}

#[cfg(windows)]
mod windows {
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::path::Path;

    pub(crate) fn read_file_chunk_sync(
        dst: &mut [u8],
        path: impl AsRef<Path>,
        offset: u64,
    ) -> Result<(), io::Error> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(dst)
    }

    pub(crate) fn write_file_chunk_sync(
        src: &[u8],
        path: impl AsRef<Path>,
        offset: u64,
    ) -> Result<(), io::Error> {
        let mut file = OpenOptions::new().write(true).open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn positional_read_and_write() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();

        write_file_chunk_sync(b"abc", tmp.path(), 4).unwrap();

        let mut buf = [0u8; 5];
        read_file_chunk_sync(&mut buf, tmp.path(), 3).unwrap();
        assert_eq!(&buf, b"3abc7");
    }
}
