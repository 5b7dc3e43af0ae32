#![forbid(unsafe_code)]

//! Random-access cache file.
//!
//! One [`RandomAccessFile`] exists per cached resource and is shared by every
//! request streaming that resource. All positional I/O goes through a single
//! file handle guarded by a mutex (single-writer discipline), so concurrent
//! writers cannot interleave seek/write pairs.

use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::error::{StorageError, StorageResult};

/// Lock-guarded positional reads and writes on a cache file.
#[derive(Debug)]
pub struct RandomAccessFile {
    file: Mutex<File>,
    path: PathBuf,
}

impl RandomAccessFile {
    /// Open (or create) the cache file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the file cannot be created or opened
    /// read-write. This is checked once, before any I/O.
    pub fn open<P: Into<PathBuf>>(path: P) -> StorageResult<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
        })
    }

    /// Write `data` at `offset`, extending the file if needed.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        trace!(offset, len = data.len(), "cache file write");
        Ok(())
    }

    /// Read up to `len` bytes starting at `offset`.
    ///
    /// Returns fewer bytes near EOF; an empty vec when `offset` is at or past
    /// the end.
    pub fn read_at(&self, offset: u64, len: u64) -> StorageResult<Vec<u8>> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        // Capacity hint only — capped so absurd lengths cannot pre-allocate.
        let mut buf = Vec::with_capacity(usize::try_from(len.min(1 << 20)).unwrap_or(0));
        (&*file).take(len).read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Read exactly `range.end - range.start` bytes.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidRange`] for inverted ranges; a short read near
    /// EOF surfaces as [`StorageError::Io`] with `UnexpectedEof`.
    pub fn read_exact_at(&self, range: std::ops::Range<u64>) -> StorageResult<Vec<u8>> {
        if range.start > range.end {
            return Err(StorageError::InvalidRange {
                start: range.start,
                end: range.end,
            });
        }
        let len = range.end - range.start;
        let buf = self.read_at(range.start, len)?;
        if (buf.len() as u64) < len {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!(
                    "short read: wanted {len} bytes at {}, got {}",
                    range.start,
                    buf.len()
                ),
            )));
        }
        Ok(buf)
    }

    /// Truncate or extend the file to `len` bytes.
    ///
    /// Called once the total content length is known, so later writes at
    /// arbitrary offsets land inside the allocated file.
    pub fn set_len(&self, len: u64) -> StorageResult<()> {
        self.file.lock().set_len(len)?;
        Ok(())
    }

    /// Flush buffered writes to disk.
    pub fn flush(&self) -> StorageResult<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Current on-disk length.
    pub fn len(&self) -> StorageResult<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn open_temp(dir: &TempDir) -> RandomAccessFile {
        RandomAccessFile::open(dir.path().join("cache.bin")).unwrap()
    }

    #[test]
    fn open_creates_file() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        assert_eq!(f.len().unwrap(), 0);
        assert!(f.path().exists());
    }

    #[test]
    fn open_in_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let result = RandomAccessFile::open(dir.path().join("no/such/dir/cache.bin"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        f.write_at(0, b"hello world").unwrap();
        assert_eq!(f.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(f.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn write_at_offset_extends_file() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        f.write_at(100, b"tail").unwrap();
        assert_eq!(f.len().unwrap(), 104);
        // The hole reads back as zeros.
        assert_eq!(f.read_at(98, 2).unwrap(), vec![0, 0]);
    }

    #[test]
    fn read_past_eof_is_short() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        f.write_at(0, b"abc").unwrap();
        assert_eq!(f.read_at(1, 10).unwrap(), b"bc");
        assert!(f.read_at(10, 5).unwrap().is_empty());
    }

    #[test]
    fn read_exact_at_rejects_short_read() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        f.write_at(0, b"abc").unwrap();
        assert!(f.read_exact_at(0..3).is_ok());
        assert!(matches!(
            f.read_exact_at(0..10),
            Err(StorageError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
        ));
    }

    #[test]
    fn read_exact_at_rejects_inverted_range() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        assert!(matches!(
            f.read_exact_at(10..5),
            Err(StorageError::InvalidRange { start: 10, end: 5 })
        ));
    }

    #[test]
    fn set_len_allocates_and_truncates() {
        let dir = TempDir::new().unwrap();
        let f = open_temp(&dir);
        f.set_len(1024).unwrap();
        assert_eq!(f.len().unwrap(), 1024);
        f.write_at(512, b"mid").unwrap();
        f.set_len(256).unwrap();
        assert_eq!(f.len().unwrap(), 256);
    }

    #[test]
    fn reopen_preserves_contents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cache.bin");
        {
            let f = RandomAccessFile::open(&path).unwrap();
            f.write_at(0, b"persisted").unwrap();
            f.flush().unwrap();
        }
        let f = RandomAccessFile::open(&path).unwrap();
        assert_eq!(f.read_at(0, 9).unwrap(), b"persisted");
    }
}
