//! Resource data blobs.
//!
//! This module handles the payload side of an archive:
//! - Read-only bundled data (`.arcd`), mapped or read through a file handle
//! - The append-only live-update blob and its resource writer
//!
//! Each store is backed by exactly one of a memory map or a file handle,
//! chosen at open time.

pub mod writer;

pub use writer::{LiveUpdateData, WriteResult};

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;
use tracing::debug;

use crate::config::LoadMode;
use crate::{ArchiveError, Result};

/// Backing of a read-only blob.
enum DataBacking {
    Mapped(Mmap),
    File(Mutex<File>),
}

/// Read-only resource data blob of the bundled archive.
pub struct ResourceData {
    path: PathBuf,
    len: u64,
    backing: DataBacking,
}

impl ResourceData {
    /// Open a bundled data blob.
    ///
    /// Empty files are always read through the file handle since they
    /// cannot be mapped.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the file cannot be opened or mapped.
    pub fn open(path: &Path, mode: LoadMode) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();

        let backing = match mode {
            LoadMode::Mapped if len > 0 => {
                #[allow(unsafe_code)]
                let map = unsafe { MmapOptions::new().map(&file)? };
                DataBacking::Mapped(map)
            }
            _ => DataBacking::File(Mutex::new(file)),
        };

        debug!("Opened resource data {} ({} bytes)", path.display(), len);
        Ok(Self {
            path: path.to_path_buf(),
            len,
            backing,
        })
    }

    /// Read `size` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::CorruptIndex` if the range lies outside the
    /// blob and `ArchiveError::Io` if the read fails.
    pub fn read(&self, offset: u32, size: u32) -> Result<Vec<u8>> {
        let range = checked_range(offset, size, self.len, &self.path)?;
        match &self.backing {
            DataBacking::Mapped(map) => Ok(map[range].to_vec()),
            DataBacking::File(file) => read_from_file(&mut file.lock(), offset, size),
        }
    }

    /// Blob length in bytes
    pub const fn len(&self) -> u64 {
        self.len
    }

    /// Whether the blob is empty
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether the blob is memory mapped
    pub const fn is_mapped(&self) -> bool {
        matches!(self.backing, DataBacking::Mapped(_))
    }

    /// Path of the blob
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for ResourceData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceData")
            .field("path", &self.path)
            .field("len", &self.len)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Byte range `offset..offset + size`, checked against the blob length.
pub(crate) fn checked_range(
    offset: u32,
    size: u32,
    len: u64,
    path: &Path,
) -> Result<std::ops::Range<usize>> {
    let end = u64::from(offset) + u64::from(size);
    if end > len {
        return Err(ArchiveError::CorruptIndex(format!(
            "entry range {offset}+{size} outside {} ({len} bytes)",
            path.display()
        )));
    }
    Ok(offset as usize..end as usize)
}

pub(crate) fn read_from_file(file: &mut File, offset: u32, size: u32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; size as usize];
    file.seek(SeekFrom::Start(u64::from(offset)))?;
    file.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_both_backings() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("game.arcd");
        std::fs::write(&path, b"0123456789").expect("write");

        for mode in [LoadMode::Mapped, LoadMode::File] {
            let data = ResourceData::open(&path, mode).expect("open");
            assert_eq!(data.is_mapped(), mode == LoadMode::Mapped);
            assert_eq!(data.len(), 10);
            assert_eq!(data.read(2, 3).expect("read"), b"234");
            assert_eq!(data.read(10, 0).expect("empty read"), b"");
            assert!(matches!(
                data.read(8, 3),
                Err(ArchiveError::CorruptIndex(_))
            ));
        }
    }

    #[test]
    fn test_empty_blob_uses_file_handle() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("game.arcd");
        std::fs::write(&path, b"").expect("write");

        let data = ResourceData::open(&path, LoadMode::Mapped).expect("open");
        assert!(!data.is_mapped());
        assert!(data.is_empty());
    }

    #[test]
    fn test_missing_blob_is_io_error() {
        let temp = TempDir::new().expect("temp dir");
        let err = ResourceData::open(&temp.path().join("missing.arcd"), LoadMode::File)
            .expect_err("missing");
        assert!(matches!(err, ArchiveError::Io(_)));
    }
}
