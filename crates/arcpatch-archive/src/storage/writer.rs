//! Append-only live-update blob and the resource writer.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{checked_range, read_from_file};
use crate::config::LoadMode;
use crate::{ArchiveError, Result};

/// Outcome of appending one payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteResult {
    /// Offset of the first payload byte in the blob
    pub offset: u32,
    /// Number of bytes appended
    pub bytes_written: u32,
}

/// Backing of the live-update blob.
///
/// A store uses exactly one of the two variants for its whole lifetime.
enum WriterBacking {
    /// Mapped read-write; `map` is `None` while the file is empty
    Mapped {
        file: File,
        map: Option<MmapMut>,
        len: u64,
    },
    /// Plain file handle
    File { file: File, len: u64 },
}

impl WriterBacking {
    const fn len(&self) -> u64 {
        match self {
            Self::Mapped { len, .. } | Self::File { len, .. } => *len,
        }
    }
}

/// Live-update resource data blob.
///
/// Appends and reads are serialized by an internal lock. Bytes already
/// referenced by an index are never rewritten.
pub struct LiveUpdateData {
    path: PathBuf,
    backing: Mutex<WriterBacking>,
}

impl LiveUpdateData {
    /// Open the blob at `path`, creating it empty if missing.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the file cannot be opened or mapped.
    pub fn open_or_create(path: &Path, mode: LoadMode) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();

        let backing = match mode {
            LoadMode::Mapped => {
                let map = if len > 0 {
                    #[allow(unsafe_code)]
                    let map = unsafe { MmapOptions::new().map_mut(&file)? };
                    Some(map)
                } else {
                    None
                };
                WriterBacking::Mapped { file, map, len }
            }
            LoadMode::File => WriterBacking::File { file, len },
        };

        debug!(
            "Opened live-update data {} ({} bytes, {:?})",
            path.display(),
            len,
            mode
        );
        Ok(Self {
            path: path.to_path_buf(),
            backing: Mutex::new(backing),
        })
    }

    /// Append `bytes` to the end of the blob.
    ///
    /// On failure the tracked end is not advanced and any growth of the file
    /// is rolled back, so no index record can reference the failed write.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::ResourceTooLarge` if the blob would outgrow
    /// 32-bit offsets and `ArchiveError::Io` if the write fails.
    pub fn write_resource(&self, bytes: &[u8]) -> Result<WriteResult> {
        let mut backing = self.backing.lock();
        let start = backing.len();
        let new_len = start + bytes.len() as u64;
        if new_len > u64::from(u32::MAX) {
            return Err(ArchiveError::ResourceTooLarge(format!(
                "appending {} bytes at {start} exceeds 32-bit offsets",
                bytes.len()
            )));
        }
        let result = WriteResult {
            offset: start as u32,
            bytes_written: bytes.len() as u32,
        };
        if bytes.is_empty() {
            return Ok(result);
        }

        let outcome = match &mut *backing {
            WriterBacking::Mapped { file, map, len } => {
                append_mapped(file, start, bytes).map(|remapped| {
                    *map = Some(remapped);
                    *len = new_len;
                })
            }
            WriterBacking::File { file, len } => {
                append_file(file, start, bytes).map(|()| *len = new_len)
            }
        };

        if let Err(e) = outcome {
            warn!(
                "Failed to append {} bytes to {}: {}",
                bytes.len(),
                self.path.display(),
                e
            );
            return Err(e.into());
        }

        debug!(
            "Appended {} bytes at offset {} to {}",
            result.bytes_written,
            result.offset,
            self.path.display()
        );
        Ok(result)
    }

    /// Read `size` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::CorruptIndex` if the range lies outside the
    /// blob and `ArchiveError::Io` if the read fails.
    pub fn read(&self, offset: u32, size: u32) -> Result<Vec<u8>> {
        let mut backing = self.backing.lock();
        let range = checked_range(offset, size, backing.len(), &self.path)?;
        match &mut *backing {
            WriterBacking::Mapped { map: Some(map), .. } => Ok(map[range].to_vec()),
            WriterBacking::Mapped { map: None, .. } => Ok(Vec::new()),
            WriterBacking::File { file, .. } => read_from_file(file, offset, size),
        }
    }

    /// Current blob length in bytes
    pub fn len(&self) -> u64 {
        self.backing.lock().len()
    }

    /// Whether nothing has been appended yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the blob is memory mapped
    pub fn is_mapped(&self) -> bool {
        matches!(*self.backing.lock(), WriterBacking::Mapped { .. })
    }

    /// Path of the blob
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for LiveUpdateData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveUpdateData")
            .field("path", &self.path)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Grow the file, remap it and copy `bytes` to `start`.
///
/// The file is truncated back to `start` if any step fails.
fn append_mapped(file: &File, start: u64, bytes: &[u8]) -> std::io::Result<MmapMut> {
    file.set_len(start + bytes.len() as u64)?;
    match map_and_copy(file, start as usize, bytes) {
        Ok(map) => Ok(map),
        Err(e) => {
            if let Err(rollback) = file.set_len(start) {
                warn!("Failed to roll back blob growth to {start}: {rollback}");
            }
            Err(e)
        }
    }
}

fn map_and_copy(file: &File, start: usize, bytes: &[u8]) -> std::io::Result<MmapMut> {
    #[allow(unsafe_code)]
    let mut map = unsafe { MmapOptions::new().map_mut(file)? };
    map[start..start + bytes.len()].copy_from_slice(bytes);
    map.flush_range(start, bytes.len())?;
    Ok(map)
}

/// Write `bytes` at `start` through the file handle and sync.
fn append_file(file: &mut File, start: u64, bytes: &[u8]) -> std::io::Result<()> {
    let written = file
        .seek(SeekFrom::Start(start))
        .and_then(|_| file.write_all(bytes))
        .and_then(|()| file.flush())
        .and_then(|()| file.sync_data());
    if written.is_err() {
        if let Err(rollback) = file.set_len(start) {
            warn!("Failed to roll back partial write at {start}: {rollback}");
        }
    }
    written
}
