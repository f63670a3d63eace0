//! Bundled archive construction.
//!
//! Collects resources, sorts them by hash and writes the bundled data blob
//! followed by its index.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::info;

use crate::entry::{EntryFlags, EntryRecord};
use crate::hash::{ContentHash, MAX_HASH, hex_prefix, significant};
use crate::index::ArchiveIndex;
use crate::{ArchiveError, Result};

struct PendingResource {
    hash: ContentHash,
    payload: Vec<u8>,
    flags: EntryFlags,
    uncompressed_size: u32,
}

/// Builder for bundled archives.
pub struct ArchiveBuilder {
    hash_length: usize,
    resources: Vec<PendingResource>,
}

impl ArchiveBuilder {
    /// Create a builder for hashes of `hash_length` bytes.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidHash` if `hash_length` is outside
    /// `1..=MAX_HASH`.
    pub fn new(hash_length: usize) -> Result<Self> {
        if hash_length == 0 || hash_length > MAX_HASH {
            return Err(ArchiveError::InvalidHash(format!(
                "hash length {hash_length} outside 1..={MAX_HASH}"
            )));
        }
        Ok(Self {
            hash_length,
            resources: Vec::new(),
        })
    }

    /// Add a resource with its stored payload.
    ///
    /// `flags` describes the payload encoding; the live-update bit is
    /// ignored since bundled entries are never served from the overlay.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidHash` if `hash` is shorter than the hash
    /// length, and `ArchiveError::Codec` if a raw payload's length differs
    /// from `uncompressed_size` or a compressed payload is empty.
    pub fn add(
        &mut self,
        hash: &[u8],
        payload: &[u8],
        flags: EntryFlags,
        uncompressed_size: u32,
    ) -> Result<&mut Self> {
        let hash = ContentHash::from_slice(significant(hash, self.hash_length)?)?;
        let flags = flags.difference(EntryFlags::LIVE_UPDATE);
        let compressed = flags.contains(EntryFlags::COMPRESSED);
        if compressed && payload.is_empty() {
            return Err(ArchiveError::Codec(format!("compressed payload of {hash} is empty")));
        }
        if !compressed && payload.len() != uncompressed_size as usize {
            return Err(ArchiveError::Codec(format!(
                "raw payload of {} bytes declares {uncompressed_size} bytes",
                payload.len()
            )));
        }

        self.resources.push(PendingResource {
            hash,
            payload: payload.to_vec(),
            flags,
            uncompressed_size,
        });
        Ok(self)
    }

    /// Add an unencoded resource
    ///
    /// # Errors
    ///
    /// Same as [`ArchiveBuilder::add`], plus `ArchiveError::ResourceTooLarge`
    /// for payloads over 4 GiB.
    pub fn add_raw(&mut self, hash: &[u8], payload: &[u8]) -> Result<&mut Self> {
        let size = u32::try_from(payload.len()).map_err(|_| {
            ArchiveError::ResourceTooLarge(format!(
                "resource {} is {} bytes",
                hex_prefix(hash),
                payload.len()
            ))
        })?;
        self.add(hash, payload, EntryFlags::empty(), size)
    }

    /// Number of resources added so far
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether no resource has been added
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Write the data blob and the index, and return the index.
    ///
    /// # Errors
    ///
    /// - `ArchiveError::AlreadyExists` if two resources share a hash
    /// - `ArchiveError::ResourceTooLarge` if the blob outgrows 32-bit offsets
    /// - `ArchiveError::Io` if either file cannot be written
    pub fn build(mut self, index_path: &Path, data_path: &Path, user_tag: u64) -> Result<ArchiveIndex> {
        self.resources.sort_by_key(|r| r.hash);
        if let Some(pair) = self.resources.windows(2).find(|w| w[0].hash == w[1].hash) {
            return Err(ArchiveError::AlreadyExists(hex_prefix(pair[0].hash.as_bytes())));
        }

        let mut index = ArchiveIndex::new(self.hash_length, user_tag, self.resources.len())?;

        let file = File::create(data_path)?;
        let mut writer = BufWriter::new(&file);
        let mut offset: u64 = 0;
        for (i, resource) in self.resources.iter().enumerate() {
            let too_large = || {
                ArchiveError::ResourceTooLarge(format!(
                    "data blob exceeds 32-bit offsets at resource {}",
                    resource.hash
                ))
            };
            let data_offset = u32::try_from(offset).map_err(|_| too_large())?;
            let stored = u32::try_from(resource.payload.len()).map_err(|_| too_large())?;
            let compressed_size = if resource.flags.contains(EntryFlags::COMPRESSED) {
                stored
            } else {
                0
            };

            writer.write_all(&resource.payload)?;
            offset += u64::from(stored);

            let entry = EntryRecord::new(
                data_offset,
                compressed_size,
                resource.uncompressed_size,
                resource.flags,
            );
            index.shift_and_insert(i, resource.hash.as_bytes(), entry)?;
        }
        writer.flush()?;
        drop(writer);
        file.sync_all()?;

        index.save(index_path)?;
        info!(
            "Built archive {} with {} resources ({} data bytes)",
            index_path.display(),
            index.entry_count(),
            offset
        );
        Ok(index)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::codec::compress_zlib;
    use crate::config::LoadMode;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_build_sorts_and_lays_out_payloads() {
        let temp = TempDir::new().expect("temp dir");
        let index_path = temp.path().join("game.arci");
        let data_path = temp.path().join("game.arcd");

        let mut builder = ArchiveBuilder::new(4).expect("builder");
        builder.add_raw(b"cccc", b"third").expect("add");
        builder.add_raw(b"aaaa", b"first").expect("add");
        let packed = compress_zlib(b"second second second").expect("compress");
        builder
            .add(b"bbbb-extra", &packed, EntryFlags::COMPRESSED | EntryFlags::LIVE_UPDATE, 20)
            .expect("add");

        let index = builder.build(&index_path, &data_path, 42).expect("build");
        assert_eq!(index.hash_section(), b"aaaabbbbcccc");
        assert_eq!(index.user_tag(), 42);

        let second = index.lookup(b"bbbb").expect("bbbb");
        assert_eq!(second.data_offset, 5);
        assert_eq!(second.compressed_size as usize, packed.len());
        assert_eq!(second.flags, EntryFlags::COMPRESSED);

        let third = index.lookup(b"cccc").expect("cccc");
        assert_eq!(third.compressed_size, 0);
        assert_eq!(third.data_offset as usize, 5 + packed.len());

        let reloaded = ArchiveIndex::load(&index_path, LoadMode::File, true).expect("load");
        assert_eq!(reloaded.entry_section(), index.entry_section());
        assert_eq!(
            std::fs::metadata(&data_path).expect("blob").len() as usize,
            10 + packed.len()
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let temp = TempDir::new().expect("temp dir");
        let mut builder = ArchiveBuilder::new(4).expect("builder");
        builder.add_raw(b"aaaa1", b"x").expect("add");
        builder.add_raw(b"aaaa2", b"y").expect("add");

        let err = builder
            .build(&temp.path().join("i"), &temp.path().join("d"), 0)
            .expect_err("duplicate");
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
    }

    #[test]
    fn test_invalid_inputs() {
        assert!(ArchiveBuilder::new(0).is_err());

        let mut builder = ArchiveBuilder::new(4).expect("builder");
        assert!(matches!(
            builder.add_raw(b"abc", b"x"),
            Err(ArchiveError::InvalidHash(_))
        ));
        assert!(matches!(
            builder.add(b"abcd", b"xyz", EntryFlags::empty(), 4),
            Err(ArchiveError::Codec(_))
        ));
        assert!(matches!(
            builder.add(b"abcd", b"", EntryFlags::COMPRESSED, 10),
            Err(ArchiveError::Codec(_))
        ));
        assert!(builder.is_empty());
    }

    #[test]
    fn test_empty_archive() {
        let temp = TempDir::new().expect("temp dir");
        let index_path = temp.path().join("game.arci");
        let index = ArchiveBuilder::new(16)
            .expect("builder")
            .build(&index_path, &temp.path().join("game.arcd"), 0)
            .expect("build");

        assert_eq!(index.entry_count(), 0);
        let reloaded = ArchiveIndex::load(&index_path, LoadMode::Mapped, true).expect("load");
        assert_eq!(reloaded.entry_count(), 0);
    }
}
