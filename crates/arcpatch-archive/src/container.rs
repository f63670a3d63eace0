//! Archive containers: an index snapshot bound to its resource data.
//!
//! A container publishes one index at a time. Readers clone the current
//! `Arc` snapshot and keep using it for as long as they like; supersession
//! swaps in a patched index and bumps the generation counter. The previous
//! index is released when its last snapshot drops.
//!
//! Bundled containers hold only the read-only bundled blob. Live-update
//! containers share the same bundled blob and add the append-only
//! live-update blob.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::config::ArchiveConfig;
use crate::entry::{EntryFlags, EntryRecord, PatchMeta};
use crate::index::{ArchiveIndex, find, insertion_index};
use crate::storage::{LiveUpdateData, ResourceData, WriteResult};
use crate::{ArchiveError, Result};

/// Currently published index and its generation.
struct Published {
    index: Arc<ArchiveIndex>,
    generation: u64,
}

/// Index snapshot bound to the bundled blob and an optional live-update blob.
pub struct ArchiveContainer {
    published: RwLock<Published>,
    bundled_data: Arc<ResourceData>,
    live_update_data: Option<Arc<LiveUpdateData>>,
}

impl ArchiveContainer {
    /// Open the bundled index and data named by `config`.
    ///
    /// # Errors
    ///
    /// Returns any load error of the index or the data blob; the container
    /// is not usable in a degraded state.
    pub fn open_bundled(config: &ArchiveConfig) -> Result<Self> {
        let index = ArchiveIndex::load(
            &config.index_path(),
            config.index_mode,
            config.verify_digest,
        )?;
        let data = ResourceData::open(&config.data_path(), config.data_mode)?;

        info!(
            "Opened bundled archive {} with {} entries",
            config.index_path().display(),
            index.entry_count()
        );
        Ok(Self::from_parts(Arc::new(index), Arc::new(data), None))
    }

    /// Bind an index to its resource data
    pub fn from_parts(
        index: Arc<ArchiveIndex>,
        bundled_data: Arc<ResourceData>,
        live_update_data: Option<Arc<LiveUpdateData>>,
    ) -> Self {
        Self {
            published: RwLock::new(Published {
                index,
                generation: 0,
            }),
            bundled_data,
            live_update_data,
        }
    }

    /// Current index snapshot
    pub fn snapshot(&self) -> Arc<ArchiveIndex> {
        Arc::clone(&self.published.read().index)
    }

    /// Number of supersessions since the container was created
    pub fn generation(&self) -> u64 {
        self.published.read().generation
    }

    /// Snapshot and generation read under one lock
    pub fn snapshot_with_generation(&self) -> (Arc<ArchiveIndex>, u64) {
        let published = self.published.read();
        (Arc::clone(&published.index), published.generation)
    }

    /// Publish `index` in place of the current snapshot.
    ///
    /// Returns the new generation. Readers holding the previous snapshot
    /// are unaffected.
    pub fn supersede(&self, index: Arc<ArchiveIndex>) -> u64 {
        let mut published = self.published.write();
        let entries = index.entry_count();
        let previous = std::mem::replace(&mut published.index, index);
        published.generation += 1;

        info!(
            "Superseded index generation {} ({} -> {} entries)",
            published.generation,
            previous.entry_count(),
            entries
        );
        published.generation
    }

    /// Position at which `hash` sorts into the current snapshot.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::AlreadyExists` if the hash is present.
    pub fn insertion_index(&self, hash: &[u8]) -> Result<usize> {
        insertion_index(self.snapshot().as_ref(), hash)
    }

    /// Entry record for `hash` in the current snapshot
    pub fn find(&self, hash: &[u8]) -> Option<EntryRecord> {
        let index = self.snapshot();
        find(index.as_ref(), hash).and_then(|i| index.entry_at(i))
    }

    /// Append a payload to the live-update blob.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Config` if the container has no live-update
    /// blob, plus the errors of [`LiveUpdateData::write_resource`].
    pub fn write_resource(&self, bytes: &[u8]) -> Result<WriteResult> {
        self.live_update()?.write_resource(bytes)
    }

    /// Append `payload` and insert its record into `target` at `at`.
    ///
    /// The payload is written before the slot is opened, so the inserted
    /// record always points at durable bytes. The record carries the
    /// encoding flags of `meta` plus [`EntryFlags::LIVE_UPDATE`].
    ///
    /// # Errors
    ///
    /// Slot and payload checks run before anything is written:
    ///
    /// - the errors of [`ArchiveIndex::check_insert`] if `at` is not a free
    ///   sort position for `hash`
    /// - `ArchiveError::Codec` if a raw payload's length disagrees with
    ///   `meta.uncompressed_size` or a compressed payload is empty
    /// - the errors of [`ArchiveContainer::write_resource`] and
    ///   [`ArchiveIndex::shift_and_insert`]
    pub fn shift_and_insert(
        &self,
        target: &mut ArchiveIndex,
        at: usize,
        hash: &[u8],
        payload: &[u8],
        meta: PatchMeta,
    ) -> Result<EntryRecord> {
        target.check_insert(at, hash)?;
        let flags = meta.encoding_flags();
        let compressed = flags.contains(EntryFlags::COMPRESSED);
        if compressed && payload.is_empty() {
            return Err(ArchiveError::Codec("compressed payload is empty".to_string()));
        }
        if !compressed && payload.len() != meta.uncompressed_size as usize {
            return Err(ArchiveError::Codec(format!(
                "raw payload of {} bytes declares {} bytes",
                payload.len(),
                meta.uncompressed_size
            )));
        }

        let written = self.write_resource(payload)?;
        let entry = EntryRecord::new(
            written.offset,
            if compressed { written.bytes_written } else { 0 },
            meta.uncompressed_size,
            flags | EntryFlags::LIVE_UPDATE,
        );
        target.shift_and_insert(at, hash, entry)?;
        debug!(
            "Inserted live-update entry at {} (offset {}, {} bytes)",
            at, written.offset, written.bytes_written
        );
        Ok(entry)
    }

    /// Read the stored payload bytes of `entry` from the blob it names.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::CorruptIndex` if the entry points at a missing
    /// blob or outside a blob, and `ArchiveError::Io` if the read fails.
    pub fn read_entry(&self, entry: &EntryRecord) -> Result<Vec<u8>> {
        if entry.is_live_update() {
            let data = self.live_update_data.as_ref().ok_or_else(|| {
                ArchiveError::CorruptIndex(
                    "live-update entry in a container without live-update data".to_string(),
                )
            })?;
            data.read(entry.data_offset, entry.stored_size())
        } else {
            self.bundled_data.read(entry.data_offset, entry.stored_size())
        }
    }

    /// Number of entries in the current snapshot
    pub fn entry_count(&self) -> usize {
        self.published.read().index.entry_count()
    }

    /// Entry section offset of the current snapshot
    pub fn entry_section_offset(&self) -> u32 {
        self.published.read().index.entry_section_offset()
    }

    /// Hash length of the current snapshot
    pub fn hash_length(&self) -> usize {
        self.published.read().index.hash_length()
    }

    /// Shared bundled blob
    pub fn bundled_data(&self) -> &Arc<ResourceData> {
        &self.bundled_data
    }

    /// Live-update blob, if this container has one
    pub fn live_update_data(&self) -> Option<&Arc<LiveUpdateData>> {
        self.live_update_data.as_ref()
    }

    fn live_update(&self) -> Result<&LiveUpdateData> {
        self.live_update_data
            .as_deref()
            .ok_or_else(|| ArchiveError::Config("container has no live-update data".to_string()))
    }
}

impl std::fmt::Debug for ArchiveContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let published = self.published.read();
        f.debug_struct("ArchiveContainer")
            .field("entries", &published.index.entry_count())
            .field("generation", &published.generation)
            .field("bundled_data", &self.bundled_data)
            .field("live_update_data", &self.live_update_data)
            .finish()
    }
}
