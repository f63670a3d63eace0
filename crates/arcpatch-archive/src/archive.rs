//! Resource archive: bundled archive plus live-update overlay.
//!
//! Opening reads the bundled index and data from the configured directory
//! and, if present, the persisted live-update index and blob. Lookups
//! consult the live-update cache first and fall back to the bundled index.
//!
//! Patches run in sessions. A session clones the current live-update index
//! (or the bundled index for the first patch) with spare slots, appends
//! payloads to the live-update blob and inserts their records. Committing
//! saves the index atomically, publishes it as the new snapshot and
//! recomputes the overlay cache. Only one session runs at a time.

use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::codec::ResourceCodec;
use crate::config::ArchiveConfig;
use crate::container::ArchiveContainer;
use crate::entry::{EntryRecord, PatchMeta};
use crate::hash::{PackedHashes, hex_prefix};
use crate::index::{ArchiveIndex, find, insertion_index};
use crate::overlay::{LiveUpdateEntries, ResolvedEntry, Store, cache_live_update_entries};
use crate::storage::LiveUpdateData;
use crate::{ArchiveError, Result};

/// Bundled archive with an optional live-update overlay.
pub struct ResourceArchive {
    config: ArchiveConfig,
    bundled: ArchiveContainer,
    live_update: RwLock<Option<Arc<ArchiveContainer>>>,
    overlay: RwLock<Arc<LiveUpdateEntries>>,
    codec: ResourceCodec,
    writer: Mutex<()>,
}

impl ResourceArchive {
    /// Open the archive files named by `config`.
    ///
    /// A live-update index that is not a patched copy of the current bundled
    /// index (the bundled archive was rebuilt since) is rebased onto it and
    /// saved before use.
    ///
    /// # Errors
    ///
    /// Any failure to load or validate the bundled or live-update files is
    /// returned; there is no degraded mode.
    pub fn open(config: ArchiveConfig) -> Result<Self> {
        config.validate()?;
        let bundled = ArchiveContainer::open_bundled(&config)?;
        let mut overlay = LiveUpdateEntries::empty(bundled.hash_length());

        let index_path = config.live_update_index_path();
        let live_update = if index_path.exists() {
            let mut index =
                ArchiveIndex::load(&index_path, config.index_mode, config.verify_digest)?;
            let data = LiveUpdateData::open_or_create(
                &config.live_update_data_path(),
                config.live_update_mode,
            )?;
            check_live_update_bounds(&index, &data)?;

            let bundled_index = bundled.snapshot();
            if !derives_from(&bundled_index, &index)? {
                let rebased = rebase_onto(&bundled_index, &index)?;
                warn!(
                    "Live-update index {} was cloned from another bundled build, rebased {} entries",
                    index_path.display(),
                    rebased.carried
                );
                index = rebased.index;
                index.save(&index_path)?;
            }

            let container = ArchiveContainer::from_parts(
                Arc::new(index),
                Arc::clone(bundled.bundled_data()),
                Some(Arc::new(data)),
            );
            overlay = cache_live_update_entries(&bundled, &container)?;
            Some(Arc::new(container))
        } else {
            None
        };

        info!(
            "Opened resource archive {} ({} bundled, {} live-update entries)",
            config.base_path.display(),
            bundled.entry_count(),
            overlay.len()
        );
        Ok(Self {
            config,
            bundled,
            live_update: RwLock::new(live_update),
            overlay: RwLock::new(Arc::new(overlay)),
            codec: ResourceCodec::default(),
            writer: Mutex::new(()),
        })
    }

    /// Use `codec` to decode resources
    #[must_use]
    pub fn with_codec(mut self, codec: ResourceCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Resolve `hash` to the store serving it.
    ///
    /// Absence is the normal `None` outcome, not an error.
    pub fn find(&self, hash: &[u8]) -> Option<ResolvedEntry> {
        let overlay = Arc::clone(&self.overlay.read());
        overlay.resolve(hash).or_else(|| {
            self.bundled.find(hash).map(|entry| ResolvedEntry {
                store: Store::Bundled,
                entry,
            })
        })
    }

    /// Read and decode the resource stored under `hash`.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if the hash is absent, plus read
    /// and codec errors.
    pub fn read_resource(&self, hash: &[u8]) -> Result<Vec<u8>> {
        let resolved = self
            .find(hash)
            .ok_or_else(|| ArchiveError::NotFound(hex_prefix(hash)))?;

        let stored = match resolved.store {
            Store::Bundled => self.bundled.read_entry(&resolved.entry)?,
            Store::LiveUpdate => {
                let container = self.live_update_container().ok_or_else(|| {
                    ArchiveError::CorruptIndex("live-update entry without live-update archive".into())
                })?;
                container.read_entry(&resolved.entry)?
            }
        };

        debug!(
            "Read {} from {} store ({} stored bytes)",
            hex_prefix(hash),
            resolved.store,
            stored.len()
        );
        self.codec.materialize(&resolved.entry, stored)
    }

    /// Start a patch session with room for `expected` insertions.
    ///
    /// Blocks while another session is running. The session reserves at
    /// least `patch_reserve` slots and grows on its own if more arrive.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::AllocationFailure` if the index cannot be
    /// cloned and `ArchiveError::Io` if the live-update blob cannot be
    /// created.
    pub fn begin_patch(&self, expected: usize) -> Result<PatchSession<'_>> {
        let guard = self.writer.lock();
        let reserve = expected.max(self.config.patch_reserve);

        let (container, is_new) = match self.live_update_container() {
            Some(container) => (container, false),
            None => {
                let data = LiveUpdateData::open_or_create(
                    &self.config.live_update_data_path(),
                    self.config.live_update_mode,
                )?;
                let container = ArchiveContainer::from_parts(
                    self.bundled.snapshot(),
                    Arc::clone(self.bundled.bundled_data()),
                    Some(Arc::new(data)),
                );
                (Arc::new(container), true)
            }
        };
        let working = ArchiveIndex::from_copy(&container.snapshot(), reserve)?;

        debug!(
            "Began patch session ({} entries, {} spare slots, new live update: {})",
            working.entry_count(),
            reserve,
            is_new
        );
        Ok(PatchSession {
            archive: self,
            _guard: guard,
            container,
            working,
            is_new,
            inserted: 0,
            regrowths: 0,
        })
    }

    /// Patch a single resource.
    ///
    /// # Errors
    ///
    /// Same as [`PatchSession::insert`] and [`PatchSession::commit`].
    pub fn apply_patch(&self, hash: &[u8], meta: PatchMeta, payload: &[u8]) -> Result<EntryRecord> {
        let mut session = self.begin_patch(1)?;
        let entry = session.insert(hash, meta, payload)?;
        session.commit()?;
        Ok(entry)
    }

    /// Re-insert every live-update entry onto a fresh copy of the bundled
    /// index.
    ///
    /// Payloads are not rewritten. Live-update entries whose hash the
    /// bundled index now carries replace the bundled record. Returns the
    /// number of live-update entries carried over.
    ///
    /// # Errors
    ///
    /// Returns clone, insertion and save errors; the published live-update
    /// index is unchanged on error.
    pub fn rebase_live_update(&self) -> Result<usize> {
        let _guard = self.writer.lock();
        let Some(live) = self.live_update_container() else {
            return Ok(0);
        };

        let bundled_index = self.bundled.snapshot();
        let mut rebased = rebase_onto(&bundled_index, &live.snapshot())?;
        rebased.index.save(&self.config.live_update_index_path())?;
        let generation = live.supersede(Arc::new(rebased.index));
        self.refresh_overlay(&live)?;

        info!(
            "Rebased {} live-update entries onto {} bundled entries ({} shadowing), generation {}",
            rebased.carried,
            bundled_index.entry_count(),
            rebased.shadowed,
            generation
        );
        Ok(rebased.carried)
    }

    /// Number of entries visible through the archive
    pub fn entry_count(&self) -> usize {
        self.live_update_container()
            .map_or_else(|| self.bundled.entry_count(), |c| c.entry_count())
    }

    /// Serialized bytes of the authoritative index (live update if present).
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::ResourceTooLarge` if the index cannot be
    /// serialized.
    pub fn raw_index_bytes(&self) -> Result<Vec<u8>> {
        match self.live_update_container() {
            Some(container) => container.snapshot().to_bytes(),
            None => self.bundled.snapshot().to_bytes(),
        }
    }

    /// Live-update generation (0 before the first patch)
    pub fn generation(&self) -> u64 {
        self.live_update_container()
            .map_or(0, |c| c.generation())
    }

    /// Current overlay cache
    pub fn live_update_entries(&self) -> Arc<LiveUpdateEntries> {
        Arc::clone(&self.overlay.read())
    }

    /// Bundled container
    pub const fn bundled(&self) -> &ArchiveContainer {
        &self.bundled
    }

    /// Live-update container, if any patch has been applied
    pub fn live_update_container(&self) -> Option<Arc<ArchiveContainer>> {
        self.live_update.read().clone()
    }

    /// Archive configuration
    pub const fn config(&self) -> &ArchiveConfig {
        &self.config
    }

    fn refresh_overlay(&self, live: &ArchiveContainer) -> Result<()> {
        let cache = cache_live_update_entries(&self.bundled, live)?;
        *self.overlay.write() = Arc::new(cache);
        Ok(())
    }
}

impl std::fmt::Debug for ResourceArchive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceArchive")
            .field("base_path", &self.config.base_path)
            .field("bundled", &self.bundled)
            .field("live_update", &*self.live_update.read())
            .finish_non_exhaustive()
    }
}

/// Batch of insertions sharing one cloned index.
///
/// Nothing becomes visible until [`PatchSession::commit`]. Dropping a
/// session discards its index; payload bytes it appended stay in the blob
/// unreferenced.
pub struct PatchSession<'a> {
    archive: &'a ResourceArchive,
    _guard: MutexGuard<'a, ()>,
    container: Arc<ArchiveContainer>,
    working: ArchiveIndex,
    is_new: bool,
    inserted: usize,
    regrowths: usize,
}

impl PatchSession<'_> {
    /// Append `payload` and insert its record under `hash`.
    ///
    /// Grows the working index by `patch_reserve` slots when it is full.
    ///
    /// # Errors
    ///
    /// - `ArchiveError::AlreadyExists` if the hash is already present
    /// - `ArchiveError::InvalidHash` if the hash is too short
    /// - `ArchiveError::AllocationFailure` if growth fails
    /// - write and codec validation errors of
    ///   [`ArchiveContainer::shift_and_insert`]
    pub fn insert(&mut self, hash: &[u8], meta: PatchMeta, payload: &[u8]) -> Result<EntryRecord> {
        let at = insertion_index(&self.working, hash)?;

        if self.working.free_slots() == 0 {
            let extra = self.archive.config.patch_reserve.max(1);
            self.working = ArchiveIndex::from_copy(&self.working, extra)?;
            self.regrowths += 1;
            debug!(
                "Grew patch index to {} slots (regrowth {})",
                self.working.capacity(),
                self.regrowths
            );
        }

        let entry = self
            .container
            .shift_and_insert(&mut self.working, at, hash, payload, meta)?;
        self.inserted += 1;
        Ok(entry)
    }

    /// Persist the patched index and publish it.
    ///
    /// Returns the new live-update generation. A session without
    /// insertions publishes nothing.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the index cannot be saved; nothing is
    /// published in that case.
    pub fn commit(mut self) -> Result<u64> {
        let archive = self.archive;
        if self.inserted == 0 {
            debug!("Patch session committed without insertions");
            return Ok(archive.generation());
        }

        self.working.save(&archive.config.live_update_index_path())?;
        let generation = self.container.supersede(Arc::new(self.working));
        if self.is_new {
            *archive.live_update.write() = Some(Arc::clone(&self.container));
        }
        if let Err(e) = archive.refresh_overlay(&self.container) {
            warn!("Failed to refresh live-update cache: {}", e);
            return Err(e);
        }

        info!(
            "Committed {} live-update resources, generation {} ({} regrowths)",
            self.inserted, generation, self.regrowths
        );
        Ok(generation)
    }

    /// Insertions so far
    pub const fn inserted(&self) -> usize {
        self.inserted
    }

    /// Times the working index had to be grown
    pub const fn regrowths(&self) -> usize {
        self.regrowths
    }

    /// Free slots left before the next growth
    pub const fn free_slots(&self) -> usize {
        self.working.free_slots()
    }

    /// Whether this session creates the live-update archive
    pub const fn creates_live_update(&self) -> bool {
        self.is_new
    }
}

/// Live-update index rebuilt on top of a bundled index.
struct Rebased {
    index: ArchiveIndex,
    carried: usize,
    shadowed: usize,
}

/// Copy `bundled` and re-insert every live-update entry of `live` into it.
///
/// Live-update entries whose hash `bundled` carries replace the copied
/// bundled record.
fn rebase_onto(bundled: &ArchiveIndex, live: &ArchiveIndex) -> Result<Rebased> {
    let carried: Vec<(&[u8], EntryRecord)> = live
        .iter()
        .filter(|(_, entry)| entry.is_live_update())
        .collect();

    let bundled_hashes = PackedHashes::new(bundled.hash_section(), bundled.hash_length())?;
    let mut index = ArchiveIndex::from_copy(bundled, carried.len())?;
    let mut shadowed = 0;
    for (hash, entry) in &carried {
        match insertion_index(&bundled_hashes, hash) {
            Ok(_) => {
                index.insert_entry(hash, *entry)?;
            }
            Err(ArchiveError::AlreadyExists(_)) => {
                let slot = find(&index, hash).ok_or_else(|| {
                    ArchiveError::CorruptIndex(format!(
                        "bundled hash {} missing from its copy",
                        hex_prefix(hash)
                    ))
                })?;
                index.set_entry(slot, *entry)?;
                shadowed += 1;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Rebased {
        index,
        carried: carried.len(),
        shadowed,
    })
}

/// Whether `live` is a patched copy of `bundled`.
///
/// Every bundled hash must be present in `live`, and every entry of `live`
/// without the live-update flag must equal the bundled record.
///
/// # Errors
///
/// Returns `ArchiveError::CorruptIndex` if the hash lengths differ.
fn derives_from(bundled: &ArchiveIndex, live: &ArchiveIndex) -> Result<bool> {
    if bundled.hash_length() != live.hash_length() {
        return Err(ArchiveError::CorruptIndex(format!(
            "live-update hash length {} differs from bundled {}",
            live.hash_length(),
            bundled.hash_length()
        )));
    }

    let mut covered = 0;
    for (hash, entry) in live.iter() {
        match bundled.lookup(hash) {
            Some(original) if entry.is_live_update() || original == entry => covered += 1,
            Some(_) => return Ok(false),
            None if entry.is_live_update() => {}
            None => return Ok(false),
        }
    }
    Ok(covered == bundled.entry_count())
}

/// Reject live-update records pointing past the end of the live-update blob.
fn check_live_update_bounds(index: &ArchiveIndex, data: &LiveUpdateData) -> Result<()> {
    let len = data.len();
    for (hash, entry) in index.iter().filter(|(_, e)| e.is_live_update()) {
        let end = u64::from(entry.data_offset) + u64::from(entry.stored_size());
        if end > len {
            return Err(ArchiveError::CorruptIndex(format!(
                "live-update entry {} ends at {end}, blob holds {len} bytes",
                hex_prefix(hash)
            )));
        }
    }
    Ok(())
}
