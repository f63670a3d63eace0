//! Overlay resolution between the bundled and live-update archives.
//!
//! The live-update index is a copy of the bundled index with patched
//! resources inserted. Only its entries flagged [`EntryFlags::LIVE_UPDATE`]
//! are served from the live-update blob; every other hash is served by the
//! bundled archive. A live-update entry always shadows a bundled entry of
//! the same hash.

use std::fmt;

use tracing::debug;

use crate::container::ArchiveContainer;
use crate::entry::{EntryFlags, EntryRecord};
use crate::hash::SortedHashes;
use crate::index::find;
use crate::{ArchiveError, Result};

/// Store that serves a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Store {
    /// Shipped read-only archive
    Bundled,
    /// Downloaded overlay archive
    LiveUpdate,
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bundled => write!(f, "bundled"),
            Self::LiveUpdate => write!(f, "live-update"),
        }
    }
}

/// A resolved lookup: the serving store and its entry record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedEntry {
    /// Store serving the resource
    pub store: Store,
    /// Entry record in that store
    pub entry: EntryRecord,
}

/// Owned snapshot of the entries served by the live-update store.
///
/// Holds copies so it stays valid after the index it was computed from is
/// superseded.
#[derive(Debug, Clone, Default)]
pub struct LiveUpdateEntries {
    hashes: Vec<u8>,
    hash_length: usize,
    entries: Vec<EntryRecord>,
    generation: u64,
    shadowed: usize,
}

impl LiveUpdateEntries {
    /// Empty cache for an archive without live-update data
    pub fn empty(hash_length: usize) -> Self {
        Self {
            hash_length,
            ..Self::default()
        }
    }

    /// Entry served by the live-update store for `hash`, if any
    pub fn resolve(&self, hash: &[u8]) -> Option<ResolvedEntry> {
        if self.entries.is_empty() {
            return None;
        }
        find(self, hash).map(|i| ResolvedEntry {
            store: Store::LiveUpdate,
            entry: self.entries[i],
        })
    }

    /// Number of live-update entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the live-update store serves nothing
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live-update generation this cache was computed from
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of live-update entries that shadow a bundled entry
    pub const fn shadowed(&self) -> usize {
        self.shadowed
    }

    /// Iterate `(hash, entry)` pairs in hash order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &EntryRecord)> + '_ {
        self.hashes
            .chunks_exact(self.hash_length.max(1))
            .zip(self.entries.iter())
    }
}

impl SortedHashes for LiveUpdateEntries {
    fn hash_length(&self) -> usize {
        self.hash_length
    }

    fn hash_count(&self) -> usize {
        self.entries.len()
    }

    fn hash_at(&self, i: usize) -> &[u8] {
        &self.hashes[i * self.hash_length..(i + 1) * self.hash_length]
    }
}

/// Collect the entries the live-update store serves.
///
/// Scans the current snapshot of `live_update` for records flagged
/// [`EntryFlags::LIVE_UPDATE`] and counts those whose hash is also present
/// in `bundled`.
///
/// # Errors
///
/// Returns `ArchiveError::CorruptIndex` if the two indices declare
/// different hash lengths.
pub fn cache_live_update_entries(
    bundled: &ArchiveContainer,
    live_update: &ArchiveContainer,
) -> Result<LiveUpdateEntries> {
    let bundled_index = bundled.snapshot();
    let (live_index, generation) = live_update.snapshot_with_generation();

    let hash_length = live_index.hash_length();
    if bundled_index.hash_length() != hash_length {
        return Err(ArchiveError::CorruptIndex(format!(
            "live-update hash length {hash_length} differs from bundled {}",
            bundled_index.hash_length()
        )));
    }

    let mut cache = LiveUpdateEntries::empty(hash_length);
    cache.generation = generation;
    for (hash, entry) in live_index.iter() {
        if !entry.flags.contains(EntryFlags::LIVE_UPDATE) {
            continue;
        }
        if find(bundled_index.as_ref(), hash).is_some() {
            cache.shadowed += 1;
        }
        cache.hashes.extend_from_slice(hash);
        cache.entries.push(entry);
    }

    debug!(
        "Cached {} live-update entries ({} shadow bundled) at generation {}",
        cache.len(),
        cache.shadowed,
        generation
    );
    Ok(cache)
}
