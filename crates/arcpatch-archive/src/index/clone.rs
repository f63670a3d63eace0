//! Cloning an index into owned buffers with spare capacity.

use tracing::debug;

use super::{ArchiveIndex, zeroed_buffer};
use crate::entry::ENTRY_RECORD_SIZE;
use crate::{ArchiveError, Result};

impl ArchiveIndex {
    /// Copy `src` into a new owned index with `extra_capacity` free slots.
    ///
    /// Hashes and records are copied verbatim; the spare slots are zeroed.
    /// Exactly `extra_capacity` insertions fit before the copy reports
    /// `CapacityExhausted`. `src` may be mapped or owned and is not modified.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::AllocationFailure` if the buffers cannot be
    /// reserved.
    pub fn from_copy(src: &Self, extra_capacity: usize) -> Result<Self> {
        let count = src.entry_count();
        let hash_length = src.hash_length();
        let capacity = count.checked_add(extra_capacity).ok_or_else(|| {
            ArchiveError::AllocationFailure(format!(
                "{count} entries plus {extra_capacity} spare slots overflow"
            ))
        })?;

        let mut hashes = zeroed_buffer(capacity, hash_length)?;
        hashes[..count * hash_length].copy_from_slice(src.hash_section());

        let mut entries = zeroed_buffer(capacity, ENTRY_RECORD_SIZE)?;
        entries[..count * ENTRY_RECORD_SIZE].copy_from_slice(src.entry_section());

        let mut copy = Self::from_owned_parts(src.header, hashes, entries, capacity);
        copy.set_entry_count(count)?;

        debug!(
            "Cloned index: {} entries, {} spare slots",
            count, extra_capacity
        );
        Ok(copy)
    }
}
