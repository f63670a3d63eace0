//! Ordered insertion into an owned index.

use tracing::debug;

use super::ArchiveIndex;
use super::search::insertion_index;
use crate::entry::{ENTRY_RECORD_SIZE, EntryRecord};
use crate::hash::{SortedHashes, hex_prefix, significant};
use crate::{ArchiveError, Result};

impl ArchiveIndex {
    /// Open a slot at `at` and write `hash` and `entry` into it.
    ///
    /// Every hash and record at positions `>= at` moves one slot right; the
    /// entry count grows by one. Nothing is modified on error.
    ///
    /// # Errors
    ///
    /// - `ArchiveError::AlreadyExists` if `hash` equals a neighbour
    /// - `ArchiveError::InvalidHash` if `hash` is too short or `at` is not its
    ///   sort position
    /// - `ArchiveError::CapacityExhausted` if no free slot remains (always the
    ///   case for mapped indices)
    pub fn shift_and_insert(&mut self, at: usize, hash: &[u8], entry: EntryRecord) -> Result<()> {
        self.check_insert(at, hash)?;
        let hash_length = self.hash_length();
        let count = self.entry_count();
        let key = significant(hash, hash_length)?;

        let (hashes, entries) = self.owned_buffers_mut()?;

        hashes.copy_within(at * hash_length..count * hash_length, (at + 1) * hash_length);
        hashes[at * hash_length..(at + 1) * hash_length].copy_from_slice(key);

        entries.copy_within(
            at * ENTRY_RECORD_SIZE..count * ENTRY_RECORD_SIZE,
            (at + 1) * ENTRY_RECORD_SIZE,
        );
        entries[at * ENTRY_RECORD_SIZE..(at + 1) * ENTRY_RECORD_SIZE]
            .copy_from_slice(&entry.to_bytes());

        self.set_entry_count(count + 1)
    }

    /// Check that [`ArchiveIndex::shift_and_insert`] would accept `hash` at
    /// `at`, without modifying the index.
    ///
    /// # Errors
    ///
    /// Same as [`ArchiveIndex::shift_and_insert`].
    pub fn check_insert(&self, at: usize, hash: &[u8]) -> Result<()> {
        let count = self.entry_count();
        let key = significant(hash, self.hash_length())?;

        if at > count {
            return Err(ArchiveError::InvalidHash(format!(
                "insertion point {at} beyond entry count {count}"
            )));
        }
        if at > 0 {
            check_order(self.hash_at(at - 1), key, at)?;
        }
        if at < count {
            check_order(key, self.hash_at(at), at)?;
        }
        if self.free_slots() == 0 {
            return Err(ArchiveError::CapacityExhausted {
                capacity: self.capacity(),
            });
        }
        Ok(())
    }

    /// Insert `hash` at its sort position and return that position.
    ///
    /// # Errors
    ///
    /// Same as [`insertion_index`](super::insertion_index) and
    /// [`ArchiveIndex::shift_and_insert`].
    pub fn insert_entry(&mut self, hash: &[u8], entry: EntryRecord) -> Result<usize> {
        let at = insertion_index(self, hash)?;
        self.shift_and_insert(at, hash, entry)?;
        debug!(
            "Inserted {} at {} ({} of {} slots used)",
            hex_prefix(hash),
            at,
            self.entry_count(),
            self.capacity()
        );
        Ok(at)
    }
}

/// Require `lower < upper` for the slot at `at`.
fn check_order(lower: &[u8], upper: &[u8], at: usize) -> Result<()> {
    match lower.cmp(upper) {
        std::cmp::Ordering::Less => Ok(()),
        std::cmp::Ordering::Equal => Err(ArchiveError::AlreadyExists(hex_prefix(upper))),
        std::cmp::Ordering::Greater => Err(ArchiveError::InvalidHash(format!(
            "insertion point {at} breaks hash order"
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entry::EntryFlags;
    use crate::index::tests::sample_index;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn record(offset: u32) -> EntryRecord {
        EntryRecord::new(offset, 0, 10, EntryFlags::LIVE_UPDATE)
    }

    #[test]
    fn test_arrival_order_does_not_matter() {
        let mut index = ArchiveIndex::new(4, 0, 3).expect("index");
        index.insert_entry(b"h3h3", record(3)).expect("h3");
        index.insert_entry(b"h1h1", record(1)).expect("h1");
        index.insert_entry(b"h2h2", record(2)).expect("h2");

        assert_eq!(index.hash_section(), b"h1h1h2h2h3h3");
        let offsets: Vec<u32> = index.iter().map(|(_, e)| e.data_offset).collect();
        assert_eq!(offsets, vec![1, 2, 3]);
    }

    #[test]
    fn test_first_insert_into_empty_index() {
        let mut index = ArchiveIndex::new(4, 0, 1).expect("index");
        assert!(index.lookup(b"h1h1").is_none());

        index.insert_entry(b"h1h1", record(0)).expect("insert");
        assert_eq!(index.entry_count(), 1);
        assert_eq!(index.lookup(b"h1h1"), Some(record(0)));
        assert_eq!(index.entry_section_offset(), 64);
    }

    #[test]
    fn test_duplicate_leaves_index_unchanged() {
        let mut index = sample_index(&[b"aaaa", b"cccc"], 2);
        let before = index.to_bytes().expect("serialize");

        let err = index.insert_entry(b"cccc", record(9)).expect_err("duplicate");
        assert!(matches!(err, ArchiveError::AlreadyExists(_)));
        assert_eq!(index.to_bytes().expect("serialize"), before);
    }

    #[test]
    fn test_full_index_reports_capacity() {
        let mut index = sample_index(&[b"aaaa"], 0);
        let err = index.insert_entry(b"bbbb", record(1)).expect_err("full");
        assert!(matches!(err, ArchiveError::CapacityExhausted { capacity: 1 }));
        assert_eq!(index.entry_count(), 1);
    }

    #[test]
    fn test_out_of_order_slot_rejected() {
        let mut index = sample_index(&[b"aaaa", b"cccc"], 2);
        assert!(matches!(
            index.shift_and_insert(0, b"bbbb", record(1)),
            Err(ArchiveError::InvalidHash(_))
        ));
        assert!(matches!(
            index.shift_and_insert(5, b"dddd", record(1)),
            Err(ArchiveError::InvalidHash(_))
        ));
        index.shift_and_insert(2, b"dddd", record(1)).expect("append");
        assert_eq!(index.hash_section(), b"aaaaccccdddd");
    }

    #[test]
    fn test_check_insert_matches_insertion() {
        let index = sample_index(&[b"aaaa", b"cccc"], 1);

        index.check_insert(1, b"bbbb").expect("sorted slot");
        assert!(matches!(
            index.check_insert(1, b"cccc"),
            Err(ArchiveError::AlreadyExists(_))
        ));
        assert!(matches!(
            index.check_insert(2, b"bbbb"),
            Err(ArchiveError::InvalidHash(_))
        ));
        assert!(matches!(
            index.check_insert(0, b"aa"),
            Err(ArchiveError::InvalidHash(_))
        ));

        let full = sample_index(&[b"aaaa"], 0);
        assert!(matches!(
            full.check_insert(1, b"bbbb"),
            Err(ArchiveError::CapacityExhausted { capacity: 1 })
        ));
    }

    proptest! {
        #[test]
        fn distinct_inserts_stay_sorted(
            set in prop::collection::hash_set(any::<[u8; 8]>(), 1..48),
        ) {
            let hashes: Vec<[u8; 8]> = set.into_iter().collect();
            let mut index = ArchiveIndex::new(8, 0, hashes.len()).expect("index");

            for (i, hash) in hashes.iter().enumerate() {
                let offset = u32::try_from(i).expect("offset");
                index.insert_entry(hash, record(offset)).expect("insert");
            }

            prop_assert_eq!(index.entry_count(), hashes.len());
            let stored: Vec<&[u8]> = index.iter().map(|(h, _)| h).collect();
            prop_assert!(stored.windows(2).all(|w| w[0] < w[1]));

            for (i, hash) in hashes.iter().enumerate() {
                let entry = index.lookup(hash).expect("present");
                prop_assert_eq!(entry.data_offset as usize, i);
            }
        }
    }
}
