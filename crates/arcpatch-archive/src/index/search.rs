//! Binary search over sorted hash sequences.

use std::cmp::Ordering;

use crate::hash::{SortedHashes, hex_prefix, significant};
use crate::{ArchiveError, Result};

/// Binary search for `key` (already truncated to the hash length).
///
/// `Ok(i)` when `key` is at position `i`, `Err(i)` with the partition point
/// otherwise.
fn search<S: SortedHashes + ?Sized>(hashes: &S, key: &[u8]) -> std::result::Result<usize, usize> {
    let mut low = 0;
    let mut high = hashes.hash_count();
    while low < high {
        let mid = low + (high - low) / 2;
        match hashes.hash_at(mid).cmp(key) {
            Ordering::Less => low = mid + 1,
            Ordering::Greater => high = mid,
            Ordering::Equal => return Ok(mid),
        }
    }
    Err(low)
}

/// Position at which `hash` sorts into `hashes`.
///
/// Only the first `hash_length` bytes of `hash` are compared.
///
/// # Errors
///
/// Returns `ArchiveError::AlreadyExists` if an equal hash is present and
/// `ArchiveError::InvalidHash` if `hash` is shorter than the hash length.
pub fn insertion_index<S: SortedHashes + ?Sized>(hashes: &S, hash: &[u8]) -> Result<usize> {
    let key = significant(hash, hashes.hash_length())?;
    match search(hashes, key) {
        Ok(_) => Err(ArchiveError::AlreadyExists(hex_prefix(key))),
        Err(at) => Ok(at),
    }
}

/// Position of `hash` in `hashes`, if present.
///
/// Hashes shorter than the hash length are never found.
pub fn find<S: SortedHashes + ?Sized>(hashes: &S, hash: &[u8]) -> Option<usize> {
    let key = significant(hash, hashes.hash_length()).ok()?;
    search(hashes, key).ok()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::hash::PackedHashes;
    use proptest::prelude::*;

    const PACKED: &[u8] = &[0x10, 0x00, 0x20, 0x00, 0x30, 0x00];

    #[test]
    fn test_find_and_insertion_index() {
        let hashes = PackedHashes::new(PACKED, 2).expect("packed");

        assert_eq!(find(&hashes, &[0x20, 0x00]), Some(1));
        assert_eq!(find(&hashes, &[0x20, 0x01]), None);
        assert_eq!(find(&hashes, &[0x20]), None);

        assert_eq!(insertion_index(&hashes, &[0x00, 0x00]).expect("front"), 0);
        assert_eq!(insertion_index(&hashes, &[0x25, 0x00]).expect("middle"), 2);
        assert_eq!(insertion_index(&hashes, &[0xFF, 0xFF]).expect("back"), 3);
    }

    #[test]
    fn test_only_hash_length_bytes_compared() {
        let hashes = PackedHashes::new(PACKED, 2).expect("packed");

        assert_eq!(find(&hashes, &[0x30, 0x00, 0xAB, 0xCD]), Some(2));
        assert!(matches!(
            insertion_index(&hashes, &[0x10, 0x00, 0x99]),
            Err(ArchiveError::AlreadyExists(_))
        ));
        assert!(matches!(
            insertion_index(&hashes, &[0x10]),
            Err(ArchiveError::InvalidHash(_))
        ));
    }

    #[test]
    fn test_empty_sequence() {
        let hashes = PackedHashes::new(&[], 16).expect("packed");
        assert_eq!(find(&hashes, &[0u8; 16]), None);
        assert_eq!(insertion_index(&hashes, &[0u8; 16]).expect("empty"), 0);
    }

    proptest! {
        #[test]
        fn insertion_index_is_partition_point(
            set in prop::collection::btree_set(any::<[u8; 4]>(), 0..64),
            target in any::<[u8; 4]>(),
        ) {
            let sorted: Vec<[u8; 4]> = set.into_iter().collect();
            let packed: Vec<u8> = sorted.iter().flatten().copied().collect();
            let hashes = PackedHashes::new(&packed, 4).expect("packed");

            match insertion_index(&hashes, &target) {
                Ok(at) => {
                    prop_assert!(!sorted.contains(&target));
                    prop_assert_eq!(at, sorted.partition_point(|h| *h < target));
                    prop_assert!(sorted[..at].iter().all(|h| *h < target));
                    prop_assert!(sorted[at..].iter().all(|h| *h > target));
                }
                Err(ArchiveError::AlreadyExists(_)) => {
                    prop_assert_eq!(find(&hashes, &target), sorted.iter().position(|h| *h == target));
                }
                Err(e) => prop_assert!(false, "unexpected error: {e}"),
            }
        }
    }
}
