//! Content hash keys and sorted hash sequences.
//!
//! Hashes are opaque byte strings compared lexicographically. An index
//! declares a hash length; only that many leading bytes of a supplied
//! hash participate in ordering and equality.

use std::cmp::Ordering;
use std::fmt;

use crate::{ArchiveError, Result};

/// Maximum hash length in bytes (512 bits).
///
/// The on-disk format version must change if this bound changes.
pub const MAX_HASH: usize = 64;

/// Fixed-capacity content hash of up to [`MAX_HASH`] bytes.
#[derive(Clone, Copy)]
pub struct ContentHash {
    bytes: [u8; MAX_HASH],
    len: u8,
}

impl ContentHash {
    /// Create a hash from a byte slice.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidHash` if the slice is empty or longer
    /// than [`MAX_HASH`].
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_HASH {
            return Err(ArchiveError::InvalidHash(format!(
                "hash length {} outside 1..={MAX_HASH}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; MAX_HASH];
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(Self {
            bytes: buf,
            len: bytes.len() as u8,
        })
    }

    /// Parse a hash from a hex string
    pub fn from_hex(hex: &str) -> Result<Self> {
        let bytes = hex::decode(hex).map_err(|e| ArchiveError::InvalidHash(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Get the significant bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Number of significant bytes
    pub const fn len(&self) -> usize {
        self.len as usize
    }

    /// Always false for a constructed hash; present for API symmetry.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }
}

impl PartialEq for ContentHash {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ContentHash {}

impl PartialOrd for ContentHash {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ContentHash {
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl std::hash::Hash for ContentHash {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Truncate `hash` to `hash_length` significant bytes.
///
/// # Errors
///
/// Returns `ArchiveError::InvalidHash` if `hash` is shorter than
/// `hash_length`.
pub fn significant(hash: &[u8], hash_length: usize) -> Result<&[u8]> {
    hash.get(..hash_length).ok_or_else(|| {
        ArchiveError::InvalidHash(format!(
            "hash of {} bytes is shorter than index hash length {hash_length}",
            hash.len()
        ))
    })
}

/// Short hex prefix for log and error messages.
pub(crate) fn hex_prefix(hash: &[u8]) -> String {
    hex::encode(&hash[..hash.len().min(9)])
}

/// A sequence of equal-length hashes sorted ascending.
///
/// Implemented by archive indices, live-update snapshots and raw packed
/// hash arrays so that one search routine serves all of them.
pub trait SortedHashes {
    /// Length in bytes of every hash in the sequence.
    fn hash_length(&self) -> usize;

    /// Number of hashes in the sequence.
    fn hash_count(&self) -> usize;

    /// Hash at position `i` (exactly `hash_length` bytes).
    ///
    /// `i` must be below `hash_count()`.
    fn hash_at(&self, i: usize) -> &[u8];
}

/// Borrowed view over a packed hash section (`count * hash_length` bytes).
#[derive(Debug, Clone, Copy)]
pub struct PackedHashes<'a> {
    bytes: &'a [u8],
    hash_length: usize,
}

impl<'a> PackedHashes<'a> {
    /// Wrap a packed hash section.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidHash` if `hash_length` is outside
    /// `1..=MAX_HASH`, or `ArchiveError::CorruptIndex` if the section is
    /// not a whole number of hashes.
    pub fn new(bytes: &'a [u8], hash_length: usize) -> Result<Self> {
        if hash_length == 0 || hash_length > MAX_HASH {
            return Err(ArchiveError::InvalidHash(format!(
                "hash length {hash_length} outside 1..={MAX_HASH}"
            )));
        }
        if bytes.len() % hash_length != 0 {
            return Err(ArchiveError::CorruptIndex(format!(
                "hash section of {} bytes is not a multiple of {hash_length}",
                bytes.len()
            )));
        }
        Ok(Self { bytes, hash_length })
    }

    /// Iterate the hashes in order
    pub fn iter(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.bytes.chunks_exact(self.hash_length)
    }
}

impl SortedHashes for PackedHashes<'_> {
    fn hash_length(&self) -> usize {
        self.hash_length
    }

    fn hash_count(&self) -> usize {
        self.bytes.len() / self.hash_length
    }

    fn hash_at(&self, i: usize) -> &[u8] {
        &self.bytes[i * self.hash_length..(i + 1) * self.hash_length]
    }
}
