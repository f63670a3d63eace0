//! Archive index (`.arci`) parsing, validation and serialization.
//!
//! File layout (all integers big-endian):
//!
//! ```text
//! [0x00] IndexHeader (48 bytes): version, user tag, count, section offsets,
//!        hash length, MD5 digest
//! [0x30] Hash section: entry_count * hash_length bytes, strictly ascending
//! [pad]  Zero padding to a 16-byte boundary
//! [eso]  Entry section: entry_count * 16-byte records, parallel to hashes
//! ```
//!
//! The digest is MD5 over the serialized file with the 16 digest bytes
//! zeroed. An index is either a read-only view over a memory map or an
//! owned pair of buffers with spare slots for insertion.

pub mod clone;
pub mod insert;
pub mod search;

use std::fs::File;
use std::io::{BufWriter, Cursor, Write};
use std::path::Path;

use arcpatch_crypto::IndexDigest;
use binrw::{BinRead, BinReaderExt, BinWrite, BinWriterExt};
use memmap2::{Mmap, MmapOptions};
use tracing::{debug, warn};

use crate::config::LoadMode;
use crate::entry::{ENTRY_RECORD_SIZE, EntryRecord};
use crate::hash::{MAX_HASH, SortedHashes};
use crate::{ArchiveError, Result};

pub use search::{find, insertion_index};

/// Index format version understood by this build.
///
/// Bumped whenever the header layout or [`MAX_HASH`] changes.
pub const FORMAT_VERSION: u32 = 4;

/// Size of the serialized header in bytes.
pub const HEADER_SIZE: usize = 48;

/// Alignment of the entry section within the file.
pub const ENTRY_SECTION_ALIGNMENT: usize = 16;

/// Byte range of the digest within the header.
const DIGEST_RANGE: std::ops::Range<usize> = 32..48;

/// Index file header
#[derive(Debug, Clone, Copy, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct IndexHeader {
    /// Format version (must equal [`FORMAT_VERSION`])
    #[brw(pad_after = 4)]
    pub format_version: u32,
    /// Opaque tag carried for the embedding application
    pub user_tag: u64,
    /// Number of hashes and entry records
    pub entry_count: u32,
    /// File offset of the entry section
    pub entry_section_offset: u32,
    /// File offset of the hash section
    pub hash_section_offset: u32,
    /// Length in bytes of every hash
    pub hash_length: u32,
    /// MD5 over the file with these 16 bytes zeroed
    pub index_digest: [u8; 16],
}

impl IndexHeader {
    /// Header for an empty index with the canonical layout
    pub const fn new(hash_length: u32, user_tag: u64) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            user_tag,
            entry_count: 0,
            entry_section_offset: HEADER_SIZE as u32,
            hash_section_offset: HEADER_SIZE as u32,
            hash_length,
            index_digest: [0; 16],
        }
    }

    fn to_bytes(self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);
        cursor.write_be(&self)?;
        Ok(buf)
    }
}

/// Offset of the entry section for `count` hashes of `hash_length` bytes.
pub(crate) const fn canonical_entry_offset(count: usize, hash_length: usize) -> usize {
    let end = HEADER_SIZE + count * hash_length;
    (end + ENTRY_SECTION_ALIGNMENT - 1) & !(ENTRY_SECTION_ALIGNMENT - 1)
}

fn header_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| {
        ArchiveError::ResourceTooLarge(format!("{what} {value} does not fit in 32 bits"))
    })
}

/// Backing storage of an index.
enum IndexStorage {
    /// Read-only view over a mapped `.arci` file
    Mapped(Mmap),
    /// Heap buffers sized for `capacity` slots; slots past `entry_count` are
    /// zeroed and reserved for insertion
    Owned {
        hashes: Vec<u8>,
        entries: Vec<u8>,
        capacity: usize,
    },
}

/// Sorted hash index with parallel entry records.
pub struct ArchiveIndex {
    header: IndexHeader,
    storage: IndexStorage,
}

impl ArchiveIndex {
    /// Create an empty owned index with room for `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::InvalidHash` if `hash_length` is outside
    /// `1..=MAX_HASH`, or `ArchiveError::AllocationFailure` if the buffers
    /// cannot be reserved.
    pub fn new(hash_length: usize, user_tag: u64, capacity: usize) -> Result<Self> {
        validate_hash_length(hash_length).map_err(ArchiveError::InvalidHash)?;
        let header = IndexHeader::new(hash_length as u32, user_tag);
        let hashes = zeroed_buffer(capacity, hash_length)?;
        let entries = zeroed_buffer(capacity, ENTRY_RECORD_SIZE)?;
        Ok(Self {
            header,
            storage: IndexStorage::Owned {
                hashes,
                entries,
                capacity,
            },
        })
    }

    /// Parse and validate an index from bytes into owned buffers.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::VersionMismatch` for a foreign format version
    /// and `ArchiveError::CorruptIndex` for any structural or digest failure.
    pub fn parse(bytes: &[u8], verify_digest: bool) -> Result<Self> {
        let header = validate(bytes, verify_digest)?;
        let count = header.entry_count as usize;
        let hash_length = header.hash_length as usize;

        let hso = header.hash_section_offset as usize;
        let eso = header.entry_section_offset as usize;
        let hashes = bytes[hso..hso + count * hash_length].to_vec();
        let entries = bytes[eso..eso + count * ENTRY_RECORD_SIZE].to_vec();

        let mut header = header;
        header.hash_section_offset = HEADER_SIZE as u32;
        header.entry_section_offset = header_u32(
            canonical_entry_offset(count, hash_length),
            "entry section offset",
        )?;

        Ok(Self {
            header,
            storage: IndexStorage::Owned {
                hashes,
                entries,
                capacity: count,
            },
        })
    }

    /// Validate a mapped index file and view it in place.
    ///
    /// # Errors
    ///
    /// Same as [`ArchiveIndex::parse`].
    pub fn from_mapped(map: Mmap, verify_digest: bool) -> Result<Self> {
        let header = validate(&map, verify_digest)?;
        Ok(Self {
            header,
            storage: IndexStorage::Mapped(map),
        })
    }

    /// Load an index file with the given backing.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if the file cannot be read or mapped, and
    /// the validation errors of [`ArchiveIndex::parse`].
    pub fn load(path: &Path, mode: LoadMode, verify_digest: bool) -> Result<Self> {
        let index = match mode {
            LoadMode::Mapped => {
                let file = File::open(path)?;
                let len = file.metadata()?.len();
                if len < HEADER_SIZE as u64 {
                    return Err(ArchiveError::CorruptIndex(format!(
                        "{} is {len} bytes, shorter than the {HEADER_SIZE}-byte header",
                        path.display()
                    )));
                }

                #[allow(unsafe_code)]
                let map = unsafe { MmapOptions::new().map(&file)? };
                Self::from_mapped(map, verify_digest)?
            }
            LoadMode::File => {
                let bytes = std::fs::read(path)?;
                Self::parse(&bytes, verify_digest)?
            }
        };

        debug!(
            "Loaded index {} ({:?}): {} entries, hash length {}",
            path.display(),
            mode,
            index.entry_count(),
            index.hash_length()
        );
        Ok(index)
    }

    /// Serialize to the canonical on-disk layout with a fresh digest.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::ResourceTooLarge` if a section offset does not
    /// fit the 32-bit header fields.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let count = self.entry_count();
        let hash_length = self.hash_length();
        let eso = canonical_entry_offset(count, hash_length);
        let total = eso + count * ENTRY_RECORD_SIZE;

        let mut header = self.header;
        header.hash_section_offset = HEADER_SIZE as u32;
        header.entry_section_offset = header_u32(eso, "entry section offset")?;
        header.index_digest = [0; 16];

        let mut bytes = Vec::with_capacity(total);
        bytes.extend_from_slice(&header.to_bytes()?);
        bytes.extend_from_slice(self.hash_section());
        bytes.resize(eso, 0);
        bytes.extend_from_slice(self.entry_section());

        let digest = IndexDigest::compute(&[&bytes]);
        bytes[DIGEST_RANGE].copy_from_slice(digest.as_bytes());
        Ok(bytes)
    }

    /// Write the index to `path` atomically and record the new digest.
    ///
    /// Writes to a temp file, fsyncs, then renames over `path`; retried up to
    /// 3 times.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Io` if every attempt fails.
    pub fn save(&mut self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        let temp_path = path.with_extension("tmp");
        let mut last_error = None;

        for attempt in 0..3 {
            match write_synced(&temp_path, &bytes) {
                Ok(()) => match std::fs::rename(&temp_path, path) {
                    Ok(()) => {
                        self.header.index_digest.copy_from_slice(&bytes[DIGEST_RANGE]);
                        debug!(
                            "Saved index {} with {} entries (attempt {})",
                            path.display(),
                            self.entry_count(),
                            attempt + 1
                        );
                        return Ok(());
                    }
                    Err(e) => last_error = Some(e),
                },
                Err(e) => last_error = Some(e),
            }

            warn!(
                "Failed to save index {} (attempt {})",
                path.display(),
                attempt + 1
            );
            let _ = std::fs::remove_file(&temp_path);
        }

        Err(last_error.map_or_else(
            || ArchiveError::Io(std::io::Error::other("index save failed")),
            ArchiveError::Io,
        ))
    }

    /// Release the index. Owned buffers are freed, mapped files unmapped.
    pub fn release(self) {
        debug!("Releasing index with {} entries", self.entry_count());
    }

    /// Get the header
    pub const fn header(&self) -> &IndexHeader {
        &self.header
    }

    /// Number of entries
    pub const fn entry_count(&self) -> usize {
        self.header.entry_count as usize
    }

    /// Offset of the entry section in the serialized file
    pub const fn entry_section_offset(&self) -> u32 {
        self.header.entry_section_offset
    }

    /// Offset of the hash section in the serialized file
    pub const fn hash_section_offset(&self) -> u32 {
        self.header.hash_section_offset
    }

    /// Hash length in bytes
    pub const fn hash_length(&self) -> usize {
        self.header.hash_length as usize
    }

    /// Opaque user tag
    pub const fn user_tag(&self) -> u64 {
        self.header.user_tag
    }

    /// Digest recorded in the header
    pub const fn digest(&self) -> IndexDigest {
        IndexDigest::from_bytes(self.header.index_digest)
    }

    /// Whether the index is a view over a memory map
    pub const fn is_mapped(&self) -> bool {
        matches!(self.storage, IndexStorage::Mapped(_))
    }

    /// Total number of slots (used and free)
    pub const fn capacity(&self) -> usize {
        match &self.storage {
            IndexStorage::Mapped(_) => self.entry_count(),
            IndexStorage::Owned { capacity, .. } => *capacity,
        }
    }

    /// Number of slots available for insertion
    pub const fn free_slots(&self) -> usize {
        self.capacity() - self.entry_count()
    }

    /// Packed hash section (`entry_count * hash_length` bytes)
    pub fn hash_section(&self) -> &[u8] {
        let len = self.entry_count() * self.hash_length();
        match &self.storage {
            IndexStorage::Mapped(map) => {
                let start = self.header.hash_section_offset as usize;
                &map[start..start + len]
            }
            IndexStorage::Owned { hashes, .. } => &hashes[..len],
        }
    }

    /// Packed entry section (`entry_count * 16` bytes)
    pub fn entry_section(&self) -> &[u8] {
        let len = self.entry_count() * ENTRY_RECORD_SIZE;
        match &self.storage {
            IndexStorage::Mapped(map) => {
                let start = self.header.entry_section_offset as usize;
                &map[start..start + len]
            }
            IndexStorage::Owned { entries, .. } => &entries[..len],
        }
    }

    /// Entry record at position `i`
    pub fn entry_at(&self, i: usize) -> Option<EntryRecord> {
        if i >= self.entry_count() {
            return None;
        }
        let start = i * ENTRY_RECORD_SIZE;
        Some(EntryRecord::from_slice(&self.entry_section()[start..]))
    }

    /// Look up the entry record for `hash`
    pub fn lookup(&self, hash: &[u8]) -> Option<EntryRecord> {
        find(self, hash).and_then(|i| self.entry_at(i))
    }

    /// Iterate `(hash, entry)` pairs in hash order
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], EntryRecord)> + '_ {
        self.hash_section()
            .chunks_exact(self.hash_length())
            .zip(self.entry_section().chunks_exact(ENTRY_RECORD_SIZE))
            .map(|(hash, entry)| (hash, EntryRecord::from_slice(entry)))
    }

    /// Overwrite the record at position `i`, keeping its hash.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::NotFound` if `i` is out of range and
    /// `ArchiveError::CapacityExhausted` if the index is mapped (read-only).
    pub fn set_entry(&mut self, i: usize, entry: EntryRecord) -> Result<()> {
        let count = self.entry_count();
        if i >= count {
            return Err(ArchiveError::NotFound(format!(
                "entry slot {i} beyond entry count {count}"
            )));
        }
        let (_, entries) = self.owned_buffers_mut()?;
        let start = i * ENTRY_RECORD_SIZE;
        entries[start..start + ENTRY_RECORD_SIZE].copy_from_slice(&entry.to_bytes());
        Ok(())
    }

    /// Mutable access to the owned hash and entry buffers.
    ///
    /// Mapped indices have no free slot; they report `CapacityExhausted` so
    /// callers clone them first.
    pub(crate) fn owned_buffers_mut(&mut self) -> Result<(&mut [u8], &mut [u8])> {
        let count = self.entry_count();
        match &mut self.storage {
            IndexStorage::Mapped(_) => Err(ArchiveError::CapacityExhausted { capacity: count }),
            IndexStorage::Owned {
                hashes, entries, ..
            } => Ok((hashes.as_mut_slice(), entries.as_mut_slice())),
        }
    }

    /// Build an owned index from prepared buffers.
    pub(crate) fn from_owned_parts(
        header: IndexHeader,
        hashes: Vec<u8>,
        entries: Vec<u8>,
        capacity: usize,
    ) -> Self {
        Self {
            header,
            storage: IndexStorage::Owned {
                hashes,
                entries,
                capacity,
            },
        }
    }

    pub(crate) fn set_entry_count(&mut self, count: usize) -> Result<()> {
        self.header.entry_count = header_u32(count, "entry count")?;
        self.header.hash_section_offset = HEADER_SIZE as u32;
        self.header.entry_section_offset = header_u32(
            canonical_entry_offset(count, self.hash_length()),
            "entry section offset",
        )?;
        Ok(())
    }
}

impl SortedHashes for ArchiveIndex {
    fn hash_length(&self) -> usize {
        self.hash_length()
    }

    fn hash_count(&self) -> usize {
        self.entry_count()
    }

    fn hash_at(&self, i: usize) -> &[u8] {
        let hash_length = self.hash_length();
        &self.hash_section()[i * hash_length..(i + 1) * hash_length]
    }
}

impl std::fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("header", &self.header)
            .field("mapped", &self.is_mapped())
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

fn validate_hash_length(hash_length: usize) -> std::result::Result<(), String> {
    if hash_length == 0 || hash_length > MAX_HASH {
        return Err(format!("hash length {hash_length} outside 1..={MAX_HASH}"));
    }
    Ok(())
}

/// Zero-filled buffer of `slots * stride` bytes, reserved fallibly.
pub(crate) fn zeroed_buffer(slots: usize, stride: usize) -> Result<Vec<u8>> {
    let len = slots.checked_mul(stride).ok_or_else(|| {
        ArchiveError::AllocationFailure(format!("{slots} slots of {stride} bytes overflow"))
    })?;
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        ArchiveError::AllocationFailure(format!("failed to reserve {len} bytes: {e}"))
    })?;
    buf.resize(len, 0);
    Ok(buf)
}

/// Check every structural invariant of a serialized index.
fn validate(bytes: &[u8], verify_digest: bool) -> Result<IndexHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(ArchiveError::CorruptIndex(format!(
            "index is {} bytes, shorter than the {HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }

    let header: IndexHeader = Cursor::new(&bytes[..HEADER_SIZE]).read_be()?;
    if header.format_version != FORMAT_VERSION {
        return Err(ArchiveError::VersionMismatch {
            found: header.format_version,
            expected: FORMAT_VERSION,
        });
    }

    let hash_length = header.hash_length as usize;
    validate_hash_length(hash_length).map_err(ArchiveError::CorruptIndex)?;

    let count = header.entry_count as usize;
    let hashes = section(
        bytes.len(),
        header.hash_section_offset as usize,
        count * hash_length,
        "hash",
    )?;
    let entries = section(
        bytes.len(),
        header.entry_section_offset as usize,
        count * ENTRY_RECORD_SIZE,
        "entry",
    )?;
    if count > 0 && hashes.start < entries.end && entries.start < hashes.end {
        return Err(ArchiveError::CorruptIndex(format!(
            "hash section {hashes:?} overlaps entry section {entries:?}"
        )));
    }

    if verify_digest {
        let computed =
            IndexDigest::compute(&[&bytes[..DIGEST_RANGE.start], &[0u8; 16], &bytes[HEADER_SIZE..]]);
        if computed.as_bytes() != &header.index_digest {
            return Err(ArchiveError::CorruptIndex(format!(
                "digest mismatch: header {}, computed {computed}",
                hex::encode(header.index_digest)
            )));
        }
    }

    let packed = &bytes[hashes];
    let mut previous: Option<&[u8]> = None;
    for (i, hash) in packed.chunks_exact(hash_length).enumerate() {
        if previous.is_some_and(|p| p >= hash) {
            return Err(ArchiveError::CorruptIndex(format!(
                "hash {i} is not strictly greater than its predecessor"
            )));
        }
        previous = Some(hash);
    }

    Ok(header)
}

fn section(
    file_len: usize,
    offset: usize,
    len: usize,
    what: &str,
) -> Result<std::ops::Range<usize>> {
    let end = offset.checked_add(len).filter(|end| *end <= file_len);
    match end {
        Some(end) if offset >= HEADER_SIZE => Ok(offset..end),
        _ => Err(ArchiveError::CorruptIndex(format!(
            "{what} section at {offset} (+{len}) outside {HEADER_SIZE}..{file_len}"
        ))),
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(&file);
    writer.write_all(bytes)?;
    writer.flush()?;
    drop(writer);
    file.sync_all()
}

#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) mod tests {
    use super::*;
    use crate::entry::EntryFlags;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Owned index holding `hashes` (must be sorted) with raw entries.
    pub(crate) fn sample_index<H: AsRef<[u8]>>(hashes: &[H], spare: usize) -> ArchiveIndex {
        let hash_length = hashes.first().map_or(4, |h| h.as_ref().len());
        let mut index =
            ArchiveIndex::new(hash_length, 0xA5A5, hashes.len() + spare).expect("empty index");
        for (i, hash) in hashes.iter().enumerate() {
            let offset = u32::try_from(i * 100).expect("offset");
            let entry = EntryRecord::new(offset, 0, 100, EntryFlags::empty());
            index
                .shift_and_insert(i, hash.as_ref(), entry)
                .expect("sorted insert");
        }
        index
    }

    #[test]
    fn test_header_layout() {
        let mut header = IndexHeader::new(16, 0x0102_0304_0506_0708);
        header.entry_count = 2;
        header.entry_section_offset = 80;
        let bytes = header.to_bytes().expect("header bytes");

        assert_eq!(&bytes[0..4], &FORMAT_VERSION.to_be_bytes());
        assert_eq!(&bytes[4..8], &[0, 0, 0, 0]);
        assert_eq!(&bytes[8..16], &0x0102_0304_0506_0708u64.to_be_bytes());
        assert_eq!(&bytes[16..20], &2u32.to_be_bytes());
        assert_eq!(&bytes[20..24], &80u32.to_be_bytes());
        assert_eq!(&bytes[24..28], &48u32.to_be_bytes());
        assert_eq!(&bytes[28..32], &16u32.to_be_bytes());
    }

    #[test]
    fn test_serialize_reload_round_trip() {
        let index = sample_index(&[b"aaaa", b"bbbb", b"cccc"], 0);
        let bytes = index.to_bytes().expect("serialize");

        assert_eq!(bytes.len(), canonical_entry_offset(3, 4) + 3 * 16);

        let reloaded = ArchiveIndex::parse(&bytes, true).expect("reload");
        assert_eq!(reloaded.entry_count(), 3);
        assert_eq!(reloaded.user_tag(), 0xA5A5);
        assert_eq!(reloaded.hash_section(), index.hash_section());
        assert_eq!(reloaded.entry_section(), index.entry_section());
        assert_eq!(reloaded.digest().as_bytes(), &bytes[DIGEST_RANGE]);
        assert_eq!(reloaded.entry_at(2).map(|e| e.data_offset), Some(200));
    }

    #[test]
    fn test_empty_index() {
        let index = ArchiveIndex::new(16, 0, 0).expect("empty");
        assert_eq!(index.entry_count(), 0);
        assert!(index.lookup(&[0u8; 16]).is_none());

        let bytes = index.to_bytes().expect("serialize");
        let reloaded = ArchiveIndex::parse(&bytes, true).expect("reload");
        assert_eq!(reloaded.entry_count(), 0);
    }

    #[test]
    fn test_version_mismatch() {
        let index = sample_index(&[b"aaaa"], 0);
        let mut bytes = index.to_bytes().expect("serialize");
        bytes[0..4].copy_from_slice(&(FORMAT_VERSION - 1).to_be_bytes());

        let err = ArchiveIndex::parse(&bytes, false).expect_err("old version");
        assert!(matches!(
            err,
            ArchiveError::VersionMismatch { found: 3, expected: 4 }
        ));
        assert!(err.is_fatal_for_open());
    }

    #[test]
    fn test_digest_mismatch_is_corruption() {
        let index = sample_index(&[b"aaaa", b"bbbb"], 0);
        let mut bytes = index.to_bytes().expect("serialize");
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;

        assert!(matches!(
            ArchiveIndex::parse(&bytes, true),
            Err(ArchiveError::CorruptIndex(_))
        ));
        assert!(ArchiveIndex::parse(&bytes, false).is_ok());
    }

    #[test]
    fn test_unsorted_hashes_rejected() {
        let index = sample_index(&[b"aaaa", b"bbbb"], 0);
        let mut bytes = index.to_bytes().expect("serialize");
        bytes[HEADER_SIZE..HEADER_SIZE + 4].copy_from_slice(b"zzzz");

        let err = ArchiveIndex::parse(&bytes, false).expect_err("unsorted");
        assert!(matches!(err, ArchiveError::CorruptIndex(_)));
    }

    #[test]
    fn test_section_bounds_rejected() {
        let index = sample_index(&[b"aaaa", b"bbbb"], 0);

        let mut truncated = index.to_bytes().expect("serialize");
        truncated.truncate(truncated.len() - 1);
        assert!(matches!(
            ArchiveIndex::parse(&truncated, false),
            Err(ArchiveError::CorruptIndex(_))
        ));

        let mut overlapping = index.to_bytes().expect("serialize");
        overlapping[20..24].copy_from_slice(&52u32.to_be_bytes());
        assert!(matches!(
            ArchiveIndex::parse(&overlapping, false),
            Err(ArchiveError::CorruptIndex(_))
        ));

        assert!(matches!(
            ArchiveIndex::parse(&[0u8; 10], false),
            Err(ArchiveError::CorruptIndex(_))
        ));
    }

    #[test]
    fn test_invalid_hash_length_rejected() {
        let index = sample_index(&[b"aaaa"], 0);
        let mut bytes = index.to_bytes().expect("serialize");
        bytes[28..32].copy_from_slice(&65u32.to_be_bytes());
        assert!(matches!(
            ArchiveIndex::parse(&bytes, false),
            Err(ArchiveError::CorruptIndex(_))
        ));

        assert!(ArchiveIndex::new(0, 0, 1).is_err());
        assert!(ArchiveIndex::new(MAX_HASH + 1, 0, 1).is_err());
    }

    #[test]
    fn test_save_and_load_both_modes() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("game.arci");

        let mut index = sample_index(&[b"aaaa", b"bbbb", b"cccc"], 2);
        index.save(&path).expect("save");
        assert!(!path.with_extension("tmp").exists());

        let mapped = ArchiveIndex::load(&path, LoadMode::Mapped, true).expect("mapped load");
        assert!(mapped.is_mapped());
        assert_eq!(mapped.entry_count(), 3);
        assert_eq!(mapped.free_slots(), 0);
        assert_eq!(mapped.digest(), index.digest());
        assert_eq!(mapped.lookup(b"bbbb").map(|e| e.data_offset), Some(100));

        let owned = ArchiveIndex::load(&path, LoadMode::File, true).expect("file load");
        assert!(!owned.is_mapped());
        assert_eq!(owned.hash_section(), mapped.hash_section());
        assert_eq!(owned.entry_section_offset(), mapped.entry_section_offset());

        mapped.release();
        owned.release();
    }

    #[test]
    fn test_mapped_index_is_read_only() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("game.arci");
        sample_index(&[b"aaaa"], 0).save(&path).expect("save");

        let mut mapped = ArchiveIndex::load(&path, LoadMode::Mapped, true).expect("load");
        let entry = EntryRecord::new(1, 0, 1, EntryFlags::empty());
        assert!(matches!(
            mapped.set_entry(0, entry),
            Err(ArchiveError::CapacityExhausted { capacity: 1 })
        ));
    }

    #[test]
    fn test_set_entry() {
        let mut index = sample_index(&[b"aaaa", b"bbbb"], 0);
        let entry = EntryRecord::new(7, 3, 9, EntryFlags::COMPRESSED);
        index.set_entry(1, entry).expect("set");
        assert_eq!(index.entry_at(1), Some(entry));
        assert!(index.set_entry(2, entry).is_err());
    }
}
