//! Entry records: per-resource metadata parallel to the hash section.
//!
//! Layout on disk (16 bytes, big-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 4    | Data offset in the resource blob |
//! | 0x04   | 4    | Compressed size (0 when stored raw) |
//! | 0x08   | 4    | Uncompressed size |
//! | 0x0C   | 4    | Flags |

use bitflags::bitflags;

/// Size of an entry record in bytes.
pub const ENTRY_RECORD_SIZE: usize = 16;

bitflags! {
    /// Entry flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EntryFlags: u32 {
        /// Payload is encrypted.
        const ENCRYPTED = 1 << 0;
        /// Payload is compressed.
        const COMPRESSED = 1 << 1;
        /// Payload lives in the live-update blob.
        const LIVE_UPDATE = 1 << 2;
    }
}

/// Metadata for one stored resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntryRecord {
    /// Byte offset of the payload in its resource blob
    pub data_offset: u32,
    /// Stored payload size when compressed, 0 when stored raw
    pub compressed_size: u32,
    /// Size after decryption and decompression
    pub uncompressed_size: u32,
    /// Encryption, compression and origin flags
    pub flags: EntryFlags,
}

impl EntryRecord {
    /// Create a new entry record
    pub const fn new(
        data_offset: u32,
        compressed_size: u32,
        uncompressed_size: u32,
        flags: EntryFlags,
    ) -> Self {
        Self {
            data_offset,
            compressed_size,
            uncompressed_size,
            flags,
        }
    }

    /// Decode a record from its 16-byte on-disk form.
    ///
    /// Unknown flag bits are preserved.
    pub fn from_bytes(bytes: &[u8; ENTRY_RECORD_SIZE]) -> Self {
        let word = |i: usize| u32::from_be_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Self {
            data_offset: word(0),
            compressed_size: word(4),
            uncompressed_size: word(8),
            flags: EntryFlags::from_bits_retain(word(12)),
        }
    }

    /// Decode a record from the start of `bytes`.
    ///
    /// `bytes` must hold at least [`ENTRY_RECORD_SIZE`] bytes; callers slice
    /// records out of validated sections.
    pub(crate) fn from_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; ENTRY_RECORD_SIZE];
        raw.copy_from_slice(&bytes[..ENTRY_RECORD_SIZE]);
        Self::from_bytes(&raw)
    }

    /// Encode the record to its 16-byte on-disk form
    pub fn to_bytes(&self) -> [u8; ENTRY_RECORD_SIZE] {
        let mut buf = [0u8; ENTRY_RECORD_SIZE];
        buf[0..4].copy_from_slice(&self.data_offset.to_be_bytes());
        buf[4..8].copy_from_slice(&self.compressed_size.to_be_bytes());
        buf[8..12].copy_from_slice(&self.uncompressed_size.to_be_bytes());
        buf[12..16].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf
    }

    /// Number of payload bytes occupied in the resource blob
    pub const fn stored_size(&self) -> u32 {
        if self.compressed_size == 0 {
            self.uncompressed_size
        } else {
            self.compressed_size
        }
    }

    /// Check if the payload is encrypted
    pub const fn is_encrypted(&self) -> bool {
        self.flags.contains(EntryFlags::ENCRYPTED)
    }

    /// Check if the payload is compressed
    pub const fn is_compressed(&self) -> bool {
        self.flags.contains(EntryFlags::COMPRESSED)
    }

    /// Check if the payload is served from the live-update blob
    pub const fn is_live_update(&self) -> bool {
        self.flags.contains(EntryFlags::LIVE_UPDATE)
    }
}

/// Caller-supplied description of a resource payload arriving in a patch.
///
/// The engine fills in the data offset and sets [`EntryFlags::LIVE_UPDATE`]
/// itself; only the encoding flags are taken from here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchMeta {
    /// Size of the resource after decryption and decompression
    pub uncompressed_size: u32,
    /// Encoding flags of the payload bytes
    pub flags: EntryFlags,
}

impl PatchMeta {
    /// Payload stored as-is
    pub const fn raw(uncompressed_size: u32) -> Self {
        Self {
            uncompressed_size,
            flags: EntryFlags::empty(),
        }
    }

    /// Payload compressed; the stored size is taken from the payload length
    pub const fn compressed(uncompressed_size: u32) -> Self {
        Self {
            uncompressed_size,
            flags: EntryFlags::COMPRESSED,
        }
    }

    /// Mark the payload as encrypted
    #[must_use]
    pub const fn encrypted(mut self) -> Self {
        self.flags = self.flags.union(EntryFlags::ENCRYPTED);
        self
    }

    /// Encoding flags with the origin bit stripped
    pub const fn encoding_flags(&self) -> EntryFlags {
        self.flags
            .intersection(EntryFlags::ENCRYPTED.union(EntryFlags::COMPRESSED))
    }
}
