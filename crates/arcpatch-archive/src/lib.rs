//! Patchable content-addressed resource archive.
//!
//! An archive is an index of sorted content hashes, each mapped to a byte
//! range in a resource data blob. A shipped, read-only **bundled** archive
//! can be overlaid at runtime by a **live-update** archive that receives
//! downloaded resources without rewriting the bundled files.
//!
//! - **Index** (`.arci`): header, sorted hash section, parallel entry section
//! - **Data** (`.arcd`): concatenated resource payloads
//!
//! Lookups binary-search the hash section. Patches clone the index with
//! spare capacity, append the payload to the live-update blob, shift the
//! arrays to open a slot, and publish the patched index as a new snapshot.
//! Readers holding the previous snapshot keep using it until they drop it.
//!
//! # Storage Layout
//!
//! ```text
//! <base>/game.arci         bundled index
//! <base>/game.arcd         bundled resource data
//! <base>/liveupdate.arci   live-update index (bundled entries + patches)
//! <base>/liveupdate.arcd   live-update resource data (append-only)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use arcpatch_archive::{ArchiveConfig, PatchMeta, ResourceArchive};
//!
//! # fn example() -> arcpatch_archive::Result<()> {
//! let archive = ResourceArchive::open(ArchiveConfig::new("/path/to/resources"))?;
//!
//! let hash = arcpatch_crypto::resource_hash(b"new level data");
//! archive.apply_patch(&hash, PatchMeta::raw(14), b"new level data")?;
//!
//! let bytes = archive.read_resource(&hash)?;
//! assert_eq!(bytes, b"new level data");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![allow(clippy::must_use_candidate)]

use thiserror::Error;

// Hash keys and sorted hash sequences
pub mod hash;

// Per-resource metadata
pub mod entry;

// Archive index: header, sections, search, insertion, cloning
pub mod index;

// Resource data blobs and the resource writer
pub mod storage;

// Index + data binding
pub mod container;

// Live-update overlay resolution
pub mod overlay;

// Decryption and decompression collaborators
pub mod codec;

// Bundled archive construction
pub mod builder;

// Top-level archive (bundled + live update)
pub mod archive;

// Configuration
pub mod config;

pub use archive::{PatchSession, ResourceArchive};
pub use builder::ArchiveBuilder;
pub use codec::{
    Arc4Decryptor, ResourceCodec, ResourceDecompressor, ResourceDecryptor, ZlibDecompressor,
};
pub use config::{ArchiveConfig, LoadMode};
pub use container::ArchiveContainer;
pub use entry::{EntryFlags, EntryRecord, PatchMeta};
pub use hash::{ContentHash, MAX_HASH, PackedHashes, SortedHashes};
pub use index::{ArchiveIndex, FORMAT_VERSION, IndexHeader};
pub use overlay::{LiveUpdateEntries, ResolvedEntry, Store, cache_live_update_entries};
pub use storage::{LiveUpdateData, ResourceData, WriteResult};

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur during archive operations.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Hash is not present in the archive.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Hash is already present; duplicates are never overwritten.
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Index format version differs from the compiled version.
    #[error("Index version mismatch: found {found}, expected {expected}")]
    VersionMismatch {
        /// Version stored in the index header
        found: u32,
        /// Version this build understands
        expected: u32,
    },

    /// Section offsets, ordering or digest are inconsistent.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Buffer allocation for a clone or growth failed.
    #[error("Allocation failure: {0}")]
    AllocationFailure(String),

    /// The index has no free slot for another insertion.
    #[error("Index capacity exhausted: {capacity} slots in use")]
    CapacityExhausted {
        /// Number of slots of the exhausted index
        capacity: usize,
    },

    /// Hash is shorter than the index hash length or longer than `MAX_HASH`.
    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    /// Resource does not fit the 32-bit offsets and sizes of the format.
    #[error("Resource too large: {0}")]
    ResourceTooLarge(String),

    /// Decryption or decompression failed.
    #[error("Codec error: {0}")]
    Codec(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ArchiveError {
    /// Check if this error makes the archive unusable (no degraded mode).
    pub const fn is_fatal_for_open(&self) -> bool {
        matches!(
            self,
            Self::VersionMismatch { .. } | Self::CorruptIndex(_) | Self::Io(_)
        )
    }

    /// Check if this is the expected "absent" outcome of a lookup.
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<binrw::Error> for ArchiveError {
    fn from(err: binrw::Error) -> Self {
        match err {
            binrw::Error::Io(e) => Self::Io(e),
            other => Self::CorruptIndex(other.to_string()),
        }
    }
}

/// Version information for the archive engine.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default bundled index file name.
pub const BUNDLED_INDEX_FILE: &str = "game.arci";

/// Default bundled resource data file name.
pub const BUNDLED_DATA_FILE: &str = "game.arcd";

/// Default live-update index file name.
pub const LIVE_UPDATE_INDEX_FILE: &str = "liveupdate.arci";

/// Default live-update resource data file name.
pub const LIVE_UPDATE_DATA_FILE: &str = "liveupdate.arcd";
