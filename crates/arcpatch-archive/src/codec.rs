//! Decryption and decompression of stored payloads.
//!
//! Entries flagged [`EntryFlags::ENCRYPTED`](crate::EntryFlags::ENCRYPTED)
//! are decrypted first, then entries flagged
//! [`EntryFlags::COMPRESSED`](crate::EntryFlags::COMPRESSED) are
//! decompressed. Both steps sit behind traits so the embedding application
//! can supply its own algorithms.

use std::io::{Read, Write};
use std::sync::Arc;

use arcpatch_crypto::Arc4Cipher;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;

use crate::entry::EntryRecord;
use crate::{ArchiveError, Result};

/// Upper bound on the output buffer reserved before decompressing.
///
/// Sizes come from index records, so larger outputs grow as bytes arrive.
const MAX_PREALLOCATION: usize = 1 << 20;

/// Decrypts payload bytes in place.
pub trait ResourceDecryptor: Send + Sync {
    /// Decrypt `data` in place.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Codec` if the payload cannot be decrypted.
    fn decrypt(&self, data: &mut [u8]) -> Result<()>;
}

/// Expands compressed payloads.
pub trait ResourceDecompressor: Send + Sync {
    /// Decompress `data`, which must expand to exactly `uncompressed_size`
    /// bytes.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Codec` if the stream is malformed.
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>>;
}

/// ARC4 stream decryption with a fixed resource key.
pub struct Arc4Decryptor {
    key: Vec<u8>,
}

impl Arc4Decryptor {
    /// Create a decryptor for `key` (1 to 256 bytes).
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Codec` for an invalid key length.
    pub fn new(key: &[u8]) -> Result<Self> {
        Arc4Cipher::new(key).map_err(|e| ArchiveError::Codec(e.to_string()))?;
        Ok(Self { key: key.to_vec() })
    }
}

impl ResourceDecryptor for Arc4Decryptor {
    fn decrypt(&self, data: &mut [u8]) -> Result<()> {
        let mut cipher = Arc4Cipher::new(&self.key).map_err(|e| ArchiveError::Codec(e.to_string()))?;
        cipher.apply_keystream(data);
        Ok(())
    }
}

impl std::fmt::Debug for Arc4Decryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arc4Decryptor")
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Zlib decompression through `flate2`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibDecompressor;

impl ResourceDecompressor for ZlibDecompressor {
    fn decompress(&self, data: &[u8], uncompressed_size: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(uncompressed_size.min(MAX_PREALLOCATION));
        // One byte past the expected size is enough to detect overlong streams
        ZlibDecoder::new(data)
            .take((uncompressed_size as u64).saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| ArchiveError::Codec(format!("zlib stream: {e}")))?;
        Ok(out)
    }
}

/// Compress `data` with zlib at the default level.
///
/// # Errors
///
/// Returns `ArchiveError::Codec` if the encoder fails.
pub fn compress_zlib(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| ArchiveError::Codec(format!("zlib stream: {e}")))?;
    encoder
        .finish()
        .map_err(|e| ArchiveError::Codec(format!("zlib stream: {e}")))
}

/// Turns stored payload bytes into resource bytes according to entry flags.
#[derive(Clone)]
pub struct ResourceCodec {
    decryptor: Option<Arc<dyn ResourceDecryptor>>,
    decompressor: Arc<dyn ResourceDecompressor>,
}

impl Default for ResourceCodec {
    fn default() -> Self {
        Self {
            decryptor: None,
            decompressor: Arc::new(ZlibDecompressor),
        }
    }
}

impl ResourceCodec {
    /// Codec without decryption and with zlib decompression
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the decryptor for encrypted entries
    #[must_use]
    pub fn with_decryptor(mut self, decryptor: Arc<dyn ResourceDecryptor>) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Replace the decompressor for compressed entries
    #[must_use]
    pub fn with_decompressor(mut self, decompressor: Arc<dyn ResourceDecompressor>) -> Self {
        self.decompressor = decompressor;
        self
    }

    /// Decrypt then decompress `stored` per `entry`'s flags.
    ///
    /// # Errors
    ///
    /// Returns `ArchiveError::Codec` if an encrypted entry has no
    /// decryptor, a codec step fails, or the result is not
    /// `entry.uncompressed_size` bytes long.
    pub fn materialize(&self, entry: &EntryRecord, mut stored: Vec<u8>) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            let decryptor = self.decryptor.as_ref().ok_or_else(|| {
                ArchiveError::Codec("encrypted resource but no decryptor configured".to_string())
            })?;
            decryptor.decrypt(&mut stored)?;
        }

        let expected = entry.uncompressed_size as usize;
        let data = if entry.is_compressed() {
            self.decompressor.decompress(&stored, expected)?
        } else {
            stored
        };

        if data.len() != expected {
            return Err(ArchiveError::Codec(format!(
                "resource decoded to {} bytes, entry declares {expected}",
                data.len()
            )));
        }
        Ok(data)
    }
}

impl std::fmt::Debug for ResourceCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceCodec")
            .field("decryptor", &self.decryptor.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::entry::EntryFlags;
    use pretty_assertions::assert_eq;

    const KEY: &[u8] = b"resource-key";

    fn encrypt(data: &[u8]) -> Vec<u8> {
        Arc4Cipher::new(KEY).expect("cipher").encrypt(data)
    }

    #[test]
    fn test_raw_passthrough() {
        let codec = ResourceCodec::new();
        let entry = EntryRecord::new(0, 0, 5, EntryFlags::empty());
        assert_eq!(codec.materialize(&entry, b"hello".to_vec()).expect("raw"), b"hello");
    }

    #[test]
    fn test_compressed_and_encrypted() {
        let plain = b"level geometry ".repeat(20);
        let packed = compress_zlib(&plain).expect("compress");
        let stored = encrypt(&packed);

        let codec = ResourceCodec::new()
            .with_decryptor(Arc::new(Arc4Decryptor::new(KEY).expect("decryptor")));
        let entry = EntryRecord::new(
            0,
            u32::try_from(stored.len()).expect("size"),
            u32::try_from(plain.len()).expect("size"),
            EntryFlags::ENCRYPTED | EntryFlags::COMPRESSED,
        );
        assert_eq!(codec.materialize(&entry, stored).expect("decode"), plain);
    }

    #[test]
    fn test_missing_decryptor() {
        let entry = EntryRecord::new(0, 0, 3, EntryFlags::ENCRYPTED);
        assert!(matches!(
            ResourceCodec::new().materialize(&entry, encrypt(b"abc")),
            Err(ArchiveError::Codec(_))
        ));
    }

    #[test]
    fn test_size_mismatch_detected() {
        let packed = compress_zlib(b"abcdef").expect("compress");
        let entry = EntryRecord::new(0, 1, 4, EntryFlags::COMPRESSED);
        assert!(matches!(
            ResourceCodec::new().materialize(&entry, packed),
            Err(ArchiveError::Codec(_))
        ));

        let garbage = EntryRecord::new(0, 1, 4, EntryFlags::COMPRESSED);
        assert!(matches!(
            ResourceCodec::new().materialize(&garbage, vec![1, 2, 3]),
            Err(ArchiveError::Codec(_))
        ));
    }

    #[test]
    fn test_invalid_key() {
        assert!(matches!(
            Arc4Decryptor::new(&[]),
            Err(ArchiveError::Codec(_))
        ));
    }

    #[test]
    fn test_oversized_declared_size_is_not_reserved() {
        let packed = compress_zlib(b"short resource").expect("compress");
        let out = ZlibDecompressor
            .decompress(&packed, u32::MAX as usize)
            .expect("decompress");
        assert_eq!(out, b"short resource");
        assert!(out.capacity() <= MAX_PREALLOCATION);

        let entry = EntryRecord::new(0, 1, u32::MAX, EntryFlags::COMPRESSED);
        assert!(matches!(
            ResourceCodec::new().materialize(&entry, packed),
            Err(ArchiveError::Codec(_))
        ));
    }
}
