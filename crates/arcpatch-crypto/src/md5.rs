//! MD5 hashing for resource hashes and index digests

use md5::{Digest, Md5};
use std::fmt;

use crate::CryptoError;

/// Size of an MD5 digest in bytes
pub const DIGEST_SIZE: usize = 16;

/// Compute the content hash that identifies a resource payload
pub fn resource_hash(data: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Whole-index integrity digest stored in the archive index header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexDigest([u8; DIGEST_SIZE]);

impl IndexDigest {
    /// Create a digest from raw bytes
    pub const fn from_bytes(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }

    /// Compute the digest over a sequence of byte ranges, in order.
    ///
    /// Feeding the parts separately yields the same digest as feeding
    /// their concatenation.
    pub fn compute(parts: &[&[u8]]) -> Self {
        let mut hasher = Md5::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.finalize().into())
    }

    /// Parse a digest from a hex string
    pub fn from_hex(hex: &str) -> Result<Self, CryptoError> {
        let mut bytes = [0u8; DIGEST_SIZE];
        hex::decode_to_slice(hex, &mut bytes)?;
        Ok(Self(bytes))
    }

    /// Get raw bytes
    pub const fn as_bytes(&self) -> &[u8; DIGEST_SIZE] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for IndexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl From<[u8; DIGEST_SIZE]> for IndexDigest {
    fn from(bytes: [u8; DIGEST_SIZE]) -> Self {
        Self(bytes)
    }
}
