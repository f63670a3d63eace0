//! Error types for cryptographic operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key size
    #[error("Invalid key size: expected 1..={max}, got {actual}")]
    InvalidKeySize {
        /// Largest accepted key size in bytes
        max: usize,
        /// Actual key size in bytes
        actual: usize,
    },

    /// Invalid digest encoding
    #[error("Invalid digest: {0}")]
    InvalidDigest(String),
}

impl From<hex::FromHexError> for CryptoError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidDigest(err.to_string())
    }
}
