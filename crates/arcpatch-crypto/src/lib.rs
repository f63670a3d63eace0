//! Digest and cipher primitives for arcpatch resource archives
//!
//! The archive engine treats digests and ciphers as opaque collaborators.
//! This crate supplies the defaults:
//!
//! - **Hashing**: MD5 for resource-identifying hashes and for the
//!   whole-index integrity digest
//! - **Encryption**: ARC4 stream cipher for resources flagged as encrypted
//!
//! # Examples
//!
//! ## Resource Hash
//!
//! ```
//! use arcpatch_crypto::md5::resource_hash;
//!
//! let hash = resource_hash(b"Hello, World!");
//! assert_eq!(hash.len(), 16);
//! ```
//!
//! ## Index Digest
//!
//! ```
//! use arcpatch_crypto::IndexDigest;
//!
//! let digest = IndexDigest::compute(&[b"header".as_slice(), b"body".as_slice()]);
//! println!("Index digest: {}", digest);
//! ```

#![warn(missing_docs)]

pub mod arc4;
pub mod error;
pub mod md5;

pub use error::CryptoError;

pub use arc4::Arc4Cipher;
pub use md5::{DIGEST_SIZE, IndexDigest, resource_hash};
