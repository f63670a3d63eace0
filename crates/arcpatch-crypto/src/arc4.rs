//! ARC4 (RC4-compatible) stream cipher for encrypted archive resources.
//!
//! Resources whose entry record carries the encrypted flag are stored
//! XORed with an ARC4 keystream. The cipher is symmetric: the same call
//! encrypts at build time and decrypts when a resource is materialized.
//!
//! ## Security Warning
//!
//! ARC4 has known cryptographic weaknesses. It obfuscates shipped game
//! data; it does not protect secrets.
//!
//! ## Usage
//!
//! ```rust
//! use arcpatch_crypto::arc4::Arc4Cipher;
//!
//! let key = b"resource-key";
//! let mut data = b"Hello, World!".to_vec();
//!
//! Arc4Cipher::new(key).expect("valid key").apply_keystream(&mut data);
//! Arc4Cipher::new(key).expect("valid key").apply_keystream(&mut data);
//! assert_eq!(&data[..], b"Hello, World!");
//! ```

use crate::CryptoError;

/// Longest accepted ARC4 key in bytes.
pub const MAX_KEY_SIZE: usize = 256;

/// ARC4 stream cipher.
///
/// Maintains the S-box permutation and the two PRGA indices. A fresh
/// instance must be created per resource so that every payload starts at
/// keystream position zero.
pub struct Arc4Cipher {
    /// S-box state (256 bytes)
    s: [u8; 256],
    i: u8,
    j: u8,
}

impl Arc4Cipher {
    /// Create a new ARC4 cipher with the given key.
    ///
    /// # Errors
    ///
    /// Returns `CryptoError::InvalidKeySize` if the key is empty or longer than 256 bytes.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.is_empty() || key.len() > MAX_KEY_SIZE {
            return Err(CryptoError::InvalidKeySize {
                max: MAX_KEY_SIZE,
                actual: key.len(),
            });
        }

        let mut cipher = Self {
            s: [0; 256],
            i: 0,
            j: 0,
        };

        #[allow(clippy::cast_possible_truncation)] // i is 0..256
        for i in 0..256 {
            cipher.s[i] = i as u8;
        }

        // Key-scheduling algorithm (KSA)
        let mut j = 0u8;
        for i in 0..256 {
            j = j.wrapping_add(cipher.s[i]).wrapping_add(key[i % key.len()]);
            cipher.s.swap(i, j as usize);
        }

        Ok(cipher)
    }

    fn next_keystream_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.j = self.j.wrapping_add(self.s[self.i as usize]);

        self.s.swap(self.i as usize, self.j as usize);

        let k = self.s[self.i as usize].wrapping_add(self.s[self.j as usize]);
        self.s[k as usize]
    }

    /// XOR the keystream into a copy of `data`.
    pub fn encrypt(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_keystream(&mut out);
        out
    }

    /// Identical to [`encrypt`](Self::encrypt); provided for call-site clarity.
    pub fn decrypt(&mut self, data: &[u8]) -> Vec<u8> {
        self.encrypt(data)
    }

    /// Apply the keystream to `data` in place.
    pub fn apply_keystream(&mut self, data: &mut [u8]) {
        for byte in data {
            *byte ^= self.next_keystream_byte();
        }
    }
}
