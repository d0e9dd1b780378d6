//! Erasable key material.
//!
//! Secrets never implement `Clone` or `Copy`: every copy is made explicitly
//! with [`SecretKey::duplicate`] so it can be accounted for and erased.

use rand::{rngs::OsRng, RngCore};
use zeroize::Zeroize;

use crate::core::{CryptoError, KEY_LENGTH};

/// A 32-byte symmetric secret or derived key.
///
/// The bytes are zeroized on drop and by [`SecretKey::erase`]. Crypto
/// operations refuse a key that has been erased.
pub struct SecretKey {
    key: [u8; KEY_LENGTH],
}

impl SecretKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(key: [u8; KEY_LENGTH]) -> Self {
        Self { key }
    }

    /// Create a key from a slice, which must be exactly [`KEY_LENGTH`] bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let key: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyLength {
                    expected: KEY_LENGTH,
                    actual: bytes.len(),
                })?;
        Ok(Self { key })
    }

    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LENGTH];
        OsRng.fill_bytes(&mut key);
        Self { key }
    }

    /// Get the raw key bytes.
    ///
    /// # Security
    /// Handle with care - this exposes sensitive key material.
    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Make an explicit copy of this key.
    pub fn duplicate(&self) -> Self {
        Self { key: self.key }
    }

    /// Overwrite the key with zeroes.
    pub fn erase(&mut self) {
        self.key.zeroize();
    }

    /// Check whether every byte of the key is zero.
    pub fn is_erased(&self) -> bool {
        self.key.iter().fold(0u8, |acc, b| acc | b) == 0
    }

    /// Key bytes for use in a crypto operation, or an error if erased.
    pub(crate) fn usable(&self) -> Result<&[u8; KEY_LENGTH], CryptoError> {
        if self.is_erased() {
            return Err(CryptoError::ErasedKey);
        }
        Ok(&self.key)
    }
}

impl Drop for SecretKey {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

impl PartialEq for SecretKey {
    fn eq(&self, other: &Self) -> bool {
        self.key
            .iter()
            .zip(other.key.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl Eq for SecretKey {}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// The pair of keys protecting one direction of one connection.
pub struct FrameKeys {
    /// Key for the frame cipher.
    pub cipher: SecretKey,
    /// Key for the frame MAC.
    pub mac: SecretKey,
}

impl FrameKeys {
    /// Erase both keys.
    pub fn erase(&mut self) {
        self.cipher.erase();
        self.mac.erase();
    }
}
