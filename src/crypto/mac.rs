//! Per-unit message authentication.
//!
//! `MAC = HMAC-SHA256(mac_key, BE64(unit) || ciphertext)[..16]`. Binding the
//! unit number stops a valid unit being replayed at another position.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::{CryptoError, MAC_LENGTH};

use super::keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// A keyed MAC over unit ciphertexts.
pub trait FrameMac: Send {
    /// Compute the MAC of one unit.
    fn compute(&self, unit: u64, ciphertext: &[u8]) -> Result<[u8; MAC_LENGTH], CryptoError>;

    /// Verify a received MAC in constant time.
    fn verify(&self, unit: u64, ciphertext: &[u8], mac: &[u8]) -> Result<bool, CryptoError>;

    /// Erase the key. Later calls fail with [`CryptoError::ErasedKey`].
    fn erase(&mut self);
}

/// HMAC-SHA256 implementation of [`FrameMac`].
pub struct HmacFrameMac {
    key: SecretKey,
}

impl HmacFrameMac {
    /// Create a MAC, taking ownership of the key.
    pub fn new(key: SecretKey) -> Result<Self, CryptoError> {
        key.usable()?;
        Ok(Self { key })
    }

    fn keyed(&self, unit: u64, ciphertext: &[u8]) -> Result<HmacSha256, CryptoError> {
        let key = self.key.usable()?;
        let mut mac =
            HmacSha256::new_from_slice(key).map_err(|_| CryptoError::KeyDerivationFailed)?;
        mac.update(&unit.to_be_bytes());
        mac.update(ciphertext);
        Ok(mac)
    }
}

impl FrameMac for HmacFrameMac {
    fn compute(&self, unit: u64, ciphertext: &[u8]) -> Result<[u8; MAC_LENGTH], CryptoError> {
        let full = self.keyed(unit, ciphertext)?.finalize().into_bytes();
        let mut out = [0u8; MAC_LENGTH];
        out.copy_from_slice(&full[..MAC_LENGTH]);
        Ok(out)
    }

    fn verify(&self, unit: u64, ciphertext: &[u8], mac: &[u8]) -> Result<bool, CryptoError> {
        if mac.len() != MAC_LENGTH {
            return Ok(false);
        }
        Ok(self
            .keyed(unit, ciphertext)?
            .verify_truncated_left(mac)
            .is_ok())
    }

    fn erase(&mut self) {
        self.key.erase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KEY_LENGTH;

    fn mac() -> HmacFrameMac {
        HmacFrameMac::new(SecretKey::from_bytes([0x24; KEY_LENGTH])).unwrap()
    }

    #[test]
    fn test_compute_verify() {
        let m = mac();
        let tag = m.compute(3, b"ciphertext").unwrap();
        assert!(m.verify(3, b"ciphertext", &tag).unwrap());
    }

    #[test]
    fn test_verify_rejects_changes() {
        let m = mac();
        let tag = m.compute(3, b"ciphertext").unwrap();

        assert!(!m.verify(4, b"ciphertext", &tag).unwrap());
        assert!(!m.verify(3, b"ciphertexu", &tag).unwrap());

        let mut flipped = tag;
        flipped[0] ^= 0x01;
        assert!(!m.verify(3, b"ciphertext", &flipped).unwrap());
        assert!(!m.verify(3, b"ciphertext", &tag[..8]).unwrap());
    }

    #[test]
    fn test_different_keys_disagree() {
        let other = HmacFrameMac::new(SecretKey::from_bytes([0x25; KEY_LENGTH])).unwrap();
        let tag = mac().compute(0, b"data").unwrap();
        assert!(!other.verify(0, b"data", &tag).unwrap());
    }
}
