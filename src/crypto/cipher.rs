//! Per-unit stream encryption.
//!
//! Every frame or segment is encrypted with XChaCha20 under a deterministic
//! 24-byte IV. The IV is unique per (transport, connection, unit, kind), and
//! each direction of a connection has its own cipher key, so no keystream is
//! ever reused.

use chacha20::cipher::{KeyIvInit, StreamCipher};
use chacha20::{Key, XChaCha20, XNonce};

use crate::core::{CryptoError, IV_LENGTH, TransportId};

use super::keys::SecretKey;

/// Construct the IV for one unit.
///
/// Layout:
/// ```text
/// [ transport (4) | connection (8) | unit number (8) | kind (1) | zeros (3) ]
/// ```
///
/// All integers are big-endian. `kind` is [`IV_KIND_FRAME`] or
/// [`IV_KIND_SEGMENT`].
///
/// [`IV_KIND_FRAME`]: crate::core::IV_KIND_FRAME
/// [`IV_KIND_SEGMENT`]: crate::core::IV_KIND_SEGMENT
pub fn frame_iv(transport: TransportId, connection: u64, unit: u64, kind: u8) -> [u8; IV_LENGTH] {
    let mut iv = [0u8; IV_LENGTH];
    iv[0..4].copy_from_slice(&transport.to_bytes());
    iv[4..12].copy_from_slice(&connection.to_be_bytes());
    iv[12..20].copy_from_slice(&unit.to_be_bytes());
    iv[20] = kind;
    iv
}

/// A keyed stream cipher for frames and segments.
///
/// Encryption and decryption are the same operation.
pub trait FrameCipher: Send {
    /// XOR the keystream for `iv` into `buf`.
    fn apply_keystream(&self, iv: &[u8; IV_LENGTH], buf: &mut [u8]) -> Result<(), CryptoError>;

    /// Erase the key. Later calls fail with [`CryptoError::ErasedKey`].
    fn erase(&mut self);
}

/// XChaCha20 implementation of [`FrameCipher`].
pub struct XChaChaFrameCipher {
    key: SecretKey,
}

impl XChaChaFrameCipher {
    /// Create a cipher, taking ownership of the key.
    pub fn new(key: SecretKey) -> Result<Self, CryptoError> {
        key.usable()?;
        Ok(Self { key })
    }
}

impl FrameCipher for XChaChaFrameCipher {
    fn apply_keystream(&self, iv: &[u8; IV_LENGTH], buf: &mut [u8]) -> Result<(), CryptoError> {
        let key = self.key.usable()?;
        let mut cipher = XChaCha20::new(Key::from_slice(key), XNonce::from_slice(iv));
        cipher.apply_keystream(buf);
        Ok(())
    }

    fn erase(&mut self) {
        self.key.erase();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{IV_KIND_FRAME, IV_KIND_SEGMENT, KEY_LENGTH};

    fn cipher() -> XChaChaFrameCipher {
        XChaChaFrameCipher::new(SecretKey::from_bytes([0x42; KEY_LENGTH])).unwrap()
    }

    #[test]
    fn test_iv_layout() {
        let iv = frame_iv(TransportId(0x01020304), 5, 0x0A0B, IV_KIND_SEGMENT);
        assert_eq!(&iv[0..4], &[1, 2, 3, 4]);
        assert_eq!(&iv[4..12], &5u64.to_be_bytes());
        assert_eq!(&iv[12..20], &0x0A0Bu64.to_be_bytes());
        assert_eq!(iv[20], IV_KIND_SEGMENT);
        assert_eq!(&iv[21..], &[0u8; 3]);
    }

    #[test]
    fn test_roundtrip() {
        let c = cipher();
        let iv = frame_iv(TransportId(1), 0, 0, IV_KIND_FRAME);
        let plaintext = b"frame plaintext".to_vec();
        let mut buf = plaintext.clone();

        c.apply_keystream(&iv, &mut buf).unwrap();
        assert_ne!(buf, plaintext);
        c.apply_keystream(&iv, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_distinct_ivs_distinct_keystreams() {
        let c = cipher();
        let mut a = [0u8; 32];
        let mut b = [0u8; 32];
        let mut s = [0u8; 32];
        c.apply_keystream(&frame_iv(TransportId(1), 0, 0, IV_KIND_FRAME), &mut a)
            .unwrap();
        c.apply_keystream(&frame_iv(TransportId(1), 0, 1, IV_KIND_FRAME), &mut b)
            .unwrap();
        c.apply_keystream(&frame_iv(TransportId(1), 0, 0, IV_KIND_SEGMENT), &mut s)
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a, s);
    }

    #[test]
    fn test_erased_cipher_fails() {
        let mut c = cipher();
        c.erase();
        let mut buf = [0u8; 4];
        assert_eq!(
            c.apply_keystream(&[0u8; IV_LENGTH], &mut buf),
            Err(CryptoError::ErasedKey)
        );
        assert!(XChaChaFrameCipher::new(SecretKey::from_bytes([0; KEY_LENGTH])).is_err());
    }
}
