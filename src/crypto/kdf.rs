//! Key derivation for tags, frames, and secret rotation.
//!
//! Every derived key is `HKDF-Expand(secret, label || BE64(context))` with
//! SHA-256. The temporary secret is used directly as the PRK:
//!
//! ```text
//! tag_key    = Expand(secret, "A_TAG\0" | "B_TAG\0", 0)
//! frame_keys = Expand(secret, "{A,B}_FRAME_{A,B}\0", connection)  (64 bytes)
//! next       = Expand(secret, "ROTATE\0", period)
//! ```

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::core::{
    CryptoError, KEY_LENGTH, LABEL_A_FRAME_A, LABEL_A_FRAME_B, LABEL_A_TAG, LABEL_B_FRAME_A,
    LABEL_B_FRAME_B, LABEL_B_TAG, LABEL_ROTATE, MAX_32_BIT_UNSIGNED,
};

use super::keys::{FrameKeys, SecretKey};

fn expand(
    secret: &SecretKey,
    label: &[u8],
    context: u64,
    output: &mut [u8],
) -> Result<(), CryptoError> {
    let prk = secret.usable()?;
    let hk = Hkdf::<Sha256>::from_prk(prk).map_err(|_| CryptoError::KeyDerivationFailed)?;

    let mut info = Vec::with_capacity(label.len() + 8);
    info.extend_from_slice(label);
    info.extend_from_slice(&context.to_be_bytes());

    hk.expand(&info, output)
        .map_err(|_| CryptoError::KeyDerivationFailed)
}

/// Derive the key used to encode tags for one party.
///
/// `alice` selects the party whose tags are being encoded.
pub fn derive_tag_key(secret: &SecretKey, alice: bool) -> Result<SecretKey, CryptoError> {
    let label = if alice { LABEL_A_TAG } else { LABEL_B_TAG };
    let mut key = [0u8; KEY_LENGTH];
    expand(secret, label, 0, &mut key)?;
    let derived = SecretKey::from_bytes(key);
    key.zeroize();
    Ok(derived)
}

/// Derive the cipher and MAC keys for one direction of one connection.
///
/// * `alice` - whether the writing party plays Alice
/// * `initiator` - whether the writing party opened the connection
pub fn derive_frame_keys(
    secret: &SecretKey,
    connection: u64,
    alice: bool,
    initiator: bool,
) -> Result<FrameKeys, CryptoError> {
    if connection > MAX_32_BIT_UNSIGNED {
        return Err(CryptoError::ConnectionOutOfRange(connection));
    }
    let label = match (alice, initiator) {
        (true, true) => LABEL_A_FRAME_A,
        (true, false) => LABEL_A_FRAME_B,
        (false, true) => LABEL_B_FRAME_A,
        (false, false) => LABEL_B_FRAME_B,
    };

    let mut material = [0u8; 2 * KEY_LENGTH];
    expand(secret, label, connection, &mut material)?;

    let mut cipher = [0u8; KEY_LENGTH];
    let mut mac = [0u8; KEY_LENGTH];
    cipher.copy_from_slice(&material[..KEY_LENGTH]);
    mac.copy_from_slice(&material[KEY_LENGTH..]);
    let keys = FrameKeys {
        cipher: SecretKey::from_bytes(cipher),
        mac: SecretKey::from_bytes(mac),
    };

    material.zeroize();
    cipher.zeroize();
    mac.zeroize();
    Ok(keys)
}

/// Ratchet a temporary secret forward into `period`.
///
/// One-way: the input secret cannot be recovered from the output.
pub fn derive_next_secret(secret: &SecretKey, period: u64) -> Result<SecretKey, CryptoError> {
    if period > MAX_32_BIT_UNSIGNED {
        return Err(CryptoError::PeriodOutOfRange(period));
    }
    let mut next = [0u8; KEY_LENGTH];
    expand(secret, LABEL_ROTATE, period, &mut next)?;
    let derived = SecretKey::from_bytes(next);
    next.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret() -> SecretKey {
        SecretKey::from_bytes([0x42; KEY_LENGTH])
    }

    #[test]
    fn test_tag_keys_differ_by_party() {
        let a = derive_tag_key(&secret(), true).unwrap();
        let b = derive_tag_key(&secret(), false).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, derive_tag_key(&secret(), true).unwrap());
    }

    #[test]
    fn test_frame_keys_all_directions_distinct() {
        let mut keys = Vec::new();
        for alice in [true, false] {
            for initiator in [true, false] {
                keys.push(derive_frame_keys(&secret(), 7, alice, initiator).unwrap());
            }
        }
        for i in 0..keys.len() {
            assert_ne!(keys[i].cipher, keys[i].mac);
            for j in (i + 1)..keys.len() {
                assert_ne!(keys[i].cipher, keys[j].cipher);
                assert_ne!(keys[i].mac, keys[j].mac);
            }
        }
    }

    #[test]
    fn test_frame_keys_depend_on_connection() {
        let k0 = derive_frame_keys(&secret(), 0, true, true).unwrap();
        let k1 = derive_frame_keys(&secret(), 1, true, true).unwrap();
        assert_ne!(k0.cipher, k1.cipher);
    }

    #[test]
    fn test_connection_range() {
        assert!(derive_frame_keys(&secret(), MAX_32_BIT_UNSIGNED, true, true).is_ok());
        assert!(matches!(
            derive_frame_keys(&secret(), MAX_32_BIT_UNSIGNED + 1, true, true),
            Err(CryptoError::ConnectionOutOfRange(_))
        ));
    }

    #[test]
    fn test_next_secret_chain() {
        let s0 = secret();
        let s1 = derive_next_secret(&s0, 1).unwrap();
        let s2 = derive_next_secret(&s1, 2).unwrap();
        assert_ne!(s0, s1);
        assert_ne!(s1, s2);
        // Deterministic
        assert_eq!(s1, derive_next_secret(&s0, 1).unwrap());
        // Context matters
        assert_ne!(s1, derive_next_secret(&s0, 2).unwrap());
    }

    #[test]
    fn test_erased_secret_rejected() {
        let mut s = secret();
        s.erase();
        assert_eq!(derive_tag_key(&s, true).unwrap_err(), CryptoError::ErasedKey);
        assert_eq!(
            derive_next_secret(&s, 1).unwrap_err(),
            CryptoError::ErasedKey
        );
    }
}
