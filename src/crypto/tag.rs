//! Rendezvous tag codec.
//!
//! A tag is the PRF of a structured IV under the tag key:
//!
//! ```text
//! iv  = [ transport (4) | connection (8) | zeros (4) ]
//! tag = HMAC-SHA256(tag_key, iv)[..16]
//! ```
//!
//! Without the tag key a tag is indistinguishable from 16 random bytes.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::core::{CryptoError, MAX_32_BIT_UNSIGNED, TAG_LENGTH, Tag, TransportId};

use super::keys::SecretKey;

type HmacSha256 = Hmac<Sha256>;

/// Build the structured IV a tag is computed over.
pub fn tag_iv(transport: TransportId, connection: u64) -> [u8; TAG_LENGTH] {
    let mut iv = [0u8; TAG_LENGTH];
    iv[0..4].copy_from_slice(&transport.to_bytes());
    iv[4..12].copy_from_slice(&connection.to_be_bytes());
    iv
}

/// Compute the tag for one connection.
pub fn encode_tag(
    tag_key: &SecretKey,
    transport: TransportId,
    connection: u64,
) -> Result<Tag, CryptoError> {
    if connection > MAX_32_BIT_UNSIGNED {
        return Err(CryptoError::ConnectionOutOfRange(connection));
    }
    let key = tag_key.usable()?;
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CryptoError::KeyDerivationFailed)?;
    mac.update(&tag_iv(transport, connection));
    let full = mac.finalize().into_bytes();

    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&full[..TAG_LENGTH]);
    Ok(Tag(tag))
}
