//! The crypto provider seam.
//!
//! Everything above this module reaches the primitives through
//! [`CryptoProvider`], shared as `Arc<dyn CryptoProvider>`.

use std::sync::Arc;

use crate::core::{CryptoError, Tag, TransportId};

use super::cipher::{FrameCipher, XChaChaFrameCipher};
use super::kdf;
use super::keys::{FrameKeys, SecretKey};
use super::mac::{FrameMac, HmacFrameMac};
use super::tag;

/// Key derivation, tag encoding and per-unit primitives.
pub trait CryptoProvider: Send + Sync {
    /// Derive the tag key for the party selected by `alice`.
    fn derive_tag_key(&self, secret: &SecretKey, alice: bool) -> Result<SecretKey, CryptoError>;

    /// Derive the frame keys for one direction of a connection.
    fn derive_frame_keys(
        &self,
        secret: &SecretKey,
        connection: u64,
        alice: bool,
        initiator: bool,
    ) -> Result<FrameKeys, CryptoError>;

    /// Ratchet `secret` forward into `period`.
    fn derive_next_secret(&self, secret: &SecretKey, period: u64)
    -> Result<SecretKey, CryptoError>;

    /// Compute the tag of one connection.
    fn encode_tag(
        &self,
        tag_key: &SecretKey,
        transport: TransportId,
        connection: u64,
    ) -> Result<Tag, CryptoError>;

    /// Build the unit cipher, taking ownership of the key.
    fn frame_cipher(&self, key: SecretKey) -> Result<Box<dyn FrameCipher>, CryptoError>;

    /// Build the unit MAC, taking ownership of the key.
    fn frame_mac(&self, key: SecretKey) -> Result<Box<dyn FrameMac>, CryptoError>;
}

/// HKDF-SHA256, HMAC-SHA256 and XChaCha20.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultCrypto;

impl DefaultCrypto {
    /// Shared handle to the default provider.
    pub fn shared() -> Arc<dyn CryptoProvider> {
        Arc::new(DefaultCrypto)
    }
}

impl CryptoProvider for DefaultCrypto {
    fn derive_tag_key(&self, secret: &SecretKey, alice: bool) -> Result<SecretKey, CryptoError> {
        kdf::derive_tag_key(secret, alice)
    }

    fn derive_frame_keys(
        &self,
        secret: &SecretKey,
        connection: u64,
        alice: bool,
        initiator: bool,
    ) -> Result<FrameKeys, CryptoError> {
        kdf::derive_frame_keys(secret, connection, alice, initiator)
    }

    fn derive_next_secret(
        &self,
        secret: &SecretKey,
        period: u64,
    ) -> Result<SecretKey, CryptoError> {
        kdf::derive_next_secret(secret, period)
    }

    fn encode_tag(
        &self,
        tag_key: &SecretKey,
        transport: TransportId,
        connection: u64,
    ) -> Result<Tag, CryptoError> {
        tag::encode_tag(tag_key, transport, connection)
    }

    fn frame_cipher(&self, key: SecretKey) -> Result<Box<dyn FrameCipher>, CryptoError> {
        Ok(Box::new(XChaChaFrameCipher::new(key)?))
    }

    fn frame_mac(&self, key: SecretKey) -> Result<Box<dyn FrameMac>, CryptoError> {
        Ok(Box::new(HmacFrameMac::new(key)?))
    }
}
