//! Cryptographic primitives for tagwire.
//!
//! - HKDF-SHA256 derivation of tag keys, frame keys and rotated secrets
//! - XChaCha20 unit encryption with deterministic IVs
//! - Truncated HMAC-SHA256 unit authentication and tag PRF
//! - Erasable key material

mod cipher;
mod kdf;
mod keys;
mod mac;
mod provider;
mod tag;

pub use cipher::{FrameCipher, XChaChaFrameCipher, frame_iv};
pub use kdf::{derive_frame_keys, derive_next_secret, derive_tag_key};
pub use keys::{FrameKeys, SecretKey};
pub use mac::{FrameMac, HmacFrameMac};
pub use provider::{CryptoProvider, DefaultCrypto};
pub use tag::{encode_tag, tag_iv};
