//! Error types shared across the tagwire crate.

use thiserror::Error;

use crate::transport::TransportError;

use super::types::{ContactId, TransportId};

/// Errors in the crypto provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed")]
    KeyDerivationFailed,

    /// Key material has already been erased.
    #[error("key material has been erased")]
    ErasedKey,

    /// Key material has the wrong length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected length in bytes.
        expected: usize,
        /// Actual length in bytes.
        actual: usize,
    },

    /// Connection number outside the 32-bit range keys are derived for.
    #[error("connection number {0} out of range")]
    ConnectionOutOfRange(u64),

    /// Rotation period outside the 32-bit range secrets are derived for.
    #[error("rotation period {0} out of range")]
    PeriodOutOfRange(u64),
}

/// Errors reported by a persistence store.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The contact is not known to the store.
    #[error("unknown contact {0}")]
    UnknownContact(ContactId),

    /// No outgoing connection counter exists for the endpoint and period.
    #[error("no connection counter for {contact} on {transport}, period {period}")]
    NoCounter {
        /// Contact.
        contact: ContactId,
        /// Transport.
        transport: TransportId,
        /// Rotation period.
        period: u64,
    },

    /// The connection counter ran past the 32-bit range.
    #[error("connection counter exhausted for {contact} on {transport}")]
    CounterExhausted {
        /// Contact.
        contact: ContactId,
        /// Transport.
        transport: TransportId,
    },

    /// A stored record could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),

    /// Backend failure.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Errors in the key manager.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    /// Wall-clock time is earlier than the creation time of a held secret.
    /// Fatal: no automatic recovery is attempted.
    #[error("clock moved backwards: now {now} ms, secret created at {creation} ms")]
    ClockMovedBackwards {
        /// Current wall-clock time (ms).
        now: u64,
        /// Creation time of the offending secret (ms).
        creation: u64,
    },

    /// A temporary secret has a zero rotation period.
    #[error("invalid rotation period for {contact} on {transport}")]
    InvalidRotationPeriod {
        /// Contact.
        contact: ContactId,
        /// Transport.
        transport: TransportId,
    },

    /// The key manager has not been started.
    #[error("key manager not running")]
    NotRunning,

    /// The key manager is already running.
    #[error("key manager already running")]
    AlreadyRunning,

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl KeyManagerError {
    /// Check if this error must stop key rotation for good.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            KeyManagerError::ClockMovedBackwards { .. } | KeyManagerError::Crypto(_)
        )
    }
}

/// Top-level tagwire errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Key manager error.
    #[error("key manager error: {0}")]
    KeyManager(#[from] KeyManagerError),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
