//! Transport layer error types.
//!
//! Every error here ends the connection without anything being written
//! back: a peer must not be able to tell a rejected connection from random
//! garbage being dropped.

use std::io;

use thiserror::Error;

use crate::core::CryptoError;

/// Malformed or out-of-window input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FormatError {
    /// A unit ended before its declared length.
    #[error("unit truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Expected length.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// The header's lengths do not add up to the unit length.
    #[error("invalid lengths: payload {payload} + padding {padding} != body {body}")]
    InvalidLengths {
        /// Declared payload length.
        payload: usize,
        /// Declared padding length.
        padding: usize,
        /// Body bytes available after the header.
        body: usize,
    },

    /// Padding bytes were not all zero.
    #[error("non-zero padding")]
    NonZeroPadding,

    /// The frame number is not the one expected at this position.
    #[error("unexpected frame number: expected {expected}, got {actual}")]
    UnexpectedFrameNumber {
        /// Expected frame number.
        expected: u64,
        /// Frame number found.
        actual: u64,
    },

    /// A frame was already delivered or buffered.
    #[error("duplicate frame {0}")]
    DuplicateFrame(u64),

    /// A frame arrived too far ahead of the next expected frame.
    #[error("frame {frame} outside window starting at {base}")]
    OutOfWindow {
        /// Offending frame number.
        frame: u64,
        /// Next expected frame number.
        base: u64,
    },

    /// Too many segments of one frame were discarded.
    #[error("too many discarded segments for frame {frame}")]
    TooManyDiscards {
        /// Frame number.
        frame: u64,
    },

    /// A segment did not have the expected shape.
    #[error("invalid segment {segment}: {reason}")]
    InvalidSegment {
        /// Segment number.
        segment: u64,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// The opening tag did not match any expected tag.
    #[error("unrecognised tag")]
    BadTag,
}

/// Transport layer errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Malformed input.
    #[error("format error: {0}")]
    Format(#[from] FormatError),

    /// Underlying transport failure.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A unit's MAC did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The frame counter ran past the 32-bit range.
    /// The writer is unusable from here on.
    #[error("frame counter exhausted - connection must be closed")]
    CounterExhausted,

    /// The connection was already closed, possibly by an earlier error.
    #[error("connection closed")]
    ConnectionClosed,

    /// Key derivation or primitive failure.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

impl TransportError {
    /// Check if this error must be met with a silent drop.
    pub fn is_silent_drop(&self) -> bool {
        matches!(
            self,
            TransportError::Format(_) | TransportError::AuthenticationFailed
        )
    }

    /// Check if this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Io(e) if e.kind() == io::ErrorKind::Interrupted)
    }

    /// Check if this error is a security-related error.
    pub fn is_security_error(&self) -> bool {
        matches!(
            self,
            TransportError::AuthenticationFailed
                | TransportError::CounterExhausted
                | TransportError::Format(FormatError::BadTag)
                | TransportError::Format(FormatError::DuplicateFrame(_))
                | TransportError::Format(FormatError::OutOfWindow { .. })
        )
    }

    /// Find the transport error carried inside an I/O error, if any.
    ///
    /// [`ConnectionReader`](super::ConnectionReader) and
    /// [`ConnectionWriter`](super::ConnectionWriter) report failures through
    /// `std::io::Error`; this recovers the typed cause.
    pub fn from_io(err: &io::Error) -> Option<&TransportError> {
        err.get_ref()?.downcast_ref::<TransportError>()
    }
}

impl From<TransportError> for io::Error {
    fn from(err: TransportError) -> Self {
        let kind = match &err {
            TransportError::Io(e) => e.kind(),
            TransportError::Format(FormatError::Truncated { .. }) => io::ErrorKind::UnexpectedEof,
            TransportError::Format(_) | TransportError::AuthenticationFailed => {
                io::ErrorKind::InvalidData
            }
            TransportError::ConnectionClosed => io::ErrorKind::NotConnected,
            TransportError::CounterExhausted | TransportError::Crypto(_) => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
