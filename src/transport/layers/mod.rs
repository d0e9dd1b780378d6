//! Composable connection layers.
//!
//! Outgoing, each layer wraps the one below it:
//!
//! ```text
//! ConnectionWriter
//!   -> [OutgoingErrorCorrectionLayer]   frame -> n segments
//!   -> OutgoingEncryptionLayer          plaintext -> ciphertext
//!   -> OutgoingAuthenticationLayer      ciphertext -> ciphertext || MAC
//!   -> StreamUnitWriter | SegmentUnitWriter   (tag prefix, raw transport)
//! ```
//!
//! Incoming is the mirror image, finishing with the reliability layer that
//! restores frame order. Layers pass [`Unit`]s, numbered by frame in stream
//! mode and by segment in segmented mode.

mod authentication;
mod encryption;
mod erasure;
mod framing;
mod reliability;
mod wire;

pub use authentication::{IncomingAuthenticationLayer, OutgoingAuthenticationLayer};
pub use encryption::{IncomingEncryptionLayer, OutgoingEncryptionLayer};
pub use erasure::{
    IncomingErrorCorrectionLayer, OutgoingErrorCorrectionLayer, decode_frame, encode_frame,
};
pub use framing::StreamFrameDecoder;
pub use reliability::IncomingReliabilityLayer;
pub use wire::{SegmentUnitReader, SegmentUnitWriter, StreamUnitReader, StreamUnitWriter};

use super::error::TransportResult;
use super::frame::Frame;

/// A numbered frame or segment on its way through the layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Frame number (stream mode) or segment number (segmented mode).
    pub number: u64,
    /// Plaintext, ciphertext or ciphertext plus MAC, depending on the layer.
    pub data: Vec<u8>,
}

impl Unit {
    /// Create a unit.
    pub fn new(number: u64, data: Vec<u8>) -> Self {
        Self { number, data }
    }
}

/// Destination of outgoing units.
pub trait UnitSink: Send {
    /// Pass one unit down the stack.
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()>;

    /// Flush the raw transport.
    fn flush(&mut self) -> TransportResult<()>;

    /// Erase keys and release the raw transport.
    fn dispose(&mut self, exception: bool);
}

/// Origin of incoming units.
pub trait UnitSource: Send {
    /// Next unit, or `None` at a clean end of the connection.
    fn read_unit(&mut self) -> TransportResult<Option<Unit>>;

    /// Erase keys and release the raw transport.
    fn dispose(&mut self, exception: bool, recognised: bool);
}

/// Origin of decoded, validated frames.
pub trait FrameSource: Send {
    /// Next frame, or `None` at a clean end of the connection.
    fn read_frame(&mut self) -> TransportResult<Option<Frame>>;

    /// Erase keys and release the raw transport.
    fn dispose(&mut self, exception: bool, recognised: bool);
}

impl<T: UnitSink + ?Sized> UnitSink for Box<T> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        (**self).write_unit(number, data)
    }

    fn flush(&mut self) -> TransportResult<()> {
        (**self).flush()
    }

    fn dispose(&mut self, exception: bool) {
        (**self).dispose(exception)
    }
}

impl<T: UnitSource + ?Sized> UnitSource for Box<T> {
    fn read_unit(&mut self) -> TransportResult<Option<Unit>> {
        (**self).read_unit()
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        (**self).dispose(exception, recognised)
    }
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn read_frame(&mut self) -> TransportResult<Option<Frame>> {
        (**self).read_frame()
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        (**self).dispose(exception, recognised)
    }
}
