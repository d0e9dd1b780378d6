//! Raw transport seams.
//!
//! A transport plugin hands the connection stack either a blocking byte
//! stream ([`TransportReader`] / [`TransportWriter`]) or blocking segment
//! I/O ([`SegmentSource`] / [`SegmentSink`]). Every handle is disposed
//! exactly once, with `exception` set when the connection failed.

use std::io::{self, Read, Write};

/// One transmission unit of a segment transport.
///
/// The segment number travels in the transport's own envelope, outside the
/// encrypted data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// `frame_number * segments_per_frame + index`.
    pub number: u64,
    /// Wire bytes: optional tag, ciphertext and MAC.
    pub data: Vec<u8>,
}

impl Segment {
    /// Create a segment.
    pub fn new(number: u64, data: Vec<u8>) -> Self {
        Self { number, data }
    }

    /// Length of the wire bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the segment carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Incoming byte stream.
pub trait TransportReader: Read + Send {
    /// Release the underlying connection.
    ///
    /// * `exception` - the connection ended with an error
    /// * `recognised` - the opening tag matched a known contact
    fn dispose(&mut self, exception: bool, recognised: bool);
}

/// Outgoing byte stream.
pub trait TransportWriter: Write + Send {
    /// Release the underlying connection.
    fn dispose(&mut self, exception: bool);
}

/// Incoming segments, possibly lost or reordered.
pub trait SegmentSource: Send {
    /// Block for the next segment. `None` means the transport is finished.
    fn read_segment(&mut self) -> io::Result<Option<Segment>>;

    /// Release the underlying connection.
    fn dispose(&mut self, exception: bool, recognised: bool);
}

/// Outgoing segments.
pub trait SegmentSink: Send {
    /// Send one segment.
    fn write_segment(&mut self, segment: Segment) -> io::Result<()>;

    /// Push buffered segments to the transport.
    fn flush(&mut self) -> io::Result<()>;

    /// Release the underlying connection.
    fn dispose(&mut self, exception: bool);
}

impl<T: TransportReader + ?Sized> TransportReader for Box<T> {
    fn dispose(&mut self, exception: bool, recognised: bool) {
        (**self).dispose(exception, recognised)
    }
}

impl<T: TransportWriter + ?Sized> TransportWriter for Box<T> {
    fn dispose(&mut self, exception: bool) {
        (**self).dispose(exception)
    }
}

impl<T: SegmentSource + ?Sized> SegmentSource for Box<T> {
    fn read_segment(&mut self) -> io::Result<Option<Segment>> {
        (**self).read_segment()
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        (**self).dispose(exception, recognised)
    }
}

impl<T: SegmentSink + ?Sized> SegmentSink for Box<T> {
    fn write_segment(&mut self, segment: Segment) -> io::Result<()> {
        (**self).write_segment(segment)
    }

    fn flush(&mut self) -> io::Result<()> {
        (**self).flush()
    }

    fn dispose(&mut self, exception: bool) {
        (**self).dispose(exception)
    }
}
