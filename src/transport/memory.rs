//! In-memory raw transports.
//!
//! Byte and segment transports backed by shared buffers, for tests and for
//! embedding the connection stack where the raw bytes are moved by other
//! means.

use std::collections::VecDeque;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::io::{Segment, SegmentSink, SegmentSource, TransportReader, TransportWriter};

/// How a transport handle was disposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disposal {
    /// The connection ended with an error.
    pub exception: bool,
    /// The opening tag was recognised. Always `true` for outgoing handles.
    pub recognised: bool,
}

/// Observes the disposal of a transport handle after it has been moved
/// into a connection.
#[derive(Debug, Clone, Default)]
pub struct DisposalProbe(Arc<Mutex<Option<Disposal>>>);

impl DisposalProbe {
    /// The recorded disposal, if the handle has been disposed.
    pub fn get(&self) -> Option<Disposal> {
        *self.0.lock()
    }

    fn record(&self, exception: bool, recognised: bool) {
        let mut slot = self.0.lock();
        debug_assert!(slot.is_none(), "transport disposed twice");
        *slot = Some(Disposal {
            exception,
            recognised,
        });
    }
}

/// Byte stream reader over a fixed buffer.
#[derive(Debug)]
pub struct MemoryReader {
    cursor: Cursor<Vec<u8>>,
    probe: DisposalProbe,
}

impl MemoryReader {
    /// Create a reader that yields `bytes` and then end of stream.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            cursor: Cursor::new(bytes),
            probe: DisposalProbe::default(),
        }
    }

    /// Handle for checking how the reader was disposed.
    pub fn probe(&self) -> DisposalProbe {
        self.probe.clone()
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl TransportReader for MemoryReader {
    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.probe.record(exception, recognised);
    }
}

/// Byte stream writer into a shared buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
    probe: DisposalProbe,
}

impl MemoryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything written so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer.lock().clone()
    }

    /// Handle for checking how the writer was disposed.
    pub fn probe(&self) -> DisposalProbe {
        self.probe.clone()
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportWriter for MemoryWriter {
    fn dispose(&mut self, exception: bool) {
        self.probe.record(exception, true);
    }
}

/// Segment source replaying a queue of segments.
#[derive(Debug)]
pub struct MemorySegmentSource {
    queue: VecDeque<Segment>,
    probe: DisposalProbe,
}

impl MemorySegmentSource {
    /// Create a source that yields `segments` in order and then finishes.
    pub fn new(segments: impl IntoIterator<Item = Segment>) -> Self {
        Self {
            queue: segments.into_iter().collect(),
            probe: DisposalProbe::default(),
        }
    }

    /// Handle for checking how the source was disposed.
    pub fn probe(&self) -> DisposalProbe {
        self.probe.clone()
    }
}

impl SegmentSource for MemorySegmentSource {
    fn read_segment(&mut self) -> io::Result<Option<Segment>> {
        Ok(self.queue.pop_front())
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.probe.record(exception, recognised);
    }
}

/// Segment sink collecting segments in a shared list.
#[derive(Debug, Clone, Default)]
pub struct MemorySegmentSink {
    segments: Arc<Mutex<Vec<Segment>>>,
    probe: DisposalProbe,
}

impl MemorySegmentSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every segment written so far.
    pub fn segments(&self) -> Vec<Segment> {
        self.segments.lock().clone()
    }

    /// Handle for checking how the sink was disposed.
    pub fn probe(&self) -> DisposalProbe {
        self.probe.clone()
    }
}

impl SegmentSink for MemorySegmentSink {
    fn write_segment(&mut self, segment: Segment) -> io::Result<()> {
        self.segments.lock().push(segment);
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn dispose(&mut self, exception: bool) {
        self.probe.record(exception, true);
    }
}
