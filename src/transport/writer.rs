//! Blocking payload writer for one connection.

use std::io::{self, Write};

use tracing::{debug, error};

use super::error::{TransportError, TransportResult};
use super::frame::{encode_plaintext, max_payload_length, plaintext_length};
use super::layers::UnitSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Closed,
    Failed,
}

/// Writes application bytes into frames.
///
/// Bytes are buffered until a frame is full or [`flush`](Write::flush) is
/// called. Every frame is padded to the connection's frame length. Any
/// error erases the keys and disposes of the raw transport; the writer is
/// unusable afterwards.
pub struct ConnectionWriter {
    sink: Box<dyn UnitSink>,
    buffer: Vec<u8>,
    max_payload: usize,
    plaintext_length: usize,
    next_frame: u64,
    state: State,
}

impl ConnectionWriter {
    pub(crate) fn new(sink: Box<dyn UnitSink>, frame_length: usize) -> Self {
        let max_payload = max_payload_length(frame_length);
        Self {
            sink,
            buffer: Vec::with_capacity(max_payload),
            max_payload,
            plaintext_length: plaintext_length(frame_length),
            next_frame: 0,
            state: State::Open,
        }
    }

    /// Largest payload carried by one frame.
    pub fn max_payload_length(&self) -> usize {
        self.max_payload
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> u64 {
        self.next_frame
    }

    /// Flush buffered bytes, erase keys and release the transport.
    pub fn close(mut self) -> io::Result<()> {
        self.finish()
    }

    fn finish(&mut self) -> io::Result<()> {
        if self.state != State::Open {
            return Ok(());
        }
        let flushed = self.write_pending().and_then(|()| self.sink.flush());
        match flushed {
            Ok(()) => {
                self.state = State::Closed;
                debug!(frames = self.next_frame, "connection writer closed");
                self.sink.dispose(false);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    fn check_open(&self) -> TransportResult<()> {
        match self.state {
            State::Open => Ok(()),
            State::Closed | State::Failed => Err(TransportError::ConnectionClosed),
        }
    }

    fn write_pending(&mut self) -> TransportResult<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.write_frame()
    }

    fn write_frame(&mut self) -> TransportResult<()> {
        let plaintext = encode_plaintext(self.next_frame, &self.buffer, self.plaintext_length)?;
        self.sink.write_unit(self.next_frame, &plaintext)?;
        self.next_frame += 1;
        self.buffer.clear();
        Ok(())
    }

    fn fail(&mut self, err: TransportError) -> io::Error {
        if matches!(err, TransportError::CounterExhausted) {
            error!("frame counter exhausted, closing connection");
        } else {
            debug!(error = %err, "connection writer failed");
        }
        if self.state == State::Open {
            self.state = State::Failed;
            self.buffer.clear();
            self.sink.dispose(true);
        }
        err.into()
    }

    #[cfg(test)]
    pub(crate) fn skip_to_frame(&mut self, frame: u64) {
        self.next_frame = frame;
    }
}

impl Write for ConnectionWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Err(e) = self.check_open() {
            return Err(e.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        let room = self.max_payload - self.buffer.len();
        let n = room.min(buf.len());
        self.buffer.extend_from_slice(&buf[..n]);
        if self.buffer.len() == self.max_payload {
            if let Err(e) = self.write_frame() {
                return Err(self.fail(e));
            }
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Err(e) = self.check_open() {
            return Err(e.into());
        }
        match self.write_pending().and_then(|()| self.sink.flush()) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.fail(e)),
        }
    }
}

impl Drop for ConnectionWriter {
    fn drop(&mut self) {
        let _ = self.finish();
    }
}
