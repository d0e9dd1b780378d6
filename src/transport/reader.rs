//! Blocking payload reader for one connection.

use std::io::{self, Read};

use tracing::debug;

use super::error::TransportError;
use super::layers::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Finished,
    Failed,
}

/// Reads the payload stream of a connection.
///
/// Frames are authenticated, decrypted, validated and put in order before
/// any of their payload is returned. End of stream on a frame boundary is
/// reported as `Ok(0)`. Any error erases the keys and disposes of the raw
/// transport.
pub struct ConnectionReader {
    source: Box<dyn FrameSource>,
    payload: Vec<u8>,
    offset: usize,
    state: State,
}

impl ConnectionReader {
    pub(crate) fn new(source: Box<dyn FrameSource>) -> Self {
        Self {
            source,
            payload: Vec::new(),
            offset: 0,
            state: State::Open,
        }
    }

    /// Erase keys and release the transport without reading further.
    pub fn close(mut self) {
        self.release(false);
    }

    fn release(&mut self, exception: bool) {
        if self.state == State::Open {
            self.state = if exception {
                State::Failed
            } else {
                State::Finished
            };
            self.payload.clear();
            self.source.dispose(exception, true);
        }
    }

    fn fail(&mut self, err: TransportError) -> io::Error {
        debug!(error = %err, "connection reader failed");
        self.release(true);
        err.into()
    }
}

impl Read for ConnectionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            match self.state {
                State::Open => {}
                State::Finished => return Ok(0),
                State::Failed => return Err(TransportError::ConnectionClosed.into()),
            }
            if buf.is_empty() {
                return Ok(0);
            }
            if self.offset < self.payload.len() {
                let n = buf.len().min(self.payload.len() - self.offset);
                buf[..n].copy_from_slice(&self.payload[self.offset..self.offset + n]);
                self.offset += n;
                return Ok(n);
            }

            match self.source.read_frame() {
                Ok(Some(frame)) => {
                    self.payload = frame.payload;
                    self.offset = 0;
                }
                Ok(None) => {
                    debug!("connection reader reached end of stream");
                    self.release(false);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }
}

impl Drop for ConnectionReader {
    fn drop(&mut self) {
        self.release(false);
    }
}
