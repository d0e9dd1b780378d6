//! Stream-mode frame decoding.

use crate::transport::error::TransportResult;
use crate::transport::frame::{Frame, decode_plaintext};

use super::{FrameSource, UnitSource};

/// Turns decrypted stream units into frames.
///
/// On a stream the n-th unit must hold frame n, so the header's frame
/// number is checked against the unit number.
pub struct StreamFrameDecoder<U> {
    inner: U,
}

impl<U: UnitSource> StreamFrameDecoder<U> {
    /// Create the decoder.
    pub fn new(inner: U) -> Self {
        Self { inner }
    }
}

impl<U: UnitSource> FrameSource for StreamFrameDecoder<U> {
    fn read_frame(&mut self) -> TransportResult<Option<Frame>> {
        let Some(unit) = self.inner.read_unit()? else {
            return Ok(None);
        };
        Ok(Some(decode_plaintext(&unit.data, Some(unit.number))?))
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.inner.dispose(exception, recognised);
    }
}
