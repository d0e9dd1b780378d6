//! Encrypt-then-MAC authentication of units.
//!
//! A unit's MAC is checked before the unit is decrypted. A bad MAC ends the
//! connection: there is no retry and no resynchronisation.

use tracing::warn;

use crate::core::MAC_LENGTH;
use crate::crypto::FrameMac;
use crate::transport::error::{FormatError, TransportError, TransportResult};

use super::{Unit, UnitSink, UnitSource};

/// Appends a MAC to each ciphertext unit.
pub struct OutgoingAuthenticationLayer<U> {
    inner: U,
    mac: Box<dyn FrameMac>,
}

impl<U: UnitSink> OutgoingAuthenticationLayer<U> {
    /// Create the layer.
    pub fn new(inner: U, mac: Box<dyn FrameMac>) -> Self {
        Self { inner, mac }
    }
}

impl<U: UnitSink> UnitSink for OutgoingAuthenticationLayer<U> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        let tag = self.mac.compute(number, data)?;
        let mut unit = Vec::with_capacity(data.len() + MAC_LENGTH);
        unit.extend_from_slice(data);
        unit.extend_from_slice(&tag);
        self.inner.write_unit(number, &unit)
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.inner.flush()
    }

    fn dispose(&mut self, exception: bool) {
        self.mac.erase();
        self.inner.dispose(exception);
    }
}

/// Verifies and strips the MAC of each unit.
pub struct IncomingAuthenticationLayer<U> {
    inner: U,
    mac: Box<dyn FrameMac>,
}

impl<U: UnitSource> IncomingAuthenticationLayer<U> {
    /// Create the layer.
    pub fn new(inner: U, mac: Box<dyn FrameMac>) -> Self {
        Self { inner, mac }
    }
}

impl<U: UnitSource> UnitSource for IncomingAuthenticationLayer<U> {
    fn read_unit(&mut self) -> TransportResult<Option<Unit>> {
        let Some(mut unit) = self.inner.read_unit()? else {
            return Ok(None);
        };
        if unit.data.len() < MAC_LENGTH {
            return Err(FormatError::Truncated {
                expected: MAC_LENGTH,
                actual: unit.data.len(),
            }
            .into());
        }

        let body = unit.data.len() - MAC_LENGTH;
        let (ciphertext, tag) = unit.data.split_at(body);
        if !self.mac.verify(unit.number, ciphertext, tag)? {
            warn!(unit = unit.number, "unit failed authentication");
            return Err(TransportError::AuthenticationFailed);
        }
        unit.data.truncate(body);
        Ok(Some(unit))
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.mac.erase();
        self.inner.dispose(exception, recognised);
    }
}
