//! Per-unit encryption and decryption.

use crate::core::TransportId;
use crate::crypto::{FrameCipher, frame_iv};
use crate::transport::error::TransportResult;

use super::{Unit, UnitSink, UnitSource};

/// Encrypts each plaintext unit before passing it down.
pub struct OutgoingEncryptionLayer<U> {
    inner: U,
    cipher: Box<dyn FrameCipher>,
    transport: TransportId,
    connection: u64,
    kind: u8,
}

impl<U: UnitSink> OutgoingEncryptionLayer<U> {
    /// Create the layer.
    ///
    /// `kind` is the IV kind byte separating frame and segment keystreams.
    pub fn new(
        inner: U,
        cipher: Box<dyn FrameCipher>,
        transport: TransportId,
        connection: u64,
        kind: u8,
    ) -> Self {
        Self {
            inner,
            cipher,
            transport,
            connection,
            kind,
        }
    }
}

impl<U: UnitSink> UnitSink for OutgoingEncryptionLayer<U> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        let iv = frame_iv(self.transport, self.connection, number, self.kind);
        let mut ciphertext = data.to_vec();
        self.cipher.apply_keystream(&iv, &mut ciphertext)?;
        self.inner.write_unit(number, &ciphertext)
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.inner.flush()
    }

    fn dispose(&mut self, exception: bool) {
        self.cipher.erase();
        self.inner.dispose(exception);
    }
}

/// Decrypts each authenticated unit before passing it up.
pub struct IncomingEncryptionLayer<U> {
    inner: U,
    cipher: Box<dyn FrameCipher>,
    transport: TransportId,
    connection: u64,
    kind: u8,
}

impl<U: UnitSource> IncomingEncryptionLayer<U> {
    /// Create the layer.
    pub fn new(
        inner: U,
        cipher: Box<dyn FrameCipher>,
        transport: TransportId,
        connection: u64,
        kind: u8,
    ) -> Self {
        Self {
            inner,
            cipher,
            transport,
            connection,
            kind,
        }
    }
}

impl<U: UnitSource> UnitSource for IncomingEncryptionLayer<U> {
    fn read_unit(&mut self) -> TransportResult<Option<Unit>> {
        let Some(mut unit) = self.inner.read_unit()? else {
            return Ok(None);
        };
        let iv = frame_iv(self.transport, self.connection, unit.number, self.kind);
        self.cipher.apply_keystream(&iv, &mut unit.data)?;
        Ok(Some(unit))
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.cipher.erase();
        self.inner.dispose(exception, recognised);
    }
}
