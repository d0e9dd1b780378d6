//! Connection configuration and stack construction.
//!
//! The factory turns a [`ConnectionContext`] and a raw transport handle into
//! a [`ConnectionWriter`] or [`ConnectionReader`], deriving the per-direction
//! keys and composing the layers. The context's secret is erased once the
//! keys have been derived.

use std::sync::Arc;

use tracing::debug;

use crate::core::{
    ConnectionContext, DEFAULT_FRAME_LENGTH, DEFAULT_SEGMENTS_PER_FRAME, Error, IV_KIND_FRAME,
    IV_KIND_SEGMENT, MAC_LENGTH, MAX_SEGMENTS_PER_FRAME, MIN_SEGMENTS_PER_FRAME, Tag,
};
use crate::crypto::{CryptoProvider, FrameCipher, FrameKeys, FrameMac};

use super::error::TransportResult;
use super::frame::{plaintext_length, validate_frame_length};
use super::io::{Segment, SegmentSink, SegmentSource, TransportReader, TransportWriter};
use super::layers::{
    IncomingAuthenticationLayer, IncomingEncryptionLayer, IncomingErrorCorrectionLayer,
    IncomingReliabilityLayer, OutgoingAuthenticationLayer, OutgoingEncryptionLayer,
    OutgoingErrorCorrectionLayer, SegmentUnitReader, SegmentUnitWriter, StreamFrameDecoder,
    StreamUnitReader, StreamUnitWriter,
};
use super::reader::ConnectionReader;
use super::writer::ConnectionWriter;

/// Which segments of a segmented connection carry the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TagProfile {
    /// Only segment zero.
    #[default]
    FirstSegment,
    /// Every segment, so the connection can be recognised from any of them.
    EverySegment,
}

/// Per-connection wire parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Length of every frame on the wire, MAC included.
    pub frame_length: usize,

    /// Segments per frame on segment transports (`n - 1` data, 1 parity).
    pub segments_per_frame: usize,

    /// Tag placement on segment transports.
    pub tag_profile: TagProfile,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            frame_length: DEFAULT_FRAME_LENGTH,
            segments_per_frame: DEFAULT_SEGMENTS_PER_FRAME,
            tag_profile: TagProfile::default(),
        }
    }
}

impl ConnectionConfig {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConnectionConfigBuilder {
        ConnectionConfigBuilder::new()
    }

    /// Check that the parameters describe a usable wire format.
    pub fn validate(&self) -> Result<(), Error> {
        validate_frame_length(self.frame_length).map_err(Error::Config)?;
        if !(MIN_SEGMENTS_PER_FRAME..=MAX_SEGMENTS_PER_FRAME).contains(&self.segments_per_frame) {
            return Err(Error::Config(format!(
                "{} segments per frame outside {MIN_SEGMENTS_PER_FRAME}..={MAX_SEGMENTS_PER_FRAME}",
                self.segments_per_frame
            )));
        }
        let plaintext = plaintext_length(self.frame_length);
        if plaintext % (self.segments_per_frame - 1) != 0 {
            return Err(Error::Config(format!(
                "frame plaintext of {plaintext} bytes does not split into {} data segments",
                self.segments_per_frame - 1
            )));
        }
        Ok(())
    }

    /// Plaintext bytes in each segment.
    pub fn segment_plaintext_length(&self) -> usize {
        plaintext_length(self.frame_length) / (self.segments_per_frame - 1)
    }
}

/// Builder for [`ConnectionConfig`].
#[derive(Debug, Default)]
pub struct ConnectionConfigBuilder {
    config: ConnectionConfig,
}

impl ConnectionConfigBuilder {
    /// Create a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the frame length on the wire.
    pub fn frame_length(mut self, length: usize) -> Self {
        self.config.frame_length = length;
        self
    }

    /// Set the number of segments per frame.
    pub fn segments_per_frame(mut self, segments: usize) -> Self {
        self.config.segments_per_frame = segments;
        self
    }

    /// Set the tag profile.
    pub fn tag_profile(mut self, profile: TagProfile) -> Self {
        self.config.tag_profile = profile;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ConnectionConfig {
        self.config
    }
}

/// Keys and tag for one direction of a connection.
struct DirectionKeys {
    cipher: Box<dyn FrameCipher>,
    mac: Box<dyn FrameMac>,
    tag: Option<Tag>,
}

/// Builds connection readers and writers.
pub struct ConnectionFactory {
    crypto: Arc<dyn CryptoProvider>,
    config: ConnectionConfig,
}

impl ConnectionFactory {
    /// Create a factory, validating the configuration.
    pub fn new(crypto: Arc<dyn CryptoProvider>, config: ConnectionConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self { crypto, config })
    }

    /// The configuration every connection is built with.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Writer for a byte-stream transport.
    ///
    /// The initiator's writer opens with the connection's tag.
    pub fn create_writer<W>(
        &self,
        mut ctx: ConnectionContext,
        mut writer: W,
        initiator: bool,
    ) -> TransportResult<ConnectionWriter>
    where
        W: TransportWriter + 'static,
    {
        let keys = self.outgoing_keys(&ctx, initiator);
        ctx.erase();
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                writer.dispose(true);
                return Err(e);
            }
        };
        debug!(
            contact = %ctx.contact_id(),
            transport = %ctx.transport_id(),
            connection = ctx.connection_number(),
            initiator,
            "created stream writer"
        );

        let wire = StreamUnitWriter::new(writer, keys.tag);
        let authenticated = OutgoingAuthenticationLayer::new(wire, keys.mac);
        let encrypted = OutgoingEncryptionLayer::new(
            authenticated,
            keys.cipher,
            ctx.transport_id(),
            ctx.connection_number(),
            IV_KIND_FRAME,
        );
        Ok(ConnectionWriter::new(
            Box::new(encrypted),
            self.config.frame_length,
        ))
    }

    /// Reader for a byte-stream transport.
    ///
    /// When the peer initiated the connection its tag must already have
    /// been consumed, normally by the dispatcher that recognised it.
    pub fn create_reader<R>(
        &self,
        mut ctx: ConnectionContext,
        mut reader: R,
        initiator: bool,
    ) -> TransportResult<ConnectionReader>
    where
        R: TransportReader + 'static,
    {
        let keys = self.incoming_keys(&ctx, initiator, false);
        ctx.erase();
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                reader.dispose(true, true);
                return Err(e);
            }
        };
        debug!(
            contact = %ctx.contact_id(),
            transport = %ctx.transport_id(),
            connection = ctx.connection_number(),
            initiator,
            "created stream reader"
        );

        let wire = StreamUnitReader::new(reader, self.config.frame_length);
        let authenticated = IncomingAuthenticationLayer::new(wire, keys.mac);
        let decrypted = IncomingEncryptionLayer::new(
            authenticated,
            keys.cipher,
            ctx.transport_id(),
            ctx.connection_number(),
            IV_KIND_FRAME,
        );
        let ordered = IncomingReliabilityLayer::new(StreamFrameDecoder::new(decrypted));
        Ok(ConnectionReader::new(Box::new(ordered)))
    }

    /// Writer for a segment transport.
    pub fn create_segment_writer<S>(
        &self,
        mut ctx: ConnectionContext,
        mut sink: S,
        initiator: bool,
    ) -> TransportResult<ConnectionWriter>
    where
        S: SegmentSink + 'static,
    {
        let keys = self.outgoing_keys(&ctx, initiator);
        ctx.erase();
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                sink.dispose(true);
                return Err(e);
            }
        };
        debug!(
            contact = %ctx.contact_id(),
            transport = %ctx.transport_id(),
            connection = ctx.connection_number(),
            initiator,
            segments = self.config.segments_per_frame,
            "created segment writer"
        );

        let wire = SegmentUnitWriter::new(sink, keys.tag, self.config.tag_profile);
        let authenticated = OutgoingAuthenticationLayer::new(wire, keys.mac);
        let encrypted = OutgoingEncryptionLayer::new(
            authenticated,
            keys.cipher,
            ctx.transport_id(),
            ctx.connection_number(),
            IV_KIND_SEGMENT,
        );
        let segmented =
            OutgoingErrorCorrectionLayer::new(encrypted, self.config.segments_per_frame);
        Ok(ConnectionWriter::new(
            Box::new(segmented),
            self.config.frame_length,
        ))
    }

    /// Reader for a segment transport.
    ///
    /// `first` is a segment already taken from the source, such as the one
    /// whose tag identified the connection; it is processed before any
    /// other.
    pub fn create_segment_reader<S>(
        &self,
        mut ctx: ConnectionContext,
        mut source: S,
        initiator: bool,
        first: Option<Segment>,
    ) -> TransportResult<ConnectionReader>
    where
        S: SegmentSource + 'static,
    {
        let keys = self.incoming_keys(&ctx, initiator, true);
        ctx.erase();
        let keys = match keys {
            Ok(keys) => keys,
            Err(e) => {
                source.dispose(true, true);
                return Err(e);
            }
        };
        debug!(
            contact = %ctx.contact_id(),
            transport = %ctx.transport_id(),
            connection = ctx.connection_number(),
            initiator,
            segments = self.config.segments_per_frame,
            "created segment reader"
        );

        let unit_length = self.config.segment_plaintext_length() + MAC_LENGTH;
        let wire = SegmentUnitReader::new(
            source,
            keys.tag,
            self.config.tag_profile,
            unit_length,
            first,
        );
        let authenticated = IncomingAuthenticationLayer::new(wire, keys.mac);
        let decrypted = IncomingEncryptionLayer::new(
            authenticated,
            keys.cipher,
            ctx.transport_id(),
            ctx.connection_number(),
            IV_KIND_SEGMENT,
        );
        let frames =
            IncomingErrorCorrectionLayer::new(decrypted, self.config.segments_per_frame);
        let ordered = IncomingReliabilityLayer::new(frames);
        Ok(ConnectionReader::new(Box::new(ordered)))
    }

    /// Compute the tag the writing party opens the connection with.
    pub fn compute_tag(
        &self,
        ctx: &ConnectionContext,
        writer_alice: bool,
    ) -> TransportResult<Tag> {
        let mut tag_key = self.crypto.derive_tag_key(ctx.secret(), writer_alice)?;
        let tag = self
            .crypto
            .encode_tag(&tag_key, ctx.transport_id(), ctx.connection_number());
        tag_key.erase();
        Ok(tag?)
    }

    fn outgoing_keys(
        &self,
        ctx: &ConnectionContext,
        initiator: bool,
    ) -> TransportResult<DirectionKeys> {
        let tag = match (initiator, ctx.tag()) {
            (false, _) => None,
            (true, Some(tag)) => Some(*tag),
            (true, None) => Some(self.compute_tag(ctx, ctx.alice())?),
        };
        let keys = self.crypto.derive_frame_keys(
            ctx.secret(),
            ctx.connection_number(),
            ctx.alice(),
            initiator,
        )?;
        self.direction_keys(keys, tag)
    }

    fn incoming_keys(
        &self,
        ctx: &ConnectionContext,
        initiator: bool,
        segmented: bool,
    ) -> TransportResult<DirectionKeys> {
        // Only segment readers check tags; on a stream the dispatcher
        // consumes the tag before the reader exists
        let tag = match (segmented && !initiator, ctx.tag()) {
            (false, _) => None,
            (true, Some(tag)) => Some(*tag),
            (true, None) => Some(self.compute_tag(ctx, !ctx.alice())?),
        };
        let keys = self.crypto.derive_frame_keys(
            ctx.secret(),
            ctx.connection_number(),
            !ctx.alice(),
            !initiator,
        )?;
        self.direction_keys(keys, tag)
    }

    fn direction_keys(&self, keys: FrameKeys, tag: Option<Tag>) -> TransportResult<DirectionKeys> {
        let FrameKeys { cipher, mac } = keys;
        Ok(DirectionKeys {
            cipher: self.crypto.frame_cipher(cipher)?,
            mac: self.crypto.frame_mac(mac)?,
            tag,
        })
    }
}
