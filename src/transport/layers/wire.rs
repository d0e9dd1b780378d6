//! Bottom of the stack: units to and from the raw transport.

use std::io::{self, Read, Write};

use tracing::trace;

use crate::core::{TAG_LENGTH, Tag};
use crate::transport::error::{FormatError, TransportError, TransportResult};
use crate::transport::factory::TagProfile;
use crate::transport::io::{Segment, SegmentSink, SegmentSource, TransportReader, TransportWriter};

use super::{Unit, UnitSink, UnitSource};

/// Writes units back to back on a byte stream, after an optional tag.
pub struct StreamUnitWriter<W> {
    writer: W,
    tag: Option<Tag>,
}

impl<W: TransportWriter> StreamUnitWriter<W> {
    /// Create a writer. The tag, if any, is written before the first unit.
    pub fn new(writer: W, tag: Option<Tag>) -> Self {
        Self { writer, tag }
    }
}

impl<W: TransportWriter> UnitSink for StreamUnitWriter<W> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        if let Some(tag) = self.tag.take() {
            self.writer.write_all(tag.as_bytes())?;
        }
        trace!(unit = number, len = data.len(), "writing stream unit");
        self.writer.write_all(data)?;
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        if let Some(tag) = self.tag.take() {
            self.writer.write_all(tag.as_bytes())?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn dispose(&mut self, exception: bool) {
        self.writer.dispose(exception);
    }
}

/// Reads fixed-length units from a byte stream.
///
/// Units on a stream arrive in order, so the unit number is a running
/// count. End of stream on a unit boundary is a clean end; anywhere else
/// the unit is truncated.
pub struct StreamUnitReader<R> {
    reader: R,
    unit_length: usize,
    next: u64,
}

impl<R: TransportReader> StreamUnitReader<R> {
    /// Create a reader for units of `unit_length` bytes.
    pub fn new(reader: R, unit_length: usize) -> Self {
        Self {
            reader,
            unit_length,
            next: 0,
        }
    }
}

impl<R: TransportReader> UnitSource for StreamUnitReader<R> {
    fn read_unit(&mut self) -> TransportResult<Option<Unit>> {
        let mut buf = vec![0u8; self.unit_length];
        let read = read_full(&mut self.reader, &mut buf)?;
        if read == 0 {
            return Ok(None);
        }
        if read < self.unit_length {
            return Err(FormatError::Truncated {
                expected: self.unit_length,
                actual: read,
            }
            .into());
        }
        let number = self.next;
        self.next += 1;
        Ok(Some(Unit::new(number, buf)))
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.reader.dispose(exception, recognised);
    }
}

/// Fill `buf`, stopping early only at end of stream.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Whether segment `number` carries a tag under `profile`.
fn carries_tag(profile: TagProfile, number: u64) -> bool {
    match profile {
        TagProfile::FirstSegment => number == 0,
        TagProfile::EverySegment => true,
    }
}

/// Wraps each unit in a segment, prefixing the tag as the profile asks.
pub struct SegmentUnitWriter<S> {
    sink: S,
    tag: Option<Tag>,
    profile: TagProfile,
}

impl<S: SegmentSink> SegmentUnitWriter<S> {
    /// Create a writer. Without a tag no segment is prefixed.
    pub fn new(sink: S, tag: Option<Tag>, profile: TagProfile) -> Self {
        Self { sink, tag, profile }
    }
}

impl<S: SegmentSink> UnitSink for SegmentUnitWriter<S> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        let mut buf = Vec::with_capacity(TAG_LENGTH + data.len());
        if let Some(tag) = self.tag.filter(|_| carries_tag(self.profile, number)) {
            buf.extend_from_slice(tag.as_bytes());
        }
        buf.extend_from_slice(data);
        trace!(segment = number, len = buf.len(), "writing segment");
        self.sink.write_segment(Segment::new(number, buf))?;
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.sink.flush()?;
        Ok(())
    }

    fn dispose(&mut self, exception: bool) {
        self.sink.dispose(exception);
    }
}

/// Unwraps segments into units, checking and stripping tags.
pub struct SegmentUnitReader<S> {
    source: S,
    tag: Option<Tag>,
    profile: TagProfile,
    unit_length: usize,
    pending: Option<Segment>,
}

impl<S: SegmentSource> SegmentUnitReader<S> {
    /// Create a reader for units of `unit_length` bytes.
    ///
    /// * `tag` - the tag the sender prefixes, if it sends one
    /// * `first` - a segment already taken from the source, such as the one
    ///   whose tag identified the connection
    pub fn new(
        source: S,
        tag: Option<Tag>,
        profile: TagProfile,
        unit_length: usize,
        first: Option<Segment>,
    ) -> Self {
        Self {
            source,
            tag,
            profile,
            unit_length,
            pending: first,
        }
    }
}

impl<S: SegmentSource> UnitSource for SegmentUnitReader<S> {
    fn read_unit(&mut self) -> TransportResult<Option<Unit>> {
        let segment = match self.pending.take() {
            Some(segment) => segment,
            None => match self.source.read_segment()? {
                Some(segment) => segment,
                None => return Ok(None),
            },
        };

        let tagged = self.tag.is_some() && carries_tag(self.profile, segment.number);
        let expected = if tagged {
            TAG_LENGTH + self.unit_length
        } else {
            self.unit_length
        };
        if segment.len() != expected {
            return Err(FormatError::InvalidSegment {
                segment: segment.number,
                reason: "unexpected length",
            }
            .into());
        }

        let mut data = segment.data;
        if tagged {
            if Tag::from_slice(&data) != self.tag {
                return Err(TransportError::Format(FormatError::BadTag));
            }
            data.drain(..TAG_LENGTH);
        }
        Ok(Some(Unit::new(segment.number, data)))
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.source.dispose(exception, recognised);
    }
}
