//! XOR-parity erasure coding of frames into segments.
//!
//! A frame's plaintext is split into `n - 1` equal data segments plus one
//! parity segment, the XOR of the data segments. Any single segment may be
//! lost; with two or more missing the frame cannot be recovered and nothing
//! is made up in its place.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::transport::error::{FormatError, TransportResult};
use crate::transport::frame::{Frame, decode_plaintext};
use crate::transport::window::ConnectionWindow;

use super::{FrameSource, UnitSink, UnitSource};

/// Split a frame plaintext into `segments` pieces, the last being parity.
///
/// # Panics
/// If `segments < 2` or the plaintext length is not a multiple of
/// `segments - 1`. Connection configs are validated against both.
pub fn encode_frame(plaintext: &[u8], segments: usize) -> Vec<Vec<u8>> {
    assert!(segments >= 2, "need at least one data and one parity segment");
    let data_segments = segments - 1;
    assert_eq!(
        plaintext.len() % data_segments,
        0,
        "frame of {} bytes does not split into {data_segments} segments",
        plaintext.len()
    );

    let length = plaintext.len() / data_segments;
    let mut pieces: Vec<Vec<u8>> = plaintext.chunks(length.max(1)).map(<[u8]>::to_vec).collect();
    pieces.resize(data_segments, Vec::new());

    let mut parity = vec![0u8; length];
    for piece in &pieces {
        xor_into(&mut parity, piece);
    }
    pieces.push(parity);
    pieces
}

/// Rebuild a frame plaintext from its pieces, `None` marking a lost piece.
///
/// Returns `None` when two or more pieces are missing or the pieces have
/// inconsistent lengths.
pub fn decode_frame(pieces: &[Option<Vec<u8>>]) -> Option<Vec<u8>> {
    if pieces.len() < 2 {
        return None;
    }
    let missing: Vec<usize> = (0..pieces.len()).filter(|&i| pieces[i].is_none()).collect();
    if missing.len() > 1 {
        return None;
    }
    let length = pieces.iter().flatten().next()?.len();
    if pieces.iter().flatten().any(|p| p.len() != length) {
        return None;
    }

    let data_segments = pieces.len() - 1;
    let mut plaintext = Vec::with_capacity(length * data_segments);
    match missing.first() {
        Some(&lost) if lost < data_segments => {
            // XOR of everything present, parity included, is the lost piece
            let mut rebuilt = vec![0u8; length];
            for piece in pieces.iter().flatten() {
                xor_into(&mut rebuilt, piece);
            }
            for (i, piece) in pieces[..data_segments].iter().enumerate() {
                match piece {
                    Some(piece) => plaintext.extend_from_slice(piece),
                    None if i == lost => plaintext.extend_from_slice(&rebuilt),
                    None => return None,
                }
            }
        }
        _ => {
            for piece in pieces[..data_segments].iter().flatten() {
                plaintext.extend_from_slice(piece);
            }
        }
    }
    Some(plaintext)
}

fn xor_into(acc: &mut [u8], piece: &[u8]) {
    for (a, b) in acc.iter_mut().zip(piece) {
        *a ^= b;
    }
}

/// Splits each frame into `n` numbered segments.
pub struct OutgoingErrorCorrectionLayer<U> {
    inner: U,
    segments: usize,
}

impl<U: UnitSink> OutgoingErrorCorrectionLayer<U> {
    /// Create the layer writing `segments` segments per frame.
    pub fn new(inner: U, segments: usize) -> Self {
        Self { inner, segments }
    }
}

impl<U: UnitSink> UnitSink for OutgoingErrorCorrectionLayer<U> {
    fn write_unit(&mut self, number: u64, data: &[u8]) -> TransportResult<()> {
        let base = number * self.segments as u64;
        for (index, piece) in encode_frame(data, self.segments).iter().enumerate() {
            self.inner.write_unit(base + index as u64, piece)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> TransportResult<()> {
        self.inner.flush()
    }

    fn dispose(&mut self, exception: bool) {
        self.inner.dispose(exception);
    }
}

/// Collects segments by frame and decodes each frame once enough arrive.
///
/// Segments of frames already decoded, or outside the frame window, are
/// discarded. One discard per frame is expected (the segment that was not
/// needed); more than that is a hard error.
pub struct IncomingErrorCorrectionLayer<U> {
    inner: U,
    segments: usize,
    window: ConnectionWindow,
    pending: HashMap<u64, Vec<Option<Vec<u8>>>>,
    discards: HashMap<u64, usize>,
}

impl<U: UnitSource> IncomingErrorCorrectionLayer<U> {
    /// Create the layer reading `segments` segments per frame.
    pub fn new(inner: U, segments: usize) -> Self {
        Self {
            inner,
            segments,
            window: ConnectionWindow::new(),
            pending: HashMap::new(),
            discards: HashMap::new(),
        }
    }

    fn discard(&mut self, frame: u64, segment: u64) -> TransportResult<()> {
        let count = self.discards.entry(frame).or_insert(0);
        *count += 1;
        trace!(frame, segment, discards = *count, "discarded segment");

        // Decoding needs n - 1 of n segments, so n - (n - 1) may be spare
        if *count > self.segments - (self.segments - 1) {
            self.pending.remove(&frame);
            return Err(FormatError::TooManyDiscards { frame }.into());
        }
        Ok(())
    }
}

impl<U: UnitSource> FrameSource for IncomingErrorCorrectionLayer<U> {
    fn read_frame(&mut self) -> TransportResult<Option<Frame>> {
        let n = self.segments as u64;
        loop {
            let Some(unit) = self.inner.read_unit()? else {
                if !self.pending.is_empty() {
                    debug!(partial = self.pending.len(), "segments ended with partial frames");
                }
                self.pending.clear();
                return Ok(None);
            };

            let frame = unit.number / n;
            let index = (unit.number % n) as usize;
            if !self.window.contains(frame) || self.window.is_seen(frame) {
                self.discard(frame, unit.number)?;
                continue;
            }

            let pieces = self
                .pending
                .entry(frame)
                .or_insert_with(|| vec![None; self.segments]);
            if pieces[index].is_some() {
                self.discard(frame, unit.number)?;
                continue;
            }
            pieces[index] = Some(unit.data);
            if pieces.iter().flatten().count() < self.segments - 1 {
                continue;
            }

            let Some(pieces) = self.pending.remove(&frame) else {
                continue;
            };
            let plaintext = decode_frame(&pieces).ok_or(FormatError::InvalidSegment {
                segment: unit.number,
                reason: "frame could not be decoded",
            })?;
            self.window.set_seen(frame);
            let window = self.window;
            self.pending.retain(|f, _| window.contains(*f));
            self.discards.retain(|f, _| window.contains(*f));

            return Ok(Some(decode_plaintext(&plaintext, Some(frame))?));
        }
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.pending.clear();
        self.inner.dispose(exception, recognised);
    }
}
