//! Bounded reordering of incoming frames.

use std::collections::BTreeMap;
use std::io;

use tracing::trace;

use crate::core::FRAME_WINDOW_SIZE;
use crate::transport::error::{FormatError, TransportError, TransportResult};
use crate::transport::frame::Frame;

use super::FrameSource;

/// Delivers frames in strictly increasing order.
///
/// Frames up to [`FRAME_WINDOW_SIZE`] ahead of the next expected frame are
/// held back until the gap is filled. Frames already delivered or buffered,
/// and frames further ahead, are rejected.
pub struct IncomingReliabilityLayer<F> {
    inner: F,
    next_expected: u64,
    buffer: BTreeMap<u64, Frame>,
}

impl<F: FrameSource> IncomingReliabilityLayer<F> {
    /// Create the layer, expecting frame zero first.
    pub fn new(inner: F) -> Self {
        Self {
            inner,
            next_expected: 0,
            buffer: BTreeMap::new(),
        }
    }

    /// Number of the next frame to be delivered.
    pub fn next_expected(&self) -> u64 {
        self.next_expected
    }

    /// Frames held back waiting for an earlier frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl<F: FrameSource> FrameSource for IncomingReliabilityLayer<F> {
    fn read_frame(&mut self) -> TransportResult<Option<Frame>> {
        loop {
            if let Some(frame) = self.buffer.remove(&self.next_expected) {
                self.next_expected += 1;
                return Ok(Some(frame));
            }

            let Some(frame) = self.inner.read_frame()? else {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(TransportError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "stream ended waiting for frame {} with {} frames buffered",
                        self.next_expected,
                        self.buffer.len()
                    ),
                )));
            };

            let number = frame.number;
            if number < self.next_expected || self.buffer.contains_key(&number) {
                return Err(FormatError::DuplicateFrame(number).into());
            }
            if number >= self.next_expected + FRAME_WINDOW_SIZE {
                return Err(FormatError::OutOfWindow {
                    frame: number,
                    base: self.next_expected,
                }
                .into());
            }
            if number != self.next_expected {
                trace!(frame = number, expected = self.next_expected, "buffering frame");
            }
            self.buffer.insert(number, frame);
        }
    }

    fn dispose(&mut self, exception: bool, recognised: bool) {
        self.buffer.clear();
        self.inner.dispose(exception, recognised);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::transport::layers::testing::QueuedFrames;

    fn frame(number: u64) -> Frame {
        Frame {
            number,
            payload: number.to_be_bytes().to_vec(),
        }
    }

    fn drain(layer: &mut IncomingReliabilityLayer<QueuedFrames>) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(f) = layer.read_frame().unwrap() {
            out.push(f.number);
        }
        out
    }

    #[test]
    fn test_in_order_passthrough() {
        let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new((0..5).map(frame)));
        assert_eq!(drain(&mut layer), vec![0, 1, 2, 3, 4]);
        assert_eq!(layer.next_expected(), 5);
    }

    #[test]
    fn test_reorders() {
        let mut layer =
            IncomingReliabilityLayer::new(QueuedFrames::new([2, 0, 3, 1].map(frame)));
        assert_eq!(layer.read_frame().unwrap().unwrap().number, 0);
        assert_eq!(layer.buffered(), 1);
        assert_eq!(drain(&mut layer), vec![1, 2, 3]);
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new([0, 0].map(frame)));
        layer.read_frame().unwrap();
        assert!(matches!(
            layer.read_frame(),
            Err(TransportError::Format(FormatError::DuplicateFrame(0)))
        ));

        let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new([2, 2].map(frame)));
        assert!(matches!(
            layer.read_frame(),
            Err(TransportError::Format(FormatError::DuplicateFrame(2)))
        ));
    }

    #[test]
    fn test_window_edge() {
        let last = FRAME_WINDOW_SIZE - 1;
        let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new([last, 0].map(frame)));
        assert_eq!(layer.read_frame().unwrap().unwrap().number, 0);

        let mut layer =
            IncomingReliabilityLayer::new(QueuedFrames::new([FRAME_WINDOW_SIZE].map(frame)));
        assert!(matches!(
            layer.read_frame(),
            Err(TransportError::Format(FormatError::OutOfWindow { base: 0, .. }))
        ));
    }

    #[test]
    fn test_gap_at_end_is_error() {
        let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new([0, 2].map(frame)));
        layer.read_frame().unwrap();
        let err = layer.read_frame().unwrap_err();
        assert!(matches!(err, TransportError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    proptest! {
        #[test]
        fn prop_permutation_within_window_delivered_in_order(
            order in Just((0..FRAME_WINDOW_SIZE).collect::<Vec<u64>>()).prop_shuffle()
        ) {
            let mut layer = IncomingReliabilityLayer::new(QueuedFrames::new(order.into_iter().map(frame)));
            prop_assert_eq!(drain(&mut layer), (0..FRAME_WINDOW_SIZE).collect::<Vec<_>>());
        }

        #[test]
        fn prop_far_frame_rejected(base in 0u64..100, ahead in FRAME_WINDOW_SIZE..1000) {
            let mut layer = IncomingReliabilityLayer::new(
                QueuedFrames::new((0..base).map(frame).chain(std::iter::once(frame(base + ahead)))),
            );
            for _ in 0..base {
                layer.read_frame().unwrap();
            }
            let rejected = matches!(
                layer.read_frame(),
                Err(TransportError::Format(FormatError::OutOfWindow { .. }))
            );
            prop_assert!(rejected);
        }
    }
}
