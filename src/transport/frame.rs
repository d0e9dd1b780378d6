//! Frame header codec and frame plaintext layout.
//!
//! Every frame of a connection has the same length on the wire:
//!
//! ```text
//! +--------------+----------------+----------------+---------+---------+-----+
//! | Frame number | Payload length | Padding length | Payload | Padding | MAC |
//! | 4 (BE32)     | 2 (BE16)       | 2 (BE16)       |         | zeros   | 16  |
//! +--------------+----------------+----------------+---------+---------+-----+
//! |<------------------------ encrypted ------------------------------>|
//! ```

use crate::core::{
    HEADER_LENGTH, MAC_LENGTH, MAX_FRAME_LENGTH, MAX_FRAME_NUMBER, MIN_FRAME_LENGTH,
};

use super::error::{FormatError, TransportError, TransportResult};

/// Fixed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Frame number, strictly increasing per direction.
    pub frame_number: u32,
    /// Number of payload bytes.
    pub payload_length: u16,
    /// Number of zero padding bytes after the payload.
    pub padding_length: u16,
}

impl FrameHeader {
    /// Create a new header.
    pub fn new(frame_number: u32, payload_length: u16, padding_length: u16) -> Self {
        Self {
            frame_number,
            payload_length,
            padding_length,
        }
    }

    /// Serialize to bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_LENGTH] {
        let mut buf = [0u8; HEADER_LENGTH];
        buf[0..4].copy_from_slice(&self.frame_number.to_be_bytes());
        buf[4..6].copy_from_slice(&self.payload_length.to_be_bytes());
        buf[6..8].copy_from_slice(&self.padding_length.to_be_bytes());
        buf
    }

    /// Parse from the start of a buffer.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(FormatError::Truncated {
                expected: HEADER_LENGTH,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            frame_number: u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            payload_length: u16::from_be_bytes([bytes[4], bytes[5]]),
            padding_length: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    /// Payload plus padding.
    pub fn body_length(&self) -> usize {
        self.payload_length as usize + self.padding_length as usize
    }
}

/// A decoded frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame number.
    pub number: u64,
    /// Payload bytes.
    pub payload: Vec<u8>,
}

/// Check that a wire frame length is usable.
pub fn validate_frame_length(frame_length: usize) -> Result<(), String> {
    if !(MIN_FRAME_LENGTH..=MAX_FRAME_LENGTH).contains(&frame_length) {
        return Err(format!(
            "frame length {frame_length} outside {MIN_FRAME_LENGTH}..={MAX_FRAME_LENGTH}"
        ));
    }
    Ok(())
}

/// Plaintext bytes in a frame of `frame_length` wire bytes.
pub fn plaintext_length(frame_length: usize) -> usize {
    frame_length - MAC_LENGTH
}

/// Largest payload a frame of `frame_length` wire bytes can carry.
pub fn max_payload_length(frame_length: usize) -> usize {
    frame_length - MAC_LENGTH - HEADER_LENGTH
}

/// Build the plaintext of one frame: header, payload, then zero padding up
/// to `plaintext_length` bytes.
pub fn encode_plaintext(
    number: u64,
    payload: &[u8],
    plaintext_length: usize,
) -> TransportResult<Vec<u8>> {
    if number > MAX_FRAME_NUMBER {
        return Err(TransportError::CounterExhausted);
    }
    let body = plaintext_length
        .checked_sub(HEADER_LENGTH)
        .filter(|body| payload.len() <= *body)
        .ok_or(FormatError::InvalidLengths {
            payload: payload.len(),
            padding: 0,
            body: plaintext_length.saturating_sub(HEADER_LENGTH),
        })?;
    let padding = body - payload.len();

    let header = FrameHeader::new(number as u32, payload.len() as u16, padding as u16);
    let mut plaintext = Vec::with_capacity(plaintext_length);
    plaintext.extend_from_slice(&header.to_bytes());
    plaintext.extend_from_slice(payload);
    plaintext.resize(plaintext_length, 0);
    Ok(plaintext)
}

/// Parse and validate a decrypted frame.
///
/// Lengths are checked against the actual plaintext before any payload
/// byte is trusted. When `expected` is given the frame number must match.
pub fn decode_plaintext(plaintext: &[u8], expected: Option<u64>) -> Result<Frame, FormatError> {
    let header = FrameHeader::from_bytes(plaintext)?;
    let number = u64::from(header.frame_number);
    if let Some(expected) = expected {
        if number != expected {
            return Err(FormatError::UnexpectedFrameNumber {
                expected,
                actual: number,
            });
        }
    }

    let body = &plaintext[HEADER_LENGTH..];
    if header.body_length() != body.len() {
        return Err(FormatError::InvalidLengths {
            payload: header.payload_length as usize,
            padding: header.padding_length as usize,
            body: body.len(),
        });
    }

    let (payload, padding) = body.split_at(header.payload_length as usize);
    if padding.iter().any(|&b| b != 0) {
        return Err(FormatError::NonZeroPadding);
    }

    Ok(Frame {
        number,
        payload: payload.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DEFAULT_FRAME_LENGTH;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(0x01020304, 123, 456);
        let bytes = header.to_bytes();
        assert_eq!(hex::encode(bytes), "01020304007b01c8");
        assert_eq!(FrameHeader::from_bytes(&bytes).unwrap(), header);
        assert_eq!(header.body_length(), 579);
    }

    #[test]
    fn test_header_too_short() {
        assert_eq!(
            FrameHeader::from_bytes(&[0u8; 7]),
            Err(FormatError::Truncated {
                expected: HEADER_LENGTH,
                actual: 7
            })
        );
    }

    #[test]
    fn test_plaintext_roundtrip() {
        let len = plaintext_length(DEFAULT_FRAME_LENGTH);
        let plaintext = encode_plaintext(7, b"hello", len).unwrap();
        assert_eq!(plaintext.len(), len);

        let frame = decode_plaintext(&plaintext, Some(7)).unwrap();
        assert_eq!(frame.number, 7);
        assert_eq!(frame.payload, b"hello");
    }

    #[test]
    fn test_full_and_empty_payload() {
        let len = plaintext_length(MIN_FRAME_LENGTH);
        let full = vec![0xEE; max_payload_length(MIN_FRAME_LENGTH)];
        let plaintext = encode_plaintext(0, &full, len).unwrap();
        assert_eq!(decode_plaintext(&plaintext, None).unwrap().payload, full);

        let empty = encode_plaintext(1, &[], len).unwrap();
        assert!(decode_plaintext(&empty, None).unwrap().payload.is_empty());
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let len = plaintext_length(MIN_FRAME_LENGTH);
        let too_big = vec![0u8; max_payload_length(MIN_FRAME_LENGTH) + 1];
        assert!(matches!(
            encode_plaintext(0, &too_big, len),
            Err(TransportError::Format(FormatError::InvalidLengths { .. }))
        ));
    }

    #[test]
    fn test_counter_exhausted() {
        assert!(matches!(
            encode_plaintext(MAX_FRAME_NUMBER + 1, b"", 64),
            Err(TransportError::CounterExhausted)
        ));
        assert!(encode_plaintext(MAX_FRAME_NUMBER, b"", 64).is_ok());
    }

    #[test]
    fn test_nonzero_padding_rejected() {
        let mut plaintext = encode_plaintext(0, b"abc", 64).unwrap();
        *plaintext.last_mut().unwrap() = 1;
        assert_eq!(
            decode_plaintext(&plaintext, None),
            Err(FormatError::NonZeroPadding)
        );
    }

    #[test]
    fn test_inconsistent_lengths_rejected() {
        let mut plaintext = encode_plaintext(0, b"abc", 64).unwrap();
        // Claim one more payload byte than the body holds
        plaintext[4..6].copy_from_slice(&57u16.to_be_bytes());
        assert!(matches!(
            decode_plaintext(&plaintext, None),
            Err(FormatError::InvalidLengths { .. })
        ));
    }

    #[test]
    fn test_unexpected_frame_number() {
        let plaintext = encode_plaintext(4, b"x", 64).unwrap();
        assert_eq!(
            decode_plaintext(&plaintext, Some(5)),
            Err(FormatError::UnexpectedFrameNumber {
                expected: 5,
                actual: 4
            })
        );
    }

    #[test]
    fn test_frame_length_bounds() {
        assert!(validate_frame_length(MIN_FRAME_LENGTH).is_ok());
        assert!(validate_frame_length(MAX_FRAME_LENGTH).is_ok());
        assert!(validate_frame_length(MIN_FRAME_LENGTH - 1).is_err());
        assert!(validate_frame_length(MAX_FRAME_LENGTH + 1).is_err());
    }
}
