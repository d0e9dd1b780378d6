//! Protocol constants for the tagwire transport.
//!
//! These values are fixed by the wire format and MUST NOT be changed without
//! breaking interoperability with existing peers.

use std::time::Duration;

// =============================================================================
// CRYPTOGRAPHIC CONSTANTS
// =============================================================================

/// Length of shared secrets and all derived keys.
pub const KEY_LENGTH: usize = 32;

/// Length of a rendezvous tag.
pub const TAG_LENGTH: usize = 16;

/// Length of the truncated per-unit MAC.
pub const MAC_LENGTH: usize = 16;

/// XChaCha20 IV length.
pub const IV_LENGTH: usize = 24;

/// Largest value of a 32-bit unsigned counter (frame and connection numbers).
pub const MAX_32_BIT_UNSIGNED: u64 = u32::MAX as u64;

// =============================================================================
// FRAME LAYOUT
// =============================================================================

/// Frame header size (frame number + payload length + padding length).
pub const HEADER_LENGTH: usize = 4 + 2 + 2;

/// Upper bound on the size of a frame on the wire, MAC included.
pub const MAX_FRAME_LENGTH: usize = 16 * 1024;

/// Smallest usable frame: header, one payload byte and the MAC.
pub const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + 1 + MAC_LENGTH;

/// Frame length used when a transport does not ask for anything else.
pub const DEFAULT_FRAME_LENGTH: usize = 1024;

/// Highest frame number a connection may use in one direction.
pub const MAX_FRAME_NUMBER: u64 = MAX_32_BIT_UNSIGNED;

// =============================================================================
// SLIDING WINDOWS
// =============================================================================

/// Number of sequence numbers a connection window tracks.
pub const CONNECTION_WINDOW_SIZE: usize = 64;

/// Serialized connection window size (centre + bitmap).
pub const CONNECTION_WINDOW_BYTES: usize = 8 + CONNECTION_WINDOW_SIZE / 8;

/// How far ahead of the next expected frame a frame may arrive.
pub const FRAME_WINDOW_SIZE: u64 = 32;

// =============================================================================
// ERASURE CODING
// =============================================================================

/// Default number of segments per frame (n-1 data + 1 parity).
pub const DEFAULT_SEGMENTS_PER_FRAME: usize = 3;

/// Fewest segments per frame that still carry data plus parity.
pub const MIN_SEGMENTS_PER_FRAME: usize = 2;

/// Most segments per frame the segmentation layer accepts.
pub const MAX_SEGMENTS_PER_FRAME: usize = 16;

// =============================================================================
// IV LAYOUT
// =============================================================================

/// IV kind byte for frames written to a stream transport.
pub const IV_KIND_FRAME: u8 = 0x00;

/// IV kind byte for segments written to a segment transport.
pub const IV_KIND_SEGMENT: u8 = 0x01;

// =============================================================================
// KEY ROTATION
// =============================================================================

/// Default interval between key rotation checks.
pub const ROTATION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

// =============================================================================
// KEY DERIVATION LABELS
// =============================================================================

/// Tag key label for the party playing Alice.
pub const LABEL_A_TAG: &[u8] = b"A_TAG\0";

/// Tag key label for the party playing Bob.
pub const LABEL_B_TAG: &[u8] = b"B_TAG\0";

/// Frame key label: Alice's side, written by the initiator.
pub const LABEL_A_FRAME_A: &[u8] = b"A_FRAME_A\0";

/// Frame key label: Alice's side, written by the responder.
pub const LABEL_A_FRAME_B: &[u8] = b"A_FRAME_B\0";

/// Frame key label: Bob's side, written by the initiator.
pub const LABEL_B_FRAME_A: &[u8] = b"B_FRAME_A\0";

/// Frame key label: Bob's side, written by the responder.
pub const LABEL_B_FRAME_B: &[u8] = b"B_FRAME_B\0";

/// Label for ratcheting a temporary secret into the next period.
pub const LABEL_ROTATE: &[u8] = b"ROTATE\0";
