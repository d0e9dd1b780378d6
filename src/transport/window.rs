//! Sliding window over 32-bit sequence numbers.
//!
//! Used for connection numbers (replay protection of tags) and for frame
//! numbers (bounded reordering). The window covers
//! `[centre - 32, centre + 32)`; `centre` is the lowest number above every
//! number seen so far, so it is always unseen until the domain runs out.

use crate::core::{
    CONNECTION_WINDOW_BYTES, CONNECTION_WINDOW_SIZE, MAX_32_BIT_UNSIGNED, StoreError,
};

const HALF: u64 = (CONNECTION_WINDOW_SIZE / 2) as u64;

/// Seen/unseen bitmap around a sliding centre.
///
/// Bit `i` of the bitmap tracks number `centre - 32 + i`; a set bit means
/// the number has been seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectionWindow {
    centre: u64,
    bitmap: u64,
}

impl ConnectionWindow {
    /// Create an empty window centred on zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Lowest number not below any seen number.
    pub fn centre(&self) -> u64 {
        self.centre
    }

    /// Whether every number in the domain has been passed.
    pub fn is_exhausted(&self) -> bool {
        self.centre > MAX_32_BIT_UNSIGNED
    }

    /// Whether `n` lies within the window and the domain.
    pub fn contains(&self, n: u64) -> bool {
        n <= MAX_32_BIT_UNSIGNED && n + HALF >= self.centre && n < self.centre + HALF
    }

    /// Whether `n` has been seen. Numbers outside the window are not seen.
    pub fn is_seen(&self, n: u64) -> bool {
        self.contains(n) && self.bitmap & (1 << self.index(n)) != 0
    }

    /// Mark `n` as seen, sliding the window forward if `n >= centre`.
    ///
    /// # Panics
    /// If `n` is outside the window or has already been seen. Callers check
    /// with [`contains`](Self::contains) and [`is_seen`](Self::is_seen)
    /// first; getting here with a bad value is a logic error.
    pub fn set_seen(&mut self, n: u64) {
        assert!(self.contains(n), "{n} outside window centred on {}", self.centre);
        assert!(!self.is_seen(n), "{n} already seen");

        if n >= self.centre {
            let shift = n + 1 - self.centre;
            self.bitmap = if shift >= CONNECTION_WINDOW_SIZE as u64 {
                0
            } else {
                self.bitmap >> shift
            };
            self.centre = n + 1;
        }
        self.bitmap |= 1 << self.index(n);
    }

    /// Every unseen number in the window, ascending.
    pub fn unseen(&self) -> Vec<u64> {
        let low = self.centre.saturating_sub(HALF);
        let high = (self.centre + HALF).min(MAX_32_BIT_UNSIGNED + 1);
        (low..high).filter(|&n| !self.is_seen(n)).collect()
    }

    /// Serialize as `centre (BE64) || bitmap (BE64)`.
    pub fn to_bytes(&self) -> [u8; CONNECTION_WINDOW_BYTES] {
        let mut buf = [0u8; CONNECTION_WINDOW_BYTES];
        buf[0..8].copy_from_slice(&self.centre.to_be_bytes());
        buf[8..16].copy_from_slice(&self.bitmap.to_be_bytes());
        buf
    }

    /// Parse a persisted window, rejecting states `set_seen` cannot reach.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        if bytes.len() != CONNECTION_WINDOW_BYTES {
            return Err(StoreError::Corrupt(format!(
                "connection window is {} bytes, expected {CONNECTION_WINDOW_BYTES}",
                bytes.len()
            )));
        }
        let mut centre = [0u8; 8];
        let mut bitmap = [0u8; 8];
        centre.copy_from_slice(&bytes[0..8]);
        bitmap.copy_from_slice(&bytes[8..16]);
        let window = Self {
            centre: u64::from_be_bytes(centre),
            bitmap: u64::from_be_bytes(bitmap),
        };

        if window.centre > MAX_32_BIT_UNSIGNED + 1 {
            return Err(StoreError::Corrupt(format!(
                "window centre {} out of range",
                window.centre
            )));
        }
        // Nothing at or above the centre, or below zero, can have been seen
        let below_zero = HALF.saturating_sub(window.centre);
        let below_centre = (1u64 << HALF) - 1;
        let valid = below_centre & !((1u64 << below_zero) - 1);
        if window.bitmap & !valid != 0 {
            return Err(StoreError::Corrupt(
                "window bitmap marks unreachable numbers".into(),
            ));
        }
        Ok(window)
    }

    fn index(&self, n: u64) -> u64 {
        n + HALF - self.centre
    }
}
