//! Core types, constants, and errors.
//!
//! Everything here is shared by the crypto, transport, and key management
//! layers and has no I/O of its own.

mod constants;
mod error;
mod types;

pub use constants::*;
pub use error::*;
pub use types::*;
