//! Tagwire transport layer.
//!
//! Turns a raw byte stream or segment transport into an authenticated,
//! encrypted, ordered connection:
//!
//! - **Frames**: fixed-length frames with an 8-byte header and zero padding
//! - **Layers**: encryption, authentication, erasure segmentation and
//!   reordering, composed by [`ConnectionFactory`]
//! - **Windows**: [`ConnectionWindow`] tracks which connection numbers have
//!   been seen
//! - **Endpoints**: [`ConnectionWriter`] and [`ConnectionReader`] expose the
//!   payload as `std::io::Write` and `std::io::Read`
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Application payload              │
//! ├─────────────────────────────────────────┤
//! │   ConnectionWriter / ConnectionReader   │
//! ├─────────────────────────────────────────┤
//! │   segmentation, encryption, MAC         │  ← This module
//! ├─────────────────────────────────────────┤
//! │   tag, raw stream or segment transport  │
//! └─────────────────────────────────────────┘
//! ```

mod error;
mod factory;
mod frame;
mod io;
mod memory;
mod reader;
mod window;
mod writer;

pub mod layers;

pub use error::*;
pub use factory::{ConnectionConfig, ConnectionConfigBuilder, ConnectionFactory, TagProfile};
pub use frame::*;
pub use io::{Segment, SegmentSink, SegmentSource, TransportReader, TransportWriter};
pub use memory::{
    Disposal, DisposalProbe, MemoryReader, MemorySegmentSink, MemorySegmentSource, MemoryWriter,
};
pub use reader::ConnectionReader;
pub use window::ConnectionWindow;
pub use writer::ConnectionWriter;
