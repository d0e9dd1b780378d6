//! # Tagwire
//!
//! **Tag**-based authenticated-encrypted **wire** framing.
//!
//! Tagwire is the transport security layer of a messaging system. It sits
//! between an application protocol and raw transports that may be lossy or
//! simplex, and provides:
//!
//! - **Rendezvous**: a new connection opens with a pseudorandom tag that only
//!   the intended contact can recognise; there is no plaintext handshake
//! - **Confidentiality and integrity**: fixed-length frames, encrypted then
//!   MACed, with distinct keys per direction and per connection
//! - **Replay and reorder tolerance**: sliding windows over connection and
//!   frame numbers
//! - **Forward secrecy**: temporary secrets ratchet forward every rotation
//!   period and old ones are erased
//! - **Loss tolerance**: optional XOR-parity segmentation for transports
//!   that drop data
//!
//! ## Feature Flags
//!
//! - `runtime` (default): tokio task driving periodic key rotation
//!
//! ## Modules
//!
//! - [`core`]: identifiers, constants and error types
//! - [`crypto`]: key derivation, tags, unit cipher and MAC
//! - [`transport`]: frames, layers, connection readers and writers
//! - [`keys`]: temporary secrets, key manager and connection recogniser
//! - [`store`]: persistence interface and in-memory store
//! - [`dispatch`]: routing of recognised incoming connections
//!
//! ## Example Usage
//!
//! ```rust
//! use std::io::{Read, Write};
//!
//! use tagwire::prelude::*;
//!
//! let factory = ConnectionFactory::new(DefaultCrypto::shared(), ConnectionConfig::default())?;
//! let secret = [7u8; 32];
//! let ctx = |alice| {
//!     ConnectionContext::new(ContactId(1), TransportId(1), SecretKey::from_bytes(secret), 0, alice)
//! };
//!
//! // Alice opens a connection
//! let raw = MemoryWriter::new();
//! let mut writer = factory.create_writer(ctx(true), raw.clone(), true)?;
//! writer.write_all(b"hello bob")?;
//! writer.close()?;
//!
//! // Bob skips the tag, which his dispatcher would have recognised
//! let bytes = raw.contents();
//! let mut reader = factory.create_reader(ctx(false), MemoryReader::new(bytes[TAG_LENGTH..].to_vec()), false)?;
//! let mut received = Vec::new();
//! reader.read_to_end(&mut received)?;
//! assert_eq!(received, b"hello bob");
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod core;
pub mod crypto;
pub mod dispatch;
pub mod keys;
pub mod store;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::core::*;

    pub use crate::crypto::{CryptoProvider, DefaultCrypto, SecretKey};

    pub use crate::dispatch::{
        ConnectionDispatcher, ConnectionHandler, ConnectionInfo, ConnectionRegistry,
        IncomingConnection,
    };

    pub use crate::keys::{
        Clock, ConnectionRecogniser, KeyManager, KeyManagerConfig, SystemClock, TemporarySecret,
    };
    #[cfg(feature = "runtime")]
    pub use crate::keys::spawn_rotation_task;

    pub use crate::store::{MemoryStore, TransportStore};

    pub use crate::transport::{
        ConnectionConfig, ConnectionFactory, ConnectionReader, ConnectionWindow,
        ConnectionWriter, MemoryReader, MemoryWriter, Segment, SegmentSink, SegmentSource,
        TagProfile, TransportError, TransportReader, TransportResult, TransportWriter,
    };
}

// Re-export commonly used items at crate root
pub use crate::core::{ConnectionContext, ContactId, Error, Tag, TransportId};
pub use crate::transport::{ConnectionFactory, ConnectionReader, ConnectionWriter};
