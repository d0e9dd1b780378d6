//! Identifier and context types shared by every layer.

use std::fmt;

use crate::crypto::SecretKey;

use super::constants::TAG_LENGTH;

/// Locally unique identifier of a contact.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactId(pub u32);

impl fmt::Display for ContactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "contact#{}", self.0)
    }
}

/// Identifier of a transport plugin (Bluetooth, TCP, removable drive, ...).
///
/// Embedded in tags and IVs as four big-endian bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u32);

impl TransportId {
    /// Big-endian wire representation.
    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport#{}", self.0)
    }
}

/// Pseudorandom value that opens a connection.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; TAG_LENGTH]);

impl Tag {
    /// Create a tag from raw bytes.
    pub fn from_bytes(bytes: [u8; TAG_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Parse a tag from the start of a buffer.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; TAG_LENGTH] = bytes.get(..TAG_LENGTH)?.try_into().ok()?;
        Some(Self(raw))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; TAG_LENGTH] {
        &self.0
    }
}

impl AsRef<[u8]> for Tag {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag(")?;
        for b in &self.0[..4] {
            write!(f, "{b:02x}")?;
        }
        write!(f, "..)")
    }
}

/// Everything a reader or writer needs to run one connection.
///
/// Owns a copy of the temporary secret; the copy is erased when the context
/// is dropped or explicitly erased.
pub struct ConnectionContext {
    contact_id: ContactId,
    transport_id: TransportId,
    secret: SecretKey,
    connection_number: u64,
    alice: bool,
    tag: Option<Tag>,
}

impl ConnectionContext {
    /// Create a new connection context.
    pub fn new(
        contact_id: ContactId,
        transport_id: TransportId,
        secret: SecretKey,
        connection_number: u64,
        alice: bool,
    ) -> Self {
        Self {
            contact_id,
            transport_id,
            secret,
            connection_number,
            alice,
            tag: None,
        }
    }

    /// Attach the tag this connection was recognised by (or will open with).
    pub fn with_tag(mut self, tag: Tag) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Contact at the other end.
    pub fn contact_id(&self) -> ContactId {
        self.contact_id
    }

    /// Transport the connection runs over.
    pub fn transport_id(&self) -> TransportId {
        self.transport_id
    }

    /// The temporary secret for this connection.
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Connection number within the secret's rotation period.
    pub fn connection_number(&self) -> u64 {
        self.connection_number
    }

    /// Whether we play Alice for this contact.
    pub fn alice(&self) -> bool {
        self.alice
    }

    /// Precomputed tag, if any.
    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    /// Erase the secret held by this context.
    pub fn erase(&mut self) {
        self.secret.erase();
    }
}

impl fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("contact_id", &self.contact_id)
            .field("transport_id", &self.transport_id)
            .field("connection_number", &self.connection_number)
            .field("alice", &self.alice)
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}
