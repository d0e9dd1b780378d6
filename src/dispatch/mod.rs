//! Routing of new incoming connections.
//!
//! The dispatcher reads the tag opening an incoming connection, asks the
//! recogniser who sent it and hands a ready [`ConnectionReader`] to the
//! application's [`ConnectionHandler`]. Connections with unknown tags are
//! dropped without a word. [`ConnectionRegistry`] tracks which contacts are
//! connected over which transports while their connections live.

use std::collections::HashMap;
use std::io::{self, Read};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use crate::core::{ConnectionContext, ContactId, TAG_LENGTH, Tag, TransportId};
use crate::keys::ConnectionRecogniser;
use crate::transport::{
    ConnectionFactory, ConnectionReader, ConnectionWriter, SegmentSource, TransportReader,
    TransportWriter,
};

/// Who is at the other end of a recognised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Contact.
    pub contact_id: ContactId,
    /// Transport.
    pub transport_id: TransportId,
    /// Connection number within the secret's period.
    pub connection_number: u64,
}

impl ConnectionInfo {
    fn of(ctx: &ConnectionContext) -> Self {
        Self {
            contact_id: ctx.contact_id(),
            transport_id: ctx.transport_id(),
            connection_number: ctx.connection_number(),
        }
    }
}

/// A recognised incoming connection, ready to read.
pub struct IncomingConnection {
    /// Who sent it.
    pub info: ConnectionInfo,
    /// The payload stream.
    pub reader: ConnectionReader,
    /// Reply stream, for duplex transports.
    pub writer: Option<ConnectionWriter>,
    /// Keeps the contact marked as connected until dropped.
    pub registration: Registration,
}

/// Receives recognised incoming connections.
pub trait ConnectionHandler: Send + Sync {
    /// Take ownership of a new connection.
    fn handle(&self, connection: IncomingConnection);
}

impl<F> ConnectionHandler for F
where
    F: Fn(IncomingConnection) + Send + Sync,
{
    fn handle(&self, connection: IncomingConnection) {
        self(connection)
    }
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ContactId, HashMap<TransportId, usize>>,
}

/// Live connections per contact and transport.
#[derive(Default)]
pub struct ConnectionRegistry {
    state: Mutex<RegistryState>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a new connection; it is uncounted when the returned
    /// [`Registration`] is dropped.
    pub fn register(self: &Arc<Self>, contact: ContactId, transport: TransportId) -> Registration {
        let first = {
            let mut state = self.state.lock();
            let count = state
                .connections
                .entry(contact)
                .or_default()
                .entry(transport)
                .or_insert(0);
            *count += 1;
            *count == 1
        };
        if first {
            info!(%contact, %transport, "contact connected");
        }
        Registration {
            registry: Arc::clone(self),
            contact,
            transport,
        }
    }

    fn unregister(&self, contact: ContactId, transport: TransportId) {
        let mut state = self.state.lock();
        let Some(transports) = state.connections.get_mut(&contact) else {
            return;
        };
        let Some(count) = transports.get_mut(&transport) else {
            return;
        };
        *count -= 1;
        if *count == 0 {
            transports.remove(&transport);
            info!(%contact, %transport, "contact disconnected");
        }
        if transports.is_empty() {
            state.connections.remove(&contact);
        }
    }

    /// Whether any connection to `contact` is live.
    pub fn is_connected(&self, contact: ContactId) -> bool {
        self.state.lock().connections.contains_key(&contact)
    }

    /// Number of live connections to `contact` over `transport`.
    pub fn connection_count(&self, contact: ContactId, transport: TransportId) -> usize {
        self.state
            .lock()
            .connections
            .get(&contact)
            .and_then(|t| t.get(&transport))
            .copied()
            .unwrap_or(0)
    }

    /// Contacts with at least one live connection over `transport`.
    pub fn connected_contacts(&self, transport: TransportId) -> Vec<ContactId> {
        let mut contacts: Vec<ContactId> = self
            .state
            .lock()
            .connections
            .iter()
            .filter(|(_, t)| t.contains_key(&transport))
            .map(|(c, _)| *c)
            .collect();
        contacts.sort_unstable();
        contacts
    }
}

/// Marks one connection as live in a [`ConnectionRegistry`].
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    contact: ContactId,
    transport: TransportId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.contact, self.transport);
    }
}

/// Recognises incoming connections and routes them to a handler.
pub struct ConnectionDispatcher {
    recogniser: Arc<ConnectionRecogniser>,
    factory: Arc<ConnectionFactory>,
    registry: Arc<ConnectionRegistry>,
    handler: Arc<dyn ConnectionHandler>,
}

impl ConnectionDispatcher {
    /// Create a dispatcher.
    pub fn new(
        recogniser: Arc<ConnectionRecogniser>,
        factory: Arc<ConnectionFactory>,
        registry: Arc<ConnectionRegistry>,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Self {
        Self {
            recogniser,
            factory,
            registry,
            handler,
        }
    }

    /// The registry connections are counted in.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Handle a new simplex stream connection.
    ///
    /// Returns who sent it, or `None` if it was dropped.
    pub fn dispatch_reader<R>(&self, transport: TransportId, reader: R) -> Option<ConnectionInfo>
    where
        R: TransportReader + 'static,
    {
        self.dispatch_stream(transport, reader, None::<NoWriter>)
    }

    /// Handle a new duplex stream connection. The handler also gets a writer
    /// for replies.
    pub fn dispatch_duplex<R, W>(
        &self,
        transport: TransportId,
        reader: R,
        writer: W,
    ) -> Option<ConnectionInfo>
    where
        R: TransportReader + 'static,
        W: TransportWriter + 'static,
    {
        self.dispatch_stream(transport, reader, Some(writer))
    }

    /// Handle a new segment connection. The first segment read must carry
    /// the tag.
    pub fn dispatch_segments<S>(&self, transport: TransportId, mut source: S) -> Option<ConnectionInfo>
    where
        S: SegmentSource + 'static,
    {
        let first = match source.read_segment() {
            Ok(Some(first)) => first,
            Ok(None) => {
                trace!(%transport, "segment connection ended before the tag");
                source.dispose(false, false);
                return None;
            }
            Err(e) => {
                debug!(%transport, error = %e, "failed to read first segment");
                source.dispose(true, false);
                return None;
            }
        };
        let Some(tag) = Tag::from_slice(&first.data) else {
            trace!(%transport, "first segment too short for a tag");
            source.dispose(false, false);
            return None;
        };
        let Some(ctx) = self.recognise(transport, &tag) else {
            source.dispose(false, false);
            return None;
        };

        let info = ConnectionInfo::of(&ctx);
        let registration = self.registry.register(info.contact_id, info.transport_id);
        let reader = match self
            .factory
            .create_segment_reader(ctx, source, false, Some(first))
        {
            Ok(reader) => reader,
            Err(e) => {
                debug!(error = %e, "failed to create segment reader");
                return None;
            }
        };
        self.handler.handle(IncomingConnection {
            info,
            reader,
            writer: None,
            registration,
        });
        Some(info)
    }

    fn dispatch_stream<R, W>(
        &self,
        transport: TransportId,
        mut reader: R,
        writer: Option<W>,
    ) -> Option<ConnectionInfo>
    where
        R: TransportReader + 'static,
        W: TransportWriter + 'static,
    {
        let tag = match read_tag(&mut reader) {
            Ok(tag) => tag,
            Err(e) => {
                debug!(%transport, error = %e, "failed to read tag");
                reader.dispose(true, false);
                dispose_writer(writer, true);
                return None;
            }
        };
        let Some(ctx) = self.recognise(transport, &tag) else {
            reader.dispose(false, false);
            dispose_writer(writer, false);
            return None;
        };

        let info = ConnectionInfo::of(&ctx);
        let reply_ctx = writer.is_some().then(|| {
            ConnectionContext::new(
                ctx.contact_id(),
                ctx.transport_id(),
                ctx.secret().duplicate(),
                ctx.connection_number(),
                ctx.alice(),
            )
        });
        let registration = self.registry.register(info.contact_id, info.transport_id);

        let reader = match self.factory.create_reader(ctx, reader, false) {
            Ok(reader) => reader,
            Err(e) => {
                debug!(error = %e, "failed to create connection reader");
                dispose_writer(writer, true);
                return None;
            }
        };
        let writer = match (writer, reply_ctx) {
            (Some(writer), Some(reply_ctx)) => {
                match self.factory.create_writer(reply_ctx, writer, false) {
                    Ok(writer) => Some(writer),
                    Err(e) => {
                        debug!(error = %e, "failed to create reply writer");
                        reader.close();
                        return None;
                    }
                }
            }
            _ => None,
        };

        self.handler.handle(IncomingConnection {
            info,
            reader,
            writer,
            registration,
        });
        Some(info)
    }

    fn recognise(&self, transport: TransportId, tag: &Tag) -> Option<ConnectionContext> {
        let Some(ctx) = self.recogniser.accept_connection_on(transport, tag) else {
            trace!(%transport, "unrecognised connection dropped");
            return None;
        };
        debug!(
            contact = %ctx.contact_id(),
            %transport,
            connection = ctx.connection_number(),
            "dispatching incoming connection"
        );
        Some(ctx)
    }
}

fn read_tag<R: Read>(reader: &mut R) -> io::Result<Tag> {
    let mut raw = [0u8; TAG_LENGTH];
    reader.read_exact(&mut raw)?;
    Ok(Tag::from_bytes(raw))
}

fn dispose_writer<W: TransportWriter>(writer: Option<W>, exception: bool) {
    if let Some(mut writer) = writer {
        writer.dispose(exception);
    }
}

/// Placeholder writer type for simplex dispatch.
struct NoWriter;

impl io::Write for NoWriter {
    fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
        Err(io::ErrorKind::Unsupported.into())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TransportWriter for NoWriter {
    fn dispose(&mut self, _exception: bool) {}
}
