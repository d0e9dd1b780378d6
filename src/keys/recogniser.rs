//! Recognition of incoming connections by their tags.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::core::{ConnectionContext, ContactId, KeyManagerError, Tag, TransportId};
use crate::crypto::{CryptoProvider, SecretKey};
use crate::store::TransportStore;
use crate::transport::ConnectionWindow;

use super::secret::{Endpoint, TemporarySecret};

type SecretId = (Endpoint, u64);

/// Precomputed tags for one incoming secret.
struct WindowEntry {
    secret: SecretKey,
    tag_key: SecretKey,
    alice: bool,
    window: ConnectionWindow,
    tags: HashMap<u64, Tag>,
}

impl WindowEntry {
    fn erase(&mut self) {
        self.secret.erase();
        self.tag_key.erase();
    }
}

#[derive(Clone, Copy)]
struct TagTarget {
    id: SecretId,
    connection: u64,
}

#[derive(Default)]
struct RecogniserState {
    entries: HashMap<SecretId, WindowEntry>,
    tag_index: HashMap<Tag, TagTarget>,
    // Bumped on every window change
    writes: u64,
}

impl RecogniserState {
    fn remove_entry(&mut self, id: &SecretId) -> bool {
        let Some(mut entry) = self.entries.remove(id) else {
            return false;
        };
        for tag in entry.tags.values() {
            self.tag_index.remove(tag);
        }
        entry.erase();
        true
    }

    fn remove_where(&mut self, mut f: impl FnMut(&SecretId) -> bool) -> usize {
        let ids: Vec<SecretId> = self.entries.keys().filter(|id| f(id)).copied().collect();
        for id in &ids {
            self.remove_entry(id);
        }
        ids.len()
    }
}

/// Maps tags of expected incoming connections to their contexts.
///
/// For every registered secret the recogniser holds the tag of each unseen
/// connection number in that secret's window. Accepting a tag marks its
/// number as seen, so a replayed tag is not recognised twice.
pub struct ConnectionRecogniser {
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn TransportStore>,
    state: Mutex<RecogniserState>,
    // Version of the last window written per secret
    persisted: Mutex<HashMap<SecretId, u64>>,
}

impl ConnectionRecogniser {
    /// Create an empty recogniser.
    pub fn new(crypto: Arc<dyn CryptoProvider>, store: Arc<dyn TransportStore>) -> Self {
        Self {
            crypto,
            store,
            state: Mutex::new(RecogniserState::default()),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    /// Look up a tag read from a new incoming connection.
    ///
    /// Returns `None` for a tag that is not expected; the caller drops the
    /// connection without response.
    pub fn accept_connection(&self, tag: &Tag) -> Option<ConnectionContext> {
        self.accept(tag, None)
    }

    /// Like [`accept_connection`](Self::accept_connection), for a tag read
    /// from `transport`.
    ///
    /// A tag expected on another transport is rejected without marking its
    /// connection number as seen.
    pub fn accept_connection_on(
        &self,
        transport: TransportId,
        tag: &Tag,
    ) -> Option<ConnectionContext> {
        self.accept(tag, Some(transport))
    }

    fn accept(&self, tag: &Tag, transport: Option<TransportId>) -> Option<ConnectionContext> {
        let (ctx, id, window, version) = {
            let mut state = self.state.lock();
            let Some(&target) = state.tag_index.get(tag) else {
                trace!("tag not recognised");
                return None;
            };
            let (endpoint, period) = target.id;
            if let Some(transport) = transport.filter(|t| *t != endpoint.transport_id) {
                debug!(
                    expected = %endpoint.transport_id,
                    actual = %transport,
                    "tag arrived on another transport"
                );
                return None;
            }
            state.tag_index.remove(tag);
            state.writes += 1;
            let version = state.writes;

            let RecogniserState {
                entries,
                tag_index,
                ..
            } = &mut *state;
            let Some(entry) = entries.get_mut(&target.id) else {
                return None;
            };
            entry.tags.remove(&target.connection);

            let before: BTreeSet<u64> = entry.window.unseen().into_iter().collect();
            entry.window.set_seen(target.connection);
            let after: BTreeSet<u64> = entry.window.unseen().into_iter().collect();

            for gone in before.difference(&after) {
                if let Some(old) = entry.tags.remove(gone) {
                    tag_index.remove(&old);
                }
            }
            for &added in after.difference(&before) {
                match self
                    .crypto
                    .encode_tag(&entry.tag_key, endpoint.transport_id, added)
                {
                    Ok(new_tag) => {
                        entry.tags.insert(added, new_tag);
                        tag_index.insert(
                            new_tag,
                            TagTarget {
                                id: target.id,
                                connection: added,
                            },
                        );
                    }
                    Err(e) => warn!(%endpoint, period, connection = added, error = %e, "failed to encode tag"),
                }
            }

            let ctx = ConnectionContext::new(
                endpoint.contact_id,
                endpoint.transport_id,
                entry.secret.duplicate(),
                target.connection,
                entry.alice,
            )
            .with_tag(*tag);
            (ctx, target.id, entry.window, version)
        };

        let (endpoint, period) = id;
        debug!(
            %endpoint,
            period,
            connection = ctx.connection_number(),
            "recognised incoming connection"
        );
        self.persist_window(id, version, &window);
        Some(ctx)
    }

    /// Write a window unless a later copy of it has already been written.
    ///
    /// Window writes are serialised, and `version` orders the copies taken
    /// under the state lock.
    fn persist_window(&self, id: SecretId, version: u64, window: &ConnectionWindow) {
        let (endpoint, period) = id;
        let mut persisted = self.persisted.lock();
        if persisted.get(&id).is_some_and(|&last| last >= version) {
            trace!(%endpoint, period, version, "newer window already persisted");
            return;
        }
        match self.store.set_connection_window(
            endpoint.contact_id,
            endpoint.transport_id,
            period,
            window,
        ) {
            Ok(()) => {
                persisted.insert(id, version);
            }
            Err(e) => warn!(%endpoint, period, error = %e, "failed to persist connection window"),
        }
    }

    /// Start recognising connections made with `secret`, loading its window
    /// from the store. Replaces any registration of the same period.
    pub fn add_secret(&self, secret: &TemporarySecret) -> Result<(), KeyManagerError> {
        let endpoint = secret.endpoint();
        let period = secret.period();
        let window = self
            .store
            .get_connection_window(endpoint.contact_id, endpoint.transport_id, period)?
            .unwrap_or_default();

        // The peer opens connections with a tag derived under its own role
        let tag_key = self.crypto.derive_tag_key(secret.secret(), !secret.alice())?;
        let mut tags = HashMap::new();
        for connection in window.unseen() {
            let tag = self
                .crypto
                .encode_tag(&tag_key, endpoint.transport_id, connection)?;
            tags.insert(connection, tag);
        }

        let id = (endpoint, period);
        let count = tags.len();
        let mut state = self.state.lock();
        state.remove_entry(&id);
        for (&connection, &tag) in &tags {
            state.tag_index.insert(tag, TagTarget { id, connection });
        }
        state.entries.insert(
            id,
            WindowEntry {
                secret: secret.secret().duplicate(),
                tag_key,
                alice: secret.alice(),
                window,
                tags,
            },
        );
        drop(state);

        debug!(%endpoint, period, tags = count, "registered incoming secret");
        Ok(())
    }

    /// Stop recognising connections made with one secret.
    pub fn remove_secret(&self, contact: ContactId, transport: TransportId, period: u64) {
        let id = (Endpoint::new(contact, transport), period);
        if self.state.lock().remove_entry(&id) {
            debug!(%contact, %transport, period, "unregistered incoming secret");
        }
        self.persisted.lock().remove(&id);
    }

    /// Stop recognising connections from a contact.
    pub fn remove_secrets(&self, contact: ContactId) {
        let removed = self
            .state
            .lock()
            .remove_where(|(endpoint, _)| endpoint.contact_id == contact);
        self.persisted
            .lock()
            .retain(|(endpoint, _), _| endpoint.contact_id != contact);
        if removed > 0 {
            debug!(%contact, secrets = removed, "unregistered contact");
        }
    }

    /// Drop every registration for contacts outside `contacts`.
    pub fn retain_contacts(&self, contacts: &HashSet<ContactId>) {
        let removed = self
            .state
            .lock()
            .remove_where(|(endpoint, _)| !contacts.contains(&endpoint.contact_id));
        self.persisted
            .lock()
            .retain(|(endpoint, _), _| contacts.contains(&endpoint.contact_id));
        if removed > 0 {
            debug!(secrets = removed, "unregistered secrets of removed contacts");
        }
    }

    /// Drop every registration.
    pub fn remove_all(&self) {
        let mut state = self.state.lock();
        for entry in state.entries.values_mut() {
            entry.erase();
        }
        state.entries.clear();
        state.tag_index.clear();
        drop(state);
        self.persisted.lock().clear();
    }

    /// Whether a secret is registered.
    pub fn is_registered(&self, contact: ContactId, transport: TransportId, period: u64) -> bool {
        let id = (Endpoint::new(contact, transport), period);
        self.state.lock().entries.contains_key(&id)
    }

    /// Number of tags currently expected.
    pub fn tag_count(&self) -> usize {
        self.state.lock().tag_index.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::core::{CONNECTION_WINDOW_SIZE, StoreError};
    use crate::crypto::DefaultCrypto;
    use crate::store::MemoryStore;

    const CONTACT: ContactId = ContactId(1);
    const TRANSPORT: TransportId = TransportId(9);

    fn secret(period: u64, alice: bool) -> TemporarySecret {
        TemporarySecret::new(
            CONTACT,
            TRANSPORT,
            period,
            SecretKey::from_bytes([0x21 + period as u8; 32]),
            0,
            1_000,
            500,
            alice,
        )
    }

    fn setup() -> (ConnectionRecogniser, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(CONTACT);
        store.add_contact(ContactId(2));
        let recogniser = ConnectionRecogniser::new(DefaultCrypto::shared(), store.clone());
        (recogniser, store)
    }

    /// Tag the peer (playing the other role) opens connection `n` with.
    fn peer_tag(secret: &TemporarySecret, connection: u64) -> Tag {
        let crypto = DefaultCrypto;
        let key = crypto
            .derive_tag_key(secret.secret(), !secret.alice())
            .unwrap();
        crypto
            .encode_tag(&key, secret.transport_id(), connection)
            .unwrap()
    }

    #[test]
    fn test_accepts_peer_tag_once() {
        let (recogniser, _) = setup();
        let s = secret(0, true);
        recogniser.add_secret(&s).unwrap();
        assert_eq!(recogniser.tag_count(), CONNECTION_WINDOW_SIZE / 2);

        let tag = peer_tag(&s, 0);
        let ctx = recogniser.accept_connection(&tag).unwrap();
        assert_eq!(ctx.contact_id(), CONTACT);
        assert_eq!(ctx.connection_number(), 0);
        assert!(ctx.alice());
        assert_eq!(ctx.tag(), Some(&tag));
        assert_eq!(ctx.secret(), s.secret());

        assert!(recogniser.accept_connection(&tag).is_none());
    }

    #[test]
    fn test_own_role_tag_not_recognised() {
        let (recogniser, _) = setup();
        let s = secret(0, true);
        recogniser.add_secret(&s).unwrap();
        let crypto = DefaultCrypto;
        let key = crypto.derive_tag_key(s.secret(), true).unwrap();
        let own = crypto.encode_tag(&key, TRANSPORT, 0).unwrap();
        assert!(recogniser.accept_connection(&own).is_none());
        assert!(recogniser.accept_connection(&Tag([0; 16])).is_none());
    }

    #[test]
    fn test_window_slides_and_persists() {
        let (recogniser, store) = setup();
        store.add_secrets(&[secret(0, false)]).unwrap();
        let s = secret(0, false);
        recogniser.add_secret(&s).unwrap();

        // Accepting 20 slides the window so 32..=52 become eligible
        recogniser.accept_connection(&peer_tag(&s, 20)).unwrap();
        assert_eq!(recogniser.tag_count(), 32 + 21 - 1);
        let ctx = recogniser.accept_connection(&peer_tag(&s, 52)).unwrap();
        assert_eq!(ctx.connection_number(), 52);

        // Numbers below the new window are forgotten
        assert!(recogniser.accept_connection(&peer_tag(&s, 5)).is_none());
        assert!(recogniser.accept_connection(&peer_tag(&s, 21)).is_some());

        let window = store
            .get_connection_window(CONTACT, TRANSPORT, 0)
            .unwrap()
            .unwrap();
        assert_eq!(window.centre(), 53);
        assert!(window.is_seen(21) && window.is_seen(52));
        assert!(!window.contains(20));
    }

    #[test]
    fn test_registration_loads_window() {
        let (recogniser, store) = setup();
        let s = secret(3, true);
        store.add_secrets(&[s.duplicate()]).unwrap();
        let mut window = ConnectionWindow::new();
        window.set_seen(0);
        store
            .set_connection_window(CONTACT, TRANSPORT, 3, &window)
            .unwrap();

        recogniser.add_secret(&s).unwrap();
        assert!(recogniser.accept_connection(&peer_tag(&s, 0)).is_none());
        assert!(recogniser.accept_connection(&peer_tag(&s, 1)).is_some());
    }

    #[test]
    fn test_removal() {
        let (recogniser, _) = setup();
        let a = secret(0, true);
        let b = secret(1, true);
        let other = TemporarySecret::new(
            ContactId(2),
            TRANSPORT,
            0,
            SecretKey::from_bytes([0x77; 32]),
            0,
            1_000,
            500,
            false,
        );
        recogniser.add_secret(&a).unwrap();
        recogniser.add_secret(&b).unwrap();
        recogniser.add_secret(&other).unwrap();

        recogniser.remove_secret(CONTACT, TRANSPORT, 0);
        assert!(!recogniser.is_registered(CONTACT, TRANSPORT, 0));
        assert!(recogniser.accept_connection(&peer_tag(&a, 0)).is_none());
        assert!(recogniser.accept_connection(&peer_tag(&b, 0)).is_some());

        recogniser.retain_contacts(&HashSet::from([ContactId(2)]));
        assert!(!recogniser.is_registered(CONTACT, TRANSPORT, 1));
        assert!(recogniser.is_registered(ContactId(2), TRANSPORT, 0));

        recogniser.remove_secrets(ContactId(2));
        assert_eq!(recogniser.tag_count(), 0);
    }

    #[test]
    fn test_reregistration_replaces_tags() {
        let (recogniser, _) = setup();
        let s = secret(0, true);
        recogniser.add_secret(&s).unwrap();
        recogniser.add_secret(&s).unwrap();
        assert_eq!(recogniser.tag_count(), CONNECTION_WINDOW_SIZE / 2);
        recogniser.remove_all();
        assert_eq!(recogniser.tag_count(), 0);
    }

    #[test]
    fn test_tag_on_other_transport_left_unseen() {
        let (recogniser, _) = setup();
        let s = secret(0, true);
        recogniser.add_secret(&s).unwrap();
        let tag = peer_tag(&s, 0);

        assert!(recogniser.accept_connection_on(TransportId(99), &tag).is_none());
        assert_eq!(recogniser.tag_count(), CONNECTION_WINDOW_SIZE / 2);
        let ctx = recogniser.accept_connection_on(TRANSPORT, &tag).unwrap();
        assert_eq!(ctx.connection_number(), 0);
    }

    /// Holds the first window write until released.
    struct GatedStore {
        inner: MemoryStore,
        gate: Mutex<Option<(mpsc::Sender<()>, mpsc::Receiver<()>)>>,
    }

    impl TransportStore for GatedStore {
        fn get_secrets(&self) -> Result<Vec<TemporarySecret>, StoreError> {
            self.inner.get_secrets()
        }

        fn add_secrets(&self, secrets: &[TemporarySecret]) -> Result<(), StoreError> {
            self.inner.add_secrets(secrets)
        }

        fn remove_secret(
            &self,
            contact: ContactId,
            transport: TransportId,
            period: u64,
        ) -> Result<(), StoreError> {
            self.inner.remove_secret(contact, transport, period)
        }

        fn get_contacts(&self) -> Result<Vec<ContactId>, StoreError> {
            self.inner.get_contacts()
        }

        fn set_connection_window(
            &self,
            contact: ContactId,
            transport: TransportId,
            period: u64,
            window: &ConnectionWindow,
        ) -> Result<(), StoreError> {
            let gate = self.gate.lock().take();
            if let Some((entered, release)) = gate {
                entered.send(()).unwrap();
                release.recv().unwrap();
            }
            self.inner
                .set_connection_window(contact, transport, period, window)
        }

        fn get_connection_window(
            &self,
            contact: ContactId,
            transport: TransportId,
            period: u64,
        ) -> Result<Option<ConnectionWindow>, StoreError> {
            self.inner.get_connection_window(contact, transport, period)
        }

        fn increment_connection_counter(
            &self,
            contact: ContactId,
            transport: TransportId,
            period: u64,
        ) -> Result<u64, StoreError> {
            self.inner
                .increment_connection_counter(contact, transport, period)
        }
    }

    #[test]
    fn test_concurrent_accepts_persist_latest_window() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            gate: Mutex::new(Some((entered_tx, release_rx))),
        });
        store.inner.add_contact(CONTACT);
        let s = secret(0, false);
        store.inner.add_secrets(&[s.duplicate()]).unwrap();
        let recogniser = Arc::new(ConnectionRecogniser::new(
            DefaultCrypto::shared(),
            store.clone(),
        ));
        recogniser.add_secret(&s).unwrap();

        let accept = |connection: u64| {
            let recogniser = recogniser.clone();
            let tag = peer_tag(&s, connection);
            thread::spawn(move || recogniser.accept_connection(&tag).is_some())
        };

        // The first accept stalls while writing its window
        let first = accept(0);
        entered_rx.recv().unwrap();
        let second = accept(1);
        thread::sleep(Duration::from_millis(50));
        release_tx.send(()).unwrap();
        assert!(first.join().unwrap());
        assert!(second.join().unwrap());

        let window = store
            .inner
            .get_connection_window(CONTACT, TRANSPORT, 0)
            .unwrap()
            .unwrap();
        assert!(window.is_seen(0) && window.is_seen(1));

        // After a restart neither connection is accepted again
        let restarted = ConnectionRecogniser::new(DefaultCrypto::shared(), store.clone());
        restarted.add_secret(&s).unwrap();
        assert!(restarted.accept_connection(&peer_tag(&s, 0)).is_none());
        assert!(restarted.accept_connection(&peer_tag(&s, 1)).is_none());
        assert!(restarted.accept_connection(&peer_tag(&s, 2)).is_some());
    }
}
