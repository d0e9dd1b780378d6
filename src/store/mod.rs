//! Persistence of temporary secrets, connection counters and windows.
//!
//! The key manager and recogniser only see [`TransportStore`]. A real
//! deployment backs it with its database; [`MemoryStore`] keeps everything
//! in memory for tests and embedding.

use std::collections::{BTreeSet, HashMap};

use parking_lot::Mutex;
use tracing::debug;

use crate::core::{
    CONNECTION_WINDOW_BYTES, ContactId, MAX_32_BIT_UNSIGNED, StoreError, TransportId,
};
use crate::keys::{Endpoint, TemporarySecret};
use crate::transport::ConnectionWindow;

/// Storage the key manager and recogniser depend on.
///
/// Each stored secret carries an outgoing connection counter (starting at
/// zero) and an incoming connection window (starting empty).
pub trait TransportStore: Send + Sync {
    /// Every stored secret.
    fn get_secrets(&self) -> Result<Vec<TemporarySecret>, StoreError>;

    /// Store new secrets with fresh counters and windows. Secrets already
    /// stored are left untouched.
    fn add_secrets(&self, secrets: &[TemporarySecret]) -> Result<(), StoreError>;

    /// Remove one secret with its counter and window. Removing a secret
    /// that is not stored succeeds.
    fn remove_secret(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<(), StoreError>;

    /// Every known contact.
    fn get_contacts(&self) -> Result<Vec<ContactId>, StoreError>;

    /// Persist the incoming connection window of a secret.
    fn set_connection_window(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
        window: &ConnectionWindow,
    ) -> Result<(), StoreError>;

    /// Load the incoming connection window of a secret, if it is stored.
    fn get_connection_window(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<Option<ConnectionWindow>, StoreError>;

    /// Allocate the next outgoing connection number, returning the counter's
    /// value before the increment.
    fn increment_connection_counter(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<u64, StoreError>;
}

struct StoredSecret {
    secret: TemporarySecret,
    counter: u64,
    window: [u8; CONNECTION_WINDOW_BYTES],
}

#[derive(Default)]
struct MemoryState {
    contacts: BTreeSet<ContactId>,
    secrets: HashMap<(Endpoint, u64), StoredSecret>,
}

/// In-memory [`TransportStore`].
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a contact.
    pub fn add_contact(&self, contact: ContactId) {
        self.state.lock().contacts.insert(contact);
    }

    /// Forget a contact and erase its secrets.
    pub fn remove_contact(&self, contact: ContactId) {
        let mut state = self.state.lock();
        state.contacts.remove(&contact);
        state.secrets.retain(|(endpoint, _), stored| {
            if endpoint.contact_id == contact {
                stored.secret.erase();
                false
            } else {
                true
            }
        });
    }

    /// Periods stored for an endpoint, ascending.
    pub fn periods(&self, contact: ContactId, transport: TransportId) -> Vec<u64> {
        let endpoint = Endpoint::new(contact, transport);
        let mut periods: Vec<u64> = self
            .state
            .lock()
            .secrets
            .keys()
            .filter(|(e, _)| *e == endpoint)
            .map(|(_, p)| *p)
            .collect();
        periods.sort_unstable();
        periods
    }

    /// Overwrite the outgoing connection counter of a stored secret.
    pub fn set_counter(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
        counter: u64,
    ) -> Result<(), StoreError> {
        self.with_secret(contact, transport, period, |stored| {
            stored.counter = counter;
            Ok(())
        })
    }

    fn with_secret<T>(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
        f: impl FnOnce(&mut StoredSecret) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut state = self.state.lock();
        if !state.contacts.contains(&contact) {
            return Err(StoreError::UnknownContact(contact));
        }
        let key = (Endpoint::new(contact, transport), period);
        match state.secrets.get_mut(&key) {
            Some(stored) => f(stored),
            None => Err(StoreError::NoCounter {
                contact,
                transport,
                period,
            }),
        }
    }
}

impl TransportStore for MemoryStore {
    fn get_secrets(&self) -> Result<Vec<TemporarySecret>, StoreError> {
        Ok(self
            .state
            .lock()
            .secrets
            .values()
            .map(|stored| stored.secret.duplicate())
            .collect())
    }

    fn add_secrets(&self, secrets: &[TemporarySecret]) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if let Some(unknown) = secrets
            .iter()
            .find(|s| !state.contacts.contains(&s.contact_id()))
        {
            return Err(StoreError::UnknownContact(unknown.contact_id()));
        }
        for secret in secrets {
            state
                .secrets
                .entry((secret.endpoint(), secret.period()))
                .or_insert_with(|| StoredSecret {
                    secret: secret.duplicate(),
                    counter: 0,
                    window: ConnectionWindow::new().to_bytes(),
                });
        }
        Ok(())
    }

    fn remove_secret(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<(), StoreError> {
        let key = (Endpoint::new(contact, transport), period);
        if let Some(mut stored) = self.state.lock().secrets.remove(&key) {
            stored.secret.erase();
        }
        Ok(())
    }

    fn get_contacts(&self) -> Result<Vec<ContactId>, StoreError> {
        Ok(self.state.lock().contacts.iter().copied().collect())
    }

    fn set_connection_window(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
        window: &ConnectionWindow,
    ) -> Result<(), StoreError> {
        self.with_secret(contact, transport, period, |stored| {
            stored.window = window.to_bytes();
            Ok(())
        })
    }

    fn get_connection_window(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<Option<ConnectionWindow>, StoreError> {
        let result = self.with_secret(contact, transport, period, |stored| {
            ConnectionWindow::from_bytes(&stored.window)
        });
        match result {
            Ok(window) => Ok(Some(window)),
            Err(StoreError::NoCounter { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn increment_connection_counter(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
    ) -> Result<u64, StoreError> {
        self.with_secret(contact, transport, period, |stored| {
            let current = stored.counter;
            if current > MAX_32_BIT_UNSIGNED {
                return Err(StoreError::CounterExhausted { contact, transport });
            }
            stored.counter = current + 1;
            debug!(%contact, %transport, period, connection = current, "allocated connection number");
            Ok(current)
        })
    }
}
