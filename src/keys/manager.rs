//! Forward-secret rotation of temporary secrets.
//!
//! Every endpoint's secrets share an epoch and a rotation period `R`. The
//! secret of period `p` is created at `c = epoch + p * R`:
//!
//! ```text
//!   c            c + D        c + R        c + R + D      c + 2R
//!   |-- new, in -|-- new, in, out --|-- old, in, out --|-- old, in --| dead
//! ```
//!
//! where `D` is the tolerated clock difference. Every pass recomputes the
//! phase of every secret from the current wall-clock time, so passes may be
//! delayed or skipped without harm. Dead secrets are erased, and secrets for
//! periods nobody holds yet are derived forward from the newest one.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::{
    ConnectionContext, ContactId, KeyManagerError, ROTATION_CHECK_INTERVAL, StoreError,
    TransportId,
};
use crate::crypto::{CryptoProvider, SecretKey};
use crate::store::TransportStore;

use super::clock::Clock;
use super::recogniser::ConnectionRecogniser;
use super::secret::{Endpoint, TemporarySecret, creation_time};

/// Key manager settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyManagerConfig {
    /// How often the rotation task checks for secrets to rotate.
    pub check_interval: Duration,
}

impl Default for KeyManagerConfig {
    fn default() -> Self {
        Self {
            check_interval: ROTATION_CHECK_INTERVAL,
        }
    }
}

impl KeyManagerConfig {
    /// Set the rotation check interval.
    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }
}

/// Secrets created and destroyed by rotation passes, not yet written to
/// the store and the recogniser.
#[derive(Default)]
struct RotationOutcome {
    created: Vec<TemporarySecret>,
    destroyed: Vec<(Endpoint, u64)>,
}

impl RotationOutcome {
    fn is_empty(&self) -> bool {
        self.created.is_empty() && self.destroyed.is_empty()
    }

    /// Fold in the outcome of a later pass. A secret created here and
    /// destroyed there is dropped, but its store removal is kept.
    fn merge(&mut self, later: RotationOutcome) {
        let RotationOutcome { created, destroyed } = later;
        self.created.retain_mut(|secret| {
            let dead = destroyed.contains(&(secret.endpoint(), secret.period()));
            if dead {
                secret.erase();
            }
            !dead
        });
        for secret in created {
            let id = (secret.endpoint(), secret.period());
            match self
                .created
                .iter_mut()
                .find(|s| (s.endpoint(), s.period()) == id)
            {
                Some(existing) => {
                    existing.erase();
                    *existing = secret;
                }
                None => self.created.push(secret),
            }
        }
        for id in destroyed {
            if !self.destroyed.contains(&id) {
                self.destroyed.push(id);
            }
        }
    }

    /// Drop everything concerning endpoints matching `f`.
    fn forget(&mut self, mut f: impl FnMut(&Endpoint) -> bool) {
        self.created.retain_mut(|secret| {
            let gone = f(&secret.endpoint());
            if gone {
                secret.erase();
            }
            !gone
        });
        self.destroyed.retain(|(endpoint, _)| !f(endpoint));
    }

    fn erase(&mut self) {
        for secret in &mut self.created {
            secret.erase();
        }
        self.created.clear();
        self.destroyed.clear();
    }
}

#[derive(Default)]
struct ManagerState {
    running: bool,
    endpoints: HashMap<Endpoint, BTreeMap<u64, TemporarySecret>>,
    // Changes still to be written to the store and the recogniser
    pending: RotationOutcome,
}

impl ManagerState {
    fn erase_all(&mut self) {
        for secrets in self.endpoints.values_mut() {
            for secret in secrets.values_mut() {
                secret.erase();
            }
        }
        self.endpoints.clear();
        self.pending.erase();
    }

    fn remove_endpoints(&mut self, mut f: impl FnMut(&Endpoint) -> bool) {
        self.endpoints.retain(|endpoint, secrets| {
            if !f(endpoint) {
                return true;
            }
            for secret in secrets.values_mut() {
                secret.erase();
            }
            false
        });
        self.pending.forget(f);
    }
}

/// Where the outgoing secret of an endpoint stands.
enum Outgoing {
    Unknown,
    Stale,
    Ready(u64, SecretKey, bool),
}

/// Current period of an endpoint at `now`, checking the clock against the
/// newest secret held.
fn current_period(
    secrets: &BTreeMap<u64, TemporarySecret>,
    now: u64,
) -> Result<u64, KeyManagerError> {
    let Some((&newest, sample)) = secrets.last_key_value() else {
        return Ok(0);
    };
    let rotation = sample.rotation_period();
    if rotation == 0 {
        return Err(KeyManagerError::InvalidRotationPeriod {
            contact: sample.contact_id(),
            transport: sample.transport_id(),
        });
    }
    let creation = creation_time(sample.epoch(), rotation, newest);
    if now < sample.epoch() || now < creation {
        return Err(KeyManagerError::ClockMovedBackwards { now, creation });
    }
    Ok((now - sample.epoch()) / rotation)
}

/// Bring one endpoint's secrets to `now`: keep periods `cp - 1` and `cp`.
fn rotate_endpoint(
    crypto: &dyn CryptoProvider,
    secrets: &mut BTreeMap<u64, TemporarySecret>,
    now: u64,
    outcome: &mut RotationOutcome,
) -> Result<(), KeyManagerError> {
    let current = current_period(secrets, now)?;
    let keep_from = current.saturating_sub(1);
    let held: Vec<u64> = secrets.keys().copied().collect();

    // Derive forward through any periods missed while offline
    while let Some((&newest, secret)) = secrets.last_key_value() {
        if newest >= current {
            break;
        }
        let next = secret.successor(crypto)?;
        if next.period() >= keep_from {
            outcome.created.push(next.duplicate());
        }
        secrets.insert(next.period(), next);
    }

    let dead: Vec<u64> = secrets.range(..keep_from).map(|(&p, _)| p).collect();
    for period in dead {
        if let Some(mut secret) = secrets.remove(&period) {
            secret.erase();
            if held.contains(&period) {
                outcome.destroyed.push((secret.endpoint(), period));
            }
        }
    }
    Ok(())
}

/// Period outgoing connections use at `now`, if its secret is held.
///
/// The previous period's secret stays outgoing for the first `D` ms of a
/// period, so a peer whose clock is up to `D` behind still holds it.
fn outgoing_period(secrets: &BTreeMap<u64, TemporarySecret>, now: u64) -> Option<u64> {
    let (_, sample) = secrets.first_key_value()?;
    let rotation = sample.rotation_period();
    if rotation == 0 || now < sample.epoch() {
        return None;
    }
    let current = (now - sample.epoch()) / rotation;
    let switch = creation_time(sample.epoch(), rotation, current)
        .saturating_add(sample.clock_difference());
    let period = if now < switch && current > 0 {
        current - 1
    } else {
        current
    };
    secrets.contains_key(&period).then_some(period)
}

/// Owns every temporary secret and keeps them rotated.
///
/// Newly created secrets are written to the store and registered with the
/// recogniser; destroyed secrets are erased, unregistered and removed from
/// the store.
pub struct KeyManager {
    crypto: Arc<dyn CryptoProvider>,
    store: Arc<dyn TransportStore>,
    recogniser: Arc<ConnectionRecogniser>,
    clock: Arc<dyn Clock>,
    config: KeyManagerConfig,
    state: Mutex<ManagerState>,
    // Serialises writes of pending changes
    flush_lock: Mutex<()>,
}

impl KeyManager {
    /// Create a stopped key manager.
    pub fn new(
        crypto: Arc<dyn CryptoProvider>,
        store: Arc<dyn TransportStore>,
        recogniser: Arc<ConnectionRecogniser>,
        clock: Arc<dyn Clock>,
        config: KeyManagerConfig,
    ) -> Self {
        Self {
            crypto,
            store,
            recogniser,
            clock,
            config,
            state: Mutex::new(ManagerState::default()),
            flush_lock: Mutex::new(()),
        }
    }

    /// The recogniser fed by this manager.
    pub fn recogniser(&self) -> &Arc<ConnectionRecogniser> {
        &self.recogniser
    }

    /// Settings.
    pub fn config(&self) -> &KeyManagerConfig {
        &self.config
    }

    /// Whether the manager has been started and not stopped.
    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Load secrets from the store, rotate them to the current time and
    /// register them with the recogniser.
    pub fn start(&self) -> Result<(), KeyManagerError> {
        if self.is_running() {
            return Err(KeyManagerError::AlreadyRunning);
        }
        let loaded = self.store.get_secrets()?;
        let now = self.clock.now_millis();

        let (mut outcome, mut live) = {
            let mut state = self.state.lock();
            if state.running {
                return Err(KeyManagerError::AlreadyRunning);
            }
            for secret in loaded {
                state
                    .endpoints
                    .entry(secret.endpoint())
                    .or_default()
                    .insert(secret.period(), secret);
            }

            let mut outcome = RotationOutcome::default();
            let mut failure = None;
            for secrets in state.endpoints.values_mut() {
                if let Err(e) = rotate_endpoint(&*self.crypto, secrets, now, &mut outcome) {
                    failure = Some(e);
                    break;
                }
            }
            if let Some(e) = failure {
                state.erase_all();
                error!(error = %e, "failed to rotate loaded secrets");
                return Err(e);
            }
            state.endpoints.retain(|_, secrets| !secrets.is_empty());
            state.running = true;
            let live: Vec<TemporarySecret> = state
                .endpoints
                .values()
                .flat_map(|secrets| secrets.values().map(TemporarySecret::duplicate))
                .collect();
            (outcome, live)
        };

        let result = self.persist(&outcome).and_then(|()| {
            live.iter()
                .try_for_each(|secret| self.recogniser.add_secret(secret))
        });
        outcome.erase();
        for secret in &mut live {
            secret.erase();
        }
        if let Err(e) = result {
            error!(error = %e, "failed to store rotated secrets, not starting");
            {
                let mut state = self.state.lock();
                state.erase_all();
                state.running = false;
            }
            self.recogniser.remove_all();
            return Err(e);
        }
        info!(
            endpoints = self.state.lock().endpoints.len(),
            secrets = live.len(),
            "key manager started"
        );
        Ok(())
    }

    /// Erase every secret and stop recognising connections.
    pub fn stop(&self) {
        let mut state = self.state.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.erase_all();
        drop(state);
        self.recogniser.remove_all();
        info!("key manager stopped");
    }

    /// Run one rotation pass at the clock's current time.
    ///
    /// Changes a previous pass could not write are retried first. A fatal
    /// error stops the manager.
    pub fn tick(&self) -> Result<(), KeyManagerError> {
        let now = self.clock.now_millis();
        {
            let mut state = self.state.lock();
            if !state.running {
                return Err(KeyManagerError::NotRunning);
            }
            let mut outcome = RotationOutcome::default();
            let mut failure = None;
            for secrets in state.endpoints.values_mut() {
                if let Err(e) = rotate_endpoint(&*self.crypto, secrets, now, &mut outcome) {
                    failure = Some(e);
                    break;
                }
            }
            if let Some(e) = failure {
                outcome.erase();
                drop(state);
                return Err(self.fail(e));
            }
            state.pending.merge(outcome);
        }
        self.flush()
    }

    /// Context for a new outgoing connection to `contact` over `transport`.
    ///
    /// Returns `None` when no secret is held for the endpoint or its
    /// connection numbers are used up.
    pub fn get_connection_context(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<Option<ConnectionContext>, KeyManagerError> {
        let endpoint = Endpoint::new(contact, transport);
        let mut outgoing = self.outgoing_secret(&endpoint, self.clock.now_millis())?;
        if let Outgoing::Stale = outgoing {
            // Rotation passes are late; catch up before picking a secret
            debug!(%endpoint, "outgoing secret not held, rotating first");
            self.tick()?;
            outgoing = self.outgoing_secret(&endpoint, self.clock.now_millis())?;
        }
        let (period, secret, alice) = match outgoing {
            Outgoing::Ready(period, secret, alice) => (period, secret, alice),
            Outgoing::Unknown => {
                debug!(%contact, %transport, "no secrets for endpoint");
                return Ok(None);
            }
            Outgoing::Stale => return Ok(None),
        };

        let connection = match self
            .store
            .increment_connection_counter(contact, transport, period)
        {
            Ok(connection) => connection,
            Err(StoreError::CounterExhausted { .. }) => {
                warn!(%contact, %transport, period, "connection numbers exhausted");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        debug!(%contact, %transport, period, connection, "allocated outgoing connection");
        Ok(Some(ConnectionContext::new(
            contact, transport, secret, connection, alice,
        )))
    }

    /// Add the initial secret of a new endpoint, rotating it to the current
    /// time.
    pub fn add_endpoint(&self, initial: TemporarySecret) -> Result<(), KeyManagerError> {
        let now = self.clock.now_millis();
        let endpoint = initial.endpoint();
        let initial_id = (endpoint, initial.period());
        let stored_copy = initial.duplicate();

        {
            let mut state = self.state.lock();
            if !state.running {
                return Err(KeyManagerError::NotRunning);
            }
            let secrets = state.endpoints.entry(endpoint).or_default();
            secrets.insert(initial.period(), initial);
            let mut outcome = RotationOutcome::default();
            if let Err(e) = rotate_endpoint(&*self.crypto, secrets, now, &mut outcome) {
                for secret in secrets.values_mut() {
                    secret.erase();
                }
                state.endpoints.remove(&endpoint);
                outcome.erase();
                return Err(e);
            }

            // The initial secret was never stored, so a dead one is dropped
            // rather than destroyed
            if let Some(pos) = outcome.destroyed.iter().position(|id| *id == initial_id) {
                outcome.destroyed.swap_remove(pos);
                let mut unused = stored_copy;
                unused.erase();
            } else {
                outcome.created.insert(0, stored_copy);
            }
            state.pending.merge(outcome);
        }

        info!(%endpoint, "added endpoint");
        self.flush()
    }

    /// Forget a removed contact.
    pub fn contact_removed(&self, contact: ContactId) {
        self.state
            .lock()
            .remove_endpoints(|endpoint| endpoint.contact_id == contact);
        self.recogniser.remove_secrets(contact);
        debug!(%contact, "contact removed");
    }

    /// Drop secrets of contacts the store no longer knows.
    pub fn sync_contacts(&self) -> Result<(), KeyManagerError> {
        let contacts: HashSet<ContactId> = self.store.get_contacts()?.into_iter().collect();
        self.state
            .lock()
            .remove_endpoints(|endpoint| !contacts.contains(&endpoint.contact_id));
        self.recogniser.retain_contacts(&contacts);
        Ok(())
    }

    /// Periods currently held for an endpoint, ascending.
    pub fn held_periods(&self, contact: ContactId, transport: TransportId) -> Vec<u64> {
        self.state
            .lock()
            .endpoints
            .get(&Endpoint::new(contact, transport))
            .map(|secrets| secrets.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Period outgoing connections to an endpoint use right now, if its
    /// secret is already held.
    pub fn outgoing_period(&self, contact: ContactId, transport: TransportId) -> Option<u64> {
        let now = self.clock.now_millis();
        let state = self.state.lock();
        outgoing_period(state.endpoints.get(&Endpoint::new(contact, transport))?, now)
    }

    fn persist(&self, outcome: &RotationOutcome) -> Result<(), KeyManagerError> {
        if !outcome.created.is_empty() {
            self.store.add_secrets(&outcome.created)?;
        }
        for (endpoint, period) in &outcome.destroyed {
            self.store
                .remove_secret(endpoint.contact_id, endpoint.transport_id, *period)?;
        }
        Ok(())
    }

    fn outgoing_secret(&self, endpoint: &Endpoint, now: u64) -> Result<Outgoing, KeyManagerError> {
        let state = self.state.lock();
        if !state.running {
            return Err(KeyManagerError::NotRunning);
        }
        let Some(secrets) = state.endpoints.get(endpoint) else {
            return Ok(Outgoing::Unknown);
        };
        Ok(outgoing_period(secrets, now)
            .and_then(|period| secrets.get(&period))
            .map_or(Outgoing::Stale, |secret| {
                Outgoing::Ready(secret.period(), secret.secret().duplicate(), secret.alice())
            }))
    }

    /// Write pending changes to the recogniser and the store.
    ///
    /// Destroyed secrets are unregistered first, whatever the store does.
    /// Changes that cannot be written stay pending for the next pass.
    fn flush(&self) -> Result<(), KeyManagerError> {
        let _flushing = self.flush_lock.lock();
        let mut outcome = std::mem::take(&mut self.state.lock().pending);
        if outcome.is_empty() {
            return Ok(());
        }

        for (endpoint, period) in &outcome.destroyed {
            self.recogniser
                .remove_secret(endpoint.contact_id, endpoint.transport_id, *period);
        }
        let result = self.persist(&outcome).and_then(|()| {
            outcome
                .created
                .iter()
                .try_for_each(|secret| self.recogniser.add_secret(secret))
        });
        if let Err(e) = result {
            warn!(
                error = %e,
                created = outcome.created.len(),
                destroyed = outcome.destroyed.len(),
                "failed to write rotated secrets, retrying next pass"
            );
            let mut state = self.state.lock();
            if state.running {
                let later = std::mem::take(&mut state.pending);
                outcome.merge(later);
                state.pending = outcome;
            } else {
                outcome.erase();
            }
            return Err(e);
        }

        for secret in &outcome.created {
            debug!(endpoint = %secret.endpoint(), period = secret.period(), "created secret");
        }
        for (endpoint, period) in &outcome.destroyed {
            debug!(%endpoint, period, "destroyed secret");
        }
        outcome.erase();
        Ok(())
    }

    fn fail(&self, err: KeyManagerError) -> KeyManagerError {
        if err.is_fatal() {
            error!(error = %err, "fatal key rotation error, stopping key manager");
            self.stop();
        } else {
            warn!(error = %err, "key rotation pass failed");
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::MAX_32_BIT_UNSIGNED;
    use crate::crypto::DefaultCrypto;
    use crate::keys::clock::ManualClock;
    use crate::store::MemoryStore;
    use crate::transport::ConnectionWindow;

    const CONTACT: ContactId = ContactId(4);
    const TRANSPORT: TransportId = TransportId(1);
    const EPOCH: u64 = 1_000_000;
    const D: u64 = 100;
    const L: u64 = 50;
    const R: u64 = 2 * D + L;

    fn initial(alice: bool) -> TemporarySecret {
        TemporarySecret::new(
            CONTACT,
            TRANSPORT,
            0,
            SecretKey::from_bytes([0x3C; 32]),
            EPOCH,
            D,
            L,
            alice,
        )
    }

    struct Fixture {
        manager: KeyManager,
        store: Arc<MemoryStore>,
        clock: ManualClock,
    }

    fn fixture(now: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(CONTACT);
        let crypto = DefaultCrypto::shared();
        let recogniser = Arc::new(ConnectionRecogniser::new(crypto.clone(), store.clone()));
        let clock = ManualClock::new(now);
        let manager = KeyManager::new(
            crypto,
            store.clone(),
            recogniser,
            Arc::new(clock.clone()),
            KeyManagerConfig::default(),
        );
        Fixture {
            manager,
            store,
            clock,
        }
    }

    #[test]
    fn test_requires_start() {
        let f = fixture(EPOCH);
        assert!(matches!(f.manager.tick(), Err(KeyManagerError::NotRunning)));
        assert!(matches!(
            f.manager.add_endpoint(initial(true)),
            Err(KeyManagerError::NotRunning)
        ));
        f.manager.start().unwrap();
        assert!(matches!(
            f.manager.start(),
            Err(KeyManagerError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_add_endpoint_at_epoch() {
        let f = fixture(EPOCH + 10);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();

        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![0]);
        assert_eq!(f.store.periods(CONTACT, TRANSPORT), vec![0]);
        assert!(f.manager.recogniser().is_registered(CONTACT, TRANSPORT, 0));
        assert_eq!(f.manager.outgoing_period(CONTACT, TRANSPORT), Some(0));
    }

    #[test]
    fn test_rotation_phases() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();

        // Period 1 starts; outgoing stays on 0 until the clock difference passes
        f.clock.set(EPOCH + R);
        f.manager.tick().unwrap();
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![0, 1]);
        assert_eq!(f.manager.outgoing_period(CONTACT, TRANSPORT), Some(0));
        f.clock.set(EPOCH + R + D);
        assert_eq!(f.manager.outgoing_period(CONTACT, TRANSPORT), Some(1));

        // Period 0 dies at 2R
        f.clock.set(EPOCH + 2 * R);
        f.manager.tick().unwrap();
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![1, 2]);
        assert_eq!(f.store.periods(CONTACT, TRANSPORT), vec![1, 2]);
        let recogniser = f.manager.recogniser();
        assert!(!recogniser.is_registered(CONTACT, TRANSPORT, 0));
        assert!(recogniser.is_registered(CONTACT, TRANSPORT, 1));
        assert!(recogniser.is_registered(CONTACT, TRANSPORT, 2));
    }

    #[test]
    fn test_fast_forward_after_downtime() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(false)).unwrap();

        f.clock.set(EPOCH + 10 * R + 1);
        f.manager.tick().unwrap();
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![9, 10]);
        assert_eq!(f.store.periods(CONTACT, TRANSPORT), vec![9, 10]);

        // Same result as stepping through every period
        let crypto = DefaultCrypto;
        let mut expected = initial(false);
        for _ in 0..10 {
            expected = expected.successor(&crypto).unwrap();
        }
        let stored = f.store.get_secrets().unwrap();
        let ten = stored.iter().find(|s| s.period() == 10).unwrap();
        assert_eq!(ten.secret(), expected.secret());
    }

    #[test]
    fn test_late_initial_secret_is_rotated_before_storing() {
        let f = fixture(EPOCH + 5 * R);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![4, 5]);
        assert_eq!(f.store.periods(CONTACT, TRANSPORT), vec![4, 5]);
    }

    #[test]
    fn test_restart_reloads_from_store() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();
        f.manager.stop();
        assert!(!f.manager.is_running());
        assert_eq!(f.manager.recogniser().tag_count(), 0);

        f.clock.set(EPOCH + 3 * R);
        f.manager.start().unwrap();
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![2, 3]);
        assert_eq!(f.store.periods(CONTACT, TRANSPORT), vec![2, 3]);
        assert!(f.manager.recogniser().is_registered(CONTACT, TRANSPORT, 3));
    }

    #[test]
    fn test_clock_backwards_is_fatal() {
        let f = fixture(EPOCH + 3 * R);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();

        f.clock.set(EPOCH + R);
        let err = f.manager.tick().unwrap_err();
        assert!(matches!(err, KeyManagerError::ClockMovedBackwards { .. }));
        assert!(err.is_fatal());
        assert!(!f.manager.is_running());
        assert!(f.manager.held_periods(CONTACT, TRANSPORT).is_empty());

        f.clock.set(EPOCH - 1);
        assert!(matches!(
            f.manager.start(),
            Err(KeyManagerError::ClockMovedBackwards { .. })
        ));
        assert!(!f.manager.is_running());
    }

    #[test]
    fn test_connection_contexts() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        assert!(
            f.manager
                .get_connection_context(CONTACT, TRANSPORT)
                .unwrap()
                .is_none()
        );
        f.manager.add_endpoint(initial(true)).unwrap();

        for expected in 0..3 {
            let ctx = f
                .manager
                .get_connection_context(CONTACT, TRANSPORT)
                .unwrap()
                .unwrap();
            assert_eq!(ctx.connection_number(), expected);
            assert!(ctx.alice());
            assert_eq!(ctx.secret(), initial(true).secret());
        }
    }

    #[test]
    fn test_counter_exhaustion_returns_none() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();
        f.store
            .set_counter(CONTACT, TRANSPORT, 0, MAX_32_BIT_UNSIGNED + 1)
            .unwrap();
        assert!(
            f.manager
                .get_connection_context(CONTACT, TRANSPORT)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_contact_removal() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();
        f.manager.contact_removed(CONTACT);
        assert!(f.manager.held_periods(CONTACT, TRANSPORT).is_empty());
        assert!(!f.manager.recogniser().is_registered(CONTACT, TRANSPORT, 0));

        f.manager.add_endpoint(initial(true)).unwrap();
        f.store.remove_contact(CONTACT);
        f.manager.sync_contacts().unwrap();
        assert!(f.manager.held_periods(CONTACT, TRANSPORT).is_empty());
        assert_eq!(f.manager.recogniser().tag_count(), 0);
    }

    /// A store whose next few `add_secrets` calls fail.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryStore,
        failures: AtomicUsize,
    }

    impl FlakyStore {
        fn fail_adds(&self, times: usize) {
            self.failures.store(times, Ordering::SeqCst);
        }
    }

    impl TransportStore for FlakyStore {
        fn get_secrets(&self) -> Result<Vec<TemporarySecret>, StoreError> {
            self.inner.get_secrets()
        }

        fn add_secrets(&self, secrets: &[TemporarySecret]) -> Result<(), StoreError> {
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(StoreError::Backend("disk full".into()));
            }
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

    fn flaky_manager(now: u64) -> (KeyManager, Arc<FlakyStore>, ManualClock) {
        let store = Arc::new(FlakyStore::default());
        store.inner.add_contact(CONTACT);
        let crypto = DefaultCrypto::shared();
        let recogniser = Arc::new(ConnectionRecogniser::new(crypto.clone(), store.clone()));
        let clock = ManualClock::new(now);
        let manager = KeyManager::new(
            crypto,
            store.clone(),
            recogniser,
            Arc::new(clock.clone()),
            KeyManagerConfig::default(),
        );
        (manager, store, clock)
    }

    #[test]
    fn test_failed_store_write_retried_next_pass() {
        let (manager, store, clock) = flaky_manager(EPOCH);
        manager.start().unwrap();
        manager.add_endpoint(initial(true)).unwrap();

        clock.set(EPOCH + 2 * R);
        store.fail_adds(1);
        assert!(matches!(manager.tick(), Err(KeyManagerError::Store(_))));
        let recogniser = manager.recogniser();
        assert!(!recogniser.is_registered(CONTACT, TRANSPORT, 0));
        assert_eq!(store.inner.periods(CONTACT, TRANSPORT), vec![0]);

        clock.set(EPOCH + 2 * R + 10);
        manager.tick().unwrap();
        assert_eq!(manager.held_periods(CONTACT, TRANSPORT), vec![1, 2]);
        assert_eq!(store.inner.periods(CONTACT, TRANSPORT), vec![1, 2]);
        assert!(!recogniser.is_registered(CONTACT, TRANSPORT, 0));
        assert!(recogniser.is_registered(CONTACT, TRANSPORT, 1));
        assert!(recogniser.is_registered(CONTACT, TRANSPORT, 2));
    }

    #[test]
    fn test_start_rolls_back_on_store_failure() {
        let (manager, store, clock) = flaky_manager(EPOCH);
        store.inner.add_secrets(&[initial(true)]).unwrap();
        clock.set(EPOCH + 3 * R);

        store.fail_adds(1);
        assert!(matches!(manager.start(), Err(KeyManagerError::Store(_))));
        assert!(!manager.is_running());
        assert!(manager.held_periods(CONTACT, TRANSPORT).is_empty());
        assert_eq!(manager.recogniser().tag_count(), 0);

        manager.start().unwrap();
        assert_eq!(manager.held_periods(CONTACT, TRANSPORT), vec![2, 3]);
        assert_eq!(store.inner.periods(CONTACT, TRANSPORT), vec![2, 3]);
    }

    #[test]
    fn test_context_after_missed_passes_uses_current_secret() {
        let f = fixture(EPOCH);
        f.manager.start().unwrap();
        f.manager.add_endpoint(initial(true)).unwrap();

        f.clock.set(EPOCH + 5 * R + D + 1);
        assert_eq!(f.manager.outgoing_period(CONTACT, TRANSPORT), None);
        let ctx = f
            .manager
            .get_connection_context(CONTACT, TRANSPORT)
            .unwrap()
            .unwrap();

        let crypto = DefaultCrypto;
        let mut expected = initial(true);
        for _ in 0..5 {
            expected = expected.successor(&crypto).unwrap();
        }
        assert_eq!(ctx.secret(), expected.secret());
        assert_eq!(ctx.connection_number(), 0);
        assert_eq!(f.manager.held_periods(CONTACT, TRANSPORT), vec![4, 5]);
        assert_eq!(f.manager.outgoing_period(CONTACT, TRANSPORT), Some(5));
    }
}
