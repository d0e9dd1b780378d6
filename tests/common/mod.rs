//! Two peers sharing an initial secret, each with its own store, key
//! manager, recogniser and clock.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::sync::Arc;

use tagwire::core::{ContactId, TAG_LENGTH, Tag, TransportId};
use tagwire::crypto::{DefaultCrypto, SecretKey};
use tagwire::keys::{
    ConnectionRecogniser, KeyManager, KeyManagerConfig, ManualClock, TemporarySecret,
};
use tagwire::store::MemoryStore;
use tagwire::transport::{
    ConnectionConfig, ConnectionFactory, MemoryReader, MemoryWriter, TransportError,
};

pub const TRANSPORT: TransportId = TransportId(42);
pub const EPOCH: u64 = 1_700_000_000_000;
pub const CLOCK_DIFFERENCE: u64 = 60_000;
pub const LATENCY: u64 = 30_000;
pub const ROTATION: u64 = 2 * CLOCK_DIFFERENCE + LATENCY;
pub const SHARED_SECRET: [u8; 32] = [0xA5; 32];

pub struct Peer {
    /// How this peer knows the other.
    pub contact: ContactId,
    pub alice: bool,
    pub store: Arc<MemoryStore>,
    pub manager: Arc<KeyManager>,
    pub clock: ManualClock,
    pub factory: Arc<ConnectionFactory>,
}

impl Peer {
    pub fn new(contact: ContactId, alice: bool, now: u64, config: ConnectionConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        store.add_contact(contact);
        let crypto = DefaultCrypto::shared();
        let recogniser = Arc::new(ConnectionRecogniser::new(crypto.clone(), store.clone()));
        let clock = ManualClock::new(now);
        let manager = Arc::new(KeyManager::new(
            crypto.clone(),
            store.clone(),
            recogniser,
            Arc::new(clock.clone()),
            KeyManagerConfig::default(),
        ));
        manager.start().unwrap();
        manager
            .add_endpoint(TemporarySecret::new(
                contact,
                TRANSPORT,
                0,
                SecretKey::from_bytes(SHARED_SECRET),
                EPOCH,
                CLOCK_DIFFERENCE,
                LATENCY,
                alice,
            ))
            .unwrap();
        let factory = Arc::new(ConnectionFactory::new(crypto, config).unwrap());
        Self {
            contact,
            alice,
            store,
            manager,
            clock,
            factory,
        }
    }

    pub fn recogniser(&self) -> &Arc<ConnectionRecogniser> {
        self.manager.recogniser()
    }

    /// Open a stream connection and write `payload`; returns the wire bytes.
    pub fn send(&self, payload: &[u8]) -> Vec<u8> {
        let ctx = self
            .manager
            .get_connection_context(self.contact, TRANSPORT)
            .unwrap()
            .expect("outgoing secret");
        let raw = MemoryWriter::new();
        let mut writer = self.factory.create_writer(ctx, raw.clone(), true).unwrap();
        writer.write_all(payload).unwrap();
        writer.close().unwrap();
        raw.contents()
    }

    /// Recognise the tag of an incoming stream and read its payload.
    pub fn receive(&self, wire: &[u8]) -> Result<Vec<u8>, ReceiveError> {
        let tag = Tag::from_slice(wire).ok_or(ReceiveError::Unrecognised)?;
        let ctx = self
            .recogniser()
            .accept_connection(&tag)
            .ok_or(ReceiveError::Unrecognised)?;
        let mut reader = self
            .factory
            .create_reader(ctx, MemoryReader::new(wire[TAG_LENGTH..].to_vec()), false)
            .map_err(ReceiveError::Transport)?;
        let mut out = Vec::new();
        match reader.read_to_end(&mut out) {
            Ok(_) => Ok(out),
            Err(e) => Err(ReceiveError::Io(e)),
        }
    }
}

#[derive(Debug)]
pub enum ReceiveError {
    Unrecognised,
    Transport(TransportError),
    Io(std::io::Error),
}

impl ReceiveError {
    pub fn transport_error(&self) -> Option<&TransportError> {
        match self {
            ReceiveError::Transport(e) => Some(e),
            ReceiveError::Io(e) => TransportError::from_io(e),
            ReceiveError::Unrecognised => None,
        }
    }
}

/// Alice knows Bob as contact 1, Bob knows Alice as contact 2.
pub fn pair(now: u64, config: ConnectionConfig) -> (Peer, Peer) {
    let alice = Peer::new(ContactId(1), true, now, config.clone());
    let bob = Peer::new(ContactId(2), false, now, config);
    (alice, bob)
}

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
