//! Temporary secrets and the endpoints they belong to.

use std::fmt;

use crate::core::{ContactId, CryptoError, TransportId};
use crate::crypto::{CryptoProvider, SecretKey};

/// A contact reached over one transport.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    /// Contact.
    pub contact_id: ContactId,
    /// Transport.
    pub transport_id: TransportId,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(contact_id: ContactId, transport_id: TransportId) -> Self {
        Self {
            contact_id,
            transport_id,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.contact_id, self.transport_id)
    }
}

/// The secret shared with a contact over one transport during one
/// rotation period.
///
/// Period `p` is created at `epoch + p * rotation_period` and is usable for
/// two rotation periods after that. The secret of period `p + 1` is derived
/// from this one; nothing can be derived in the other direction.
pub struct TemporarySecret {
    endpoint: Endpoint,
    period: u64,
    secret: SecretKey,
    epoch: u64,
    clock_difference: u64,
    latency: u64,
    alice: bool,
}

impl TemporarySecret {
    /// Create a temporary secret. Times are in milliseconds.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        contact_id: ContactId,
        transport_id: TransportId,
        period: u64,
        secret: SecretKey,
        epoch: u64,
        clock_difference: u64,
        latency: u64,
        alice: bool,
    ) -> Self {
        Self {
            endpoint: Endpoint::new(contact_id, transport_id),
            period,
            secret,
            epoch,
            clock_difference,
            latency,
            alice,
        }
    }

    /// Contact and transport.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint
    }

    /// Contact.
    pub fn contact_id(&self) -> ContactId {
        self.endpoint.contact_id
    }

    /// Transport.
    pub fn transport_id(&self) -> TransportId {
        self.endpoint.transport_id
    }

    /// Rotation period this secret belongs to.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// The secret itself.
    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    /// Start of period zero (ms since the UNIX epoch).
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Largest tolerated clock difference between the peers (ms).
    pub fn clock_difference(&self) -> u64 {
        self.clock_difference
    }

    /// Largest expected transport latency (ms).
    pub fn latency(&self) -> u64 {
        self.latency
    }

    /// Whether we play Alice for this contact.
    pub fn alice(&self) -> bool {
        self.alice
    }

    /// Length of one rotation period (ms).
    pub fn rotation_period(&self) -> u64 {
        self.clock_difference
            .saturating_mul(2)
            .saturating_add(self.latency)
    }

    /// Time this secret's period starts (ms).
    pub fn creation_time(&self) -> u64 {
        creation_time(self.epoch, self.rotation_period(), self.period)
    }

    /// Explicit copy, secret included.
    pub fn duplicate(&self) -> Self {
        Self {
            endpoint: self.endpoint,
            period: self.period,
            secret: self.secret.duplicate(),
            epoch: self.epoch,
            clock_difference: self.clock_difference,
            latency: self.latency,
            alice: self.alice,
        }
    }

    /// Derive the secret of the next period.
    pub fn successor(&self, crypto: &dyn CryptoProvider) -> Result<Self, CryptoError> {
        let period = self.period + 1;
        Ok(Self {
            endpoint: self.endpoint,
            period,
            secret: crypto.derive_next_secret(&self.secret, period)?,
            epoch: self.epoch,
            clock_difference: self.clock_difference,
            latency: self.latency,
            alice: self.alice,
        })
    }

    /// Overwrite the secret with zeros.
    pub fn erase(&mut self) {
        self.secret.erase();
    }
}

impl fmt::Debug for TemporarySecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporarySecret")
            .field("endpoint", &self.endpoint)
            .field("period", &self.period)
            .field("epoch", &self.epoch)
            .field("clock_difference", &self.clock_difference)
            .field("latency", &self.latency)
            .field("alice", &self.alice)
            .finish_non_exhaustive()
    }
}

pub(crate) fn creation_time(epoch: u64, rotation_period: u64, period: u64) -> u64 {
    epoch.saturating_add(rotation_period.saturating_mul(period))
}
