//! Key management.
//!
//! - [`TemporarySecret`]: the secret shared with one contact over one
//!   transport during one rotation period
//! - [`KeyManager`]: rotates secrets forward in time and hands out outgoing
//!   connection contexts
//! - [`ConnectionRecogniser`]: maps the tags of expected incoming
//!   connections to their contexts
//! - [`spawn_rotation_task`]: drives the key manager from tokio (feature
//!   `runtime`)

mod clock;
mod manager;
mod recogniser;
#[cfg(feature = "runtime")]
mod rotation;
mod secret;

pub use clock::{Clock, ManualClock, SystemClock};
pub use manager::{KeyManager, KeyManagerConfig};
pub use recogniser::ConnectionRecogniser;
#[cfg(feature = "runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use rotation::{RotationTask, spawn_rotation_task};
pub use secret::{Endpoint, TemporarySecret};
