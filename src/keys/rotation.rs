//! Tokio driver for periodic key rotation.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, warn};

use crate::core::KeyManagerError;

use super::manager::KeyManager;

/// Handle to a running rotation task.
pub struct RotationTask {
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl RotationTask {
    /// Whether the task has ended, by shutdown or on a fatal error.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to end. The key manager keeps running.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = (&mut self.handle).await;
    }
}

/// Spawn a task calling [`KeyManager::tick`] every check interval.
///
/// Missed ticks are skipped rather than replayed; each pass works from the
/// current time anyway. Passes run on the blocking thread pool, since the
/// store may do blocking I/O. The task ends when the manager is stopped or a
/// rotation pass fails fatally.
pub fn spawn_rotation_task(manager: Arc<KeyManager>) -> RotationTask {
    let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
    let period = manager.config().check_interval;

    let handle = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    debug!("rotation task shut down");
                    break;
                }
                _ = ticker.tick() => {}
            }
            // Store calls may block
            let pass = manager.clone();
            let result = match tokio::task::spawn_blocking(move || pass.tick()).await {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "rotation pass panicked, ending rotation task");
                    break;
                }
            };
            match result {
                Ok(()) => {}
                Err(KeyManagerError::NotRunning) => {
                    debug!("key manager stopped, ending rotation task");
                    break;
                }
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "rotation task ending");
                    break;
                }
                Err(e) => warn!(error = %e, "rotation pass failed, retrying next tick"),
            }
        }
    });

    RotationTask {
        shutdown_tx: Some(shutdown_tx),
        handle,
    }
}
