//! Port table that records agent notifications.

use std::time::Duration;

use tokio::sync::{Mutex, Notify};

use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::model::PortBinding;
use overlay_cnm_core::ports::PortAssociation;

#[derive(Debug, Default)]
struct Recorded {
    added: Vec<PortBinding>,
    deleted: Vec<String>,
}

/// [`PortAssociation`] that keeps every call in memory.
///
/// Notifications are dispatched on detached tasks, so tests wait for them
/// with [`wait_for_calls`](Self::wait_for_calls).
#[derive(Debug, Default)]
pub struct RecordingPorts {
    recorded: Mutex<Recorded>,
    notify: Notify,
    fail: bool,
}

impl RecordingPorts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call is recorded and then fails.
    pub fn with_failures(mut self) -> Self {
        self.fail = true;
        self
    }

    pub async fn added(&self) -> Vec<PortBinding> {
        self.recorded.lock().await.added.clone()
    }

    pub async fn deleted(&self) -> Vec<String> {
        self.recorded.lock().await.deleted.clone()
    }

    /// Waits until at least `count` calls (adds plus deletes) were recorded.
    /// Returns `false` on timeout.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, async {
            loop {
                let notified = self.notify.notified();
                {
                    let recorded = self.recorded.lock().await;
                    if recorded.added.len() + recorded.deleted.len() >= count {
                        return;
                    }
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }

    fn outcome(&self) -> Result<(), DriverError> {
        if self.fail {
            Err(DriverError::PortAssociation(
                "Send request failed with status code = 500".to_owned(),
            ))
        } else {
            Ok(())
        }
    }
}

impl PortAssociation for RecordingPorts {
    async fn add_port(&self, port: &PortBinding) -> Result<(), DriverError> {
        self.recorded.lock().await.added.push(port.clone());
        self.notify.notify_waiters();
        self.outcome()
    }

    async fn delete_port(&self, vif_uuid: &str) -> Result<(), DriverError> {
        self.recorded.lock().await.deleted.push(vif_uuid.to_owned());
        self.notify.notify_waiters();
        self.outcome()
    }
}
