//! In-memory forwarding extension.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::ports::ForwardingExtension;

/// Forwarding extension with two flags.
///
/// The reverting variant ignores requested changes and instead lands on a
/// fixed `(enabled, running)` pair, modelling an extension that silently
/// undoes what it was asked to do.
#[derive(Debug)]
pub struct SimulatedExtension {
    enabled: AtomicBool,
    running: AtomicBool,
    after_change: Option<(bool, bool)>,
    enable_calls: AtomicU32,
}

impl SimulatedExtension {
    pub fn new(enabled: bool, running: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            running: AtomicBool::new(running),
            after_change: None,
            enable_calls: AtomicU32::new(0),
        }
    }

    /// Every enable leaves the flags at `(enabled, running)`.
    pub fn reverting(mut self, enabled_after: bool, running_after: bool) -> Self {
        self.after_change = Some((enabled_after, running_after));
        self
    }

    pub fn enable_calls(&self) -> u32 {
        self.enable_calls.load(Ordering::SeqCst)
    }

    fn change(&self, enabled: bool) {
        let (enabled, running) = self
            .after_change
            .unwrap_or((enabled, self.running.load(Ordering::SeqCst)));
        self.enabled.store(enabled, Ordering::SeqCst);
        self.running.store(running, Ordering::SeqCst);
    }
}

impl ForwardingExtension for SimulatedExtension {
    async fn is_enabled(&self, _vswitch: &str) -> Result<bool, DriverError> {
        Ok(self.enabled.load(Ordering::SeqCst))
    }

    async fn is_running(&self, _vswitch: &str) -> Result<bool, DriverError> {
        Ok(self.running.load(Ordering::SeqCst))
    }

    async fn enable(&self, _vswitch: &str) -> Result<(), DriverError> {
        self.enable_calls.fetch_add(1, Ordering::SeqCst);
        self.change(true);
        Ok(())
    }
}
