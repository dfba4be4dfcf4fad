//! vRouter forwarding extension lifecycle.
//!
//! Runs once at startup, before the protocol server is allowed to serve.
//! A stopped extension is an installation problem and is never retried.

use std::sync::Arc;

use tracing::{debug, info};

use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::ports::ForwardingExtension;

const STOPPED: &str = "Extension is stopped, when it should be running - possible fix involves reinstallation of the vRouter Forwarding Extension";
const DISABLED: &str = "Extension is disabled, when it should be enabled";

/// Ensures the forwarding extension on one virtual switch is enabled and running.
pub struct VRouterManager<X: ForwardingExtension> {
    extension: Arc<X>,
    vswitch: String,
}

impl<X: ForwardingExtension> VRouterManager<X> {
    pub fn new(extension: Arc<X>, vswitch: impl Into<String>) -> Self {
        Self {
            extension,
            vswitch: vswitch.into(),
        }
    }

    pub fn vswitch(&self) -> &str {
        &self.vswitch
    }

    /// Enables the extension if needed and verifies it stays enabled and running.
    ///
    /// # Errors
    ///
    /// [`DriverError::Fatal`] if the extension is stopped, or if it does not
    /// end up enabled and running.
    pub async fn initialize(&self) -> Result<(), DriverError> {
        if !self.extension.is_running(&self.vswitch).await? {
            return Err(DriverError::Fatal(format!(
                "Before trying to initialize vRouter: {STOPPED}"
            )));
        }

        if self.extension.is_enabled(&self.vswitch).await? {
            debug!(vswitch = %self.vswitch, "forwarding extension already enabled");
        } else {
            info!(vswitch = %self.vswitch, "enabling forwarding extension");
            self.extension.enable(&self.vswitch).await?;
        }

        if !self.extension.is_enabled(&self.vswitch).await? {
            return Err(DriverError::Fatal(format!(
                "After trying to initialize vRouter: {DISABLED}"
            )));
        }
        if !self.extension.is_running(&self.vswitch).await? {
            return Err(DriverError::Fatal(format!(
                "After trying to initialize vRouter: {STOPPED}"
            )));
        }

        info!(vswitch = %self.vswitch, "vRouter forwarding extension ready");
        Ok(())
    }
}
