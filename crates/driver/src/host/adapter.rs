//! Waiting for the physical adapter to come back after a switch change.
//!
//! Creating or removing a host network rebinds the adapter to a virtual
//! switch; for a while it has no address or only an autoconfiguration
//! (169.254.0.0/16) one.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info};

use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::metrics as m;
use overlay_cnm_core::polling::{PollingPolicy, wait_until};

use super::api::InterfaceInspector;

/// Whether any address is routable (not link-local, not unspecified).
pub fn has_usable_ipv4(addresses: &[Ipv4Addr]) -> bool {
    addresses
        .iter()
        .any(|ip| !ip.is_link_local() && !ip.is_unspecified())
}

/// Polls `adapter` until it holds a usable IPv4 address.
pub async fn wait_for_adapter<I: InterfaceInspector>(
    inspector: &I,
    adapter: &str,
    policy: &PollingPolicy,
) -> Result<Duration, DriverError> {
    let what = format!("adapter {adapter} to reacquire an IPv4 address");
    let result = wait_until(policy, &what, move || async move {
        match inspector.ipv4_addresses(adapter).await {
            Ok(Some(addresses)) => has_usable_ipv4(&addresses),
            Ok(None) => {
                debug!(adapter, "adapter not present yet");
                false
            }
            Err(e) => {
                debug!(adapter, error = %e, "adapter address lookup failed");
                false
            }
        }
    })
    .await;

    if let Ok(elapsed) = &result {
        metrics::histogram!(m::ADAPTER_WAIT_SECONDS).record(elapsed.as_secs_f64());
        info!(
            adapter,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            "adapter has an address"
        );
    }
    result
}
