//! In-memory host networking stack.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::Mutex;

use crate::host::api::{
    HostApiError, HostEndpoint, HostEndpointConfig, HostNetwork, HostNetworkConfig,
    HostNetworkingApi, InterfaceInspector,
};

/// Address an adapter falls back to while it is being rebound.
const AUTOCONF_ADDRESS: Ipv4Addr = Ipv4Addr::new(169, 254, 0, 1);

#[derive(Debug, Default)]
struct HostState {
    networks: Vec<HostNetwork>,
    endpoints: Vec<HostEndpoint>,
    interfaces: HashMap<String, Vec<Ipv4Addr>>,
    /// Remaining lookups for which an adapter reports only an autoconf address.
    rebinding: HashMap<String, u32>,
    pending_create_failures: u32,
    fail_listing_after_delete: bool,
    listing_broken: bool,
}

/// Host networking stack kept in memory.
///
/// Creating or deleting a network makes its adapter report an autoconf
/// address for `rebind_lookups` lookups, like a real adapter being moved onto
/// a virtual switch.
#[derive(Debug)]
pub struct SimulatedHost {
    state: Mutex<HostState>,
    rebind_lookups: u32,
    create_failure_message: String,
    create_calls: AtomicU32,
    address_lookups: AtomicU32,
}

impl Default for SimulatedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState::default()),
            rebind_lookups: 0,
            create_failure_message: "HNS failed with error : Unspecified error".to_owned(),
            create_calls: AtomicU32::new(0),
            address_lookups: AtomicU32::new(0),
        }
    }

    /// Adds an interface with the given IPv4 addresses.
    pub fn with_interface(mut self, name: &str, addresses: Vec<Ipv4Addr>) -> Self {
        self.state
            .get_mut()
            .interfaces
            .insert(name.to_owned(), addresses);
        self
    }

    /// Makes adapters report an autoconf address for `lookups` lookups after
    /// every network change.
    pub fn with_rebind_lookups(mut self, lookups: u32) -> Self {
        self.rebind_lookups = lookups;
        self
    }

    /// Makes the next `count` network creations fail with `message`.
    pub fn with_create_failures(mut self, count: u32, message: &str) -> Self {
        self.create_failure_message = message.to_owned();
        self.state.get_mut().pending_create_failures = count;
        self
    }

    /// Number of `create_network` calls, failed ones included.
    pub fn create_calls(&self) -> u32 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Makes every network listing fail once a network has been deleted.
    pub fn with_listing_failure_after_delete(mut self) -> Self {
        self.state.get_mut().fail_listing_after_delete = true;
        self
    }

    pub async fn network_count(&self) -> usize {
        self.state.lock().await.networks.len()
    }

    pub async fn endpoint_count(&self) -> usize {
        self.state.lock().await.endpoints.len()
    }

    /// Number of interface address lookups.
    pub fn address_lookups(&self) -> u32 {
        self.address_lookups.load(Ordering::SeqCst)
    }
}

impl HostNetworkingApi for SimulatedHost {
    async fn create_network(&self, config: &HostNetworkConfig) -> Result<HostNetwork, HostApiError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if state.pending_create_failures > 0 {
            state.pending_create_failures -= 1;
            return Err(HostApiError::new(self.create_failure_message.clone()));
        }
        if !state.interfaces.contains_key(&config.adapter) {
            return Err(HostApiError::new(format!(
                "HNS failed with error : adapter {} not found",
                config.adapter
            )));
        }

        let network = HostNetwork {
            id: uuid::Uuid::new_v4().to_string(),
            name: config.name.clone(),
            adapter: config.adapter.clone(),
            subnet_cidr: config.subnet_cidr.clone(),
            gateway: config.gateway,
            dns_servers: config.dns_servers.clone(),
        };
        state.networks.push(network.clone());
        if self.rebind_lookups > 0 {
            state
                .rebinding
                .insert(config.adapter.clone(), self.rebind_lookups);
        }
        Ok(network)
    }

    async fn delete_network(&self, id: &str) -> Result<(), HostApiError> {
        let mut state = self.state.lock().await;
        let index = state
            .networks
            .iter()
            .position(|n| n.id == id)
            .ok_or_else(|| HostApiError::new(format!("network {id} not found")))?;
        if state.endpoints.iter().any(|e| e.network_id == id) {
            return Err(HostApiError::new(format!(
                "network {id} still has endpoints attached"
            )));
        }
        let network = state.networks.remove(index);
        state.listing_broken = state.fail_listing_after_delete;
        if self.rebind_lookups > 0 {
            state.rebinding.insert(network.adapter, self.rebind_lookups);
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<HostNetwork>, HostApiError> {
        let state = self.state.lock().await;
        if state.listing_broken {
            return Err(HostApiError::new("HNS failed with error : listing unavailable"));
        }
        Ok(state.networks.clone())
    }

    async fn create_endpoint(
        &self,
        config: &HostEndpointConfig,
    ) -> Result<HostEndpoint, HostApiError> {
        let mut state = self.state.lock().await;
        if !state.networks.iter().any(|n| n.id == config.network_id) {
            return Err(HostApiError::new(format!(
                "network {} not found",
                config.network_id
            )));
        }
        let endpoint = HostEndpoint {
            id: uuid::Uuid::new_v4().to_string(),
            name: config.name.clone(),
            network_id: config.network_id.clone(),
            ip: config.ip,
            gateway: config.gateway,
            mac: config.mac.clone(),
        };
        state.endpoints.push(endpoint.clone());
        Ok(endpoint)
    }

    async fn delete_endpoint(&self, id: &str) -> Result<(), HostApiError> {
        let mut state = self.state.lock().await;
        let before = state.endpoints.len();
        state.endpoints.retain(|e| e.id != id);
        if state.endpoints.len() == before {
            return Err(HostApiError::new(format!("endpoint {id} not found")));
        }
        Ok(())
    }

    async fn list_endpoints(&self) -> Result<Vec<HostEndpoint>, HostApiError> {
        Ok(self.state.lock().await.endpoints.clone())
    }
}

impl InterfaceInspector for SimulatedHost {
    async fn ipv4_addresses(&self, interface: &str) -> Result<Option<Vec<Ipv4Addr>>, HostApiError> {
        self.address_lookups.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().await;
        if let Some(remaining) = state.rebinding.get_mut(interface) {
            if *remaining > 0 {
                *remaining -= 1;
                return Ok(Some(vec![AUTOCONF_ADDRESS]));
            }
        }
        Ok(state.interfaces.get(interface).cloned())
    }
}
