//! Host-local network and endpoint repository.
//!
//! [`HostRepository`] implements both [`LocalNetworkRepository`] and
//! [`LocalEndpointRepository`] on top of a raw [`HostNetworkingApi`]:
//!
//! - network identity lives in the host network name ([`NamingScheme`]),
//!   so the driver keeps no local database;
//! - network creation is retried while the stack reports the recoverable
//!   error class ([`classify_host_error`]) or the adapter fails to come back;
//! - after a network change the adapter is polled until it has a usable
//!   IPv4 address again.

pub mod adapter;
pub mod api;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use overlay_cnm_core::config::{DriverConfig, HostConfig};
use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::metrics as m;
use overlay_cnm_core::model::{
    LocalEndpoint, LocalEndpointSpec, LocalNetwork, LocalNetworkSpec, MacAddress, Subnet,
};
use overlay_cnm_core::naming::{NamingScheme, NetworkIdentity};
use overlay_cnm_core::polling::{PollingPolicy, retry_while};
use overlay_cnm_core::ports::{LocalEndpointRepository, LocalNetworkRepository};

pub use adapter::{has_usable_ipv4, wait_for_adapter};
pub use api::{
    HostApiError, HostEndpoint, HostEndpointConfig, HostErrorClass, HostNetwork,
    HostNetworkConfig, HostNetworkingApi, InterfaceInspector, classify_host_error,
};

/// Why one network creation attempt failed.
#[derive(Debug)]
enum CreateFailure {
    Host(HostApiError),
    /// The network was created but the adapter never came back; the
    /// network has been removed again.
    AdapterLost(DriverError),
}

impl CreateFailure {
    fn is_recoverable(&self) -> bool {
        match self {
            Self::Host(e) => classify_host_error(e) == HostErrorClass::Recoverable,
            Self::AdapterLost(_) => true,
        }
    }

    fn into_driver_error(self) -> DriverError {
        match self {
            Self::Host(e) if classify_host_error(&e) == HostErrorClass::Recoverable => {
                DriverError::Transient(format!("host network creation kept failing: {e}"))
            }
            Self::Host(e) => DriverError::HostNetworking(e.to_string()),
            Self::AdapterLost(e) => e,
        }
    }
}

fn host_error(e: HostApiError) -> DriverError {
    DriverError::HostNetworking(e.to_string())
}

/// Driver-owned view of the host networking stack.
pub struct HostRepository<H: HostNetworkingApi, I: InterfaceInspector> {
    api: Arc<H>,
    inspector: Arc<I>,
    naming: NamingScheme,
    adapter: String,
    create_policy: PollingPolicy,
    adapter_policy: PollingPolicy,
}

impl<H: HostNetworkingApi, I: InterfaceInspector> HostRepository<H, I> {
    /// Creates a repository with the default retry budgets.
    pub fn new(api: Arc<H>, inspector: Arc<I>, naming: NamingScheme, adapter: impl Into<String>) -> Self {
        let host = HostConfig::default();
        Self {
            api,
            inspector,
            naming,
            adapter: adapter.into(),
            create_policy: create_policy(&host),
            adapter_policy: adapter_policy(&host),
        }
    }

    /// Creates a repository from the `[driver]` and `[host]` sections.
    pub fn from_config(api: Arc<H>, inspector: Arc<I>, driver: &DriverConfig, host: &HostConfig) -> Self {
        Self {
            api,
            inspector,
            naming: NamingScheme::new(driver.network_prefix.clone()),
            adapter: driver.adapter.clone(),
            create_policy: create_policy(host),
            adapter_policy: adapter_policy(host),
        }
    }

    pub fn with_create_policy(mut self, policy: PollingPolicy) -> Self {
        self.create_policy = policy;
        self
    }

    pub fn with_adapter_policy(mut self, policy: PollingPolicy) -> Self {
        self.adapter_policy = policy;
        self
    }

    async fn owned_networks(&self) -> Result<Vec<(HostNetwork, NetworkIdentity)>, DriverError> {
        let networks = self.api.list_networks().await.map_err(host_error)?;
        Ok(networks
            .into_iter()
            .filter_map(|network| {
                let identity = self.naming.split_name(&network.name)?;
                Some((network, identity))
            })
            .collect())
    }

    async fn find_network(
        &self,
        runtime_network_id: &str,
    ) -> Result<(HostNetwork, NetworkIdentity), DriverError> {
        self.owned_networks()
            .await?
            .into_iter()
            .find(|(_, identity)| identity.runtime_network_id == runtime_network_id)
            .ok_or_else(|| {
                DriverError::NotFound(format!("network {runtime_network_id} not found"))
            })
    }

    async fn find_endpoint(&self, name: &str) -> Result<HostEndpoint, DriverError> {
        self.api
            .list_endpoints()
            .await
            .map_err(host_error)?
            .into_iter()
            .find(|endpoint| endpoint.name == name)
            .ok_or_else(|| DriverError::NotFound(format!("endpoint {name} not found")))
    }

    async fn try_create_network(
        &self,
        config: &HostNetworkConfig,
        attempt: u32,
    ) -> Result<HostNetwork, CreateFailure> {
        if attempt > 1 {
            metrics::counter!(m::HOST_CREATE_RETRIES_TOTAL).increment(1);
            info!(name = %config.name, attempt, "retrying host network creation");
        }

        let network = self
            .api
            .create_network(config)
            .await
            .map_err(CreateFailure::Host)?;

        if let Err(wait_err) =
            wait_for_adapter(self.inspector.as_ref(), &self.adapter, &self.adapter_policy).await
        {
            warn!(
                name = %config.name,
                error = %wait_err,
                "adapter did not come back after network creation, removing network"
            );
            if let Err(e) = self.api.delete_network(&network.id).await {
                warn!(id = %network.id, error = %e, "failed to remove network after adapter loss");
            }
            return Err(CreateFailure::AdapterLost(wait_err));
        }
        Ok(network)
    }

    fn to_local_network(
        network: &HostNetwork,
        identity: NetworkIdentity,
    ) -> Result<LocalNetwork, DriverError> {
        let cidr = identity.subnet_cidr.parse().map_err(|e| {
            DriverError::HostNetworking(format!("network {}: {e}", network.name))
        })?;
        let dns_servers = network
            .dns_servers
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| s.parse::<Ipv4Addr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                DriverError::HostNetworking(format!("network {}: bad dns list: {e}", network.name))
            })?;

        Ok(LocalNetwork {
            local_id: network.id.clone(),
            runtime_network_id: identity.runtime_network_id,
            tenant: identity.tenant,
            name: identity.network,
            subnet: Subnet {
                cidr,
                default_gateway: network.gateway,
                dns_servers,
            },
        })
    }

    fn to_local_endpoint(endpoint: HostEndpoint) -> Result<LocalEndpoint, DriverError> {
        let mac: MacAddress = endpoint.mac.parse().map_err(|e| {
            DriverError::HostNetworking(format!("endpoint {}: {e}", endpoint.name))
        })?;
        Ok(LocalEndpoint {
            local_id: endpoint.id,
            name: endpoint.name,
            network_local_id: endpoint.network_id,
            ip: endpoint.ip,
            gateway: endpoint.gateway,
            mac,
        })
    }
}

fn create_policy(host: &HostConfig) -> PollingPolicy {
    PollingPolicy::timeout(
        Duration::from_millis(host.create_retry_timeout_ms),
        Duration::from_millis(host.create_retry_initial_delay_ms),
    )
    .with_multiplier(host.create_retry_multiplier)
}

fn adapter_policy(host: &HostConfig) -> PollingPolicy {
    PollingPolicy::timeout(
        Duration::from_millis(host.adapter_wait_timeout_ms),
        Duration::from_millis(host.adapter_wait_interval_ms),
    )
}

impl<H: HostNetworkingApi, I: InterfaceInspector> LocalNetworkRepository for HostRepository<H, I> {
    async fn create_network(&self, spec: &LocalNetworkSpec) -> Result<LocalNetwork, DriverError> {
        let cidr = spec.subnet.cidr.to_string();
        let duplicate = self.owned_networks().await?.into_iter().find(|(_, id)| {
            id.tenant == spec.tenant && id.network == spec.name && id.subnet_cidr == cidr
        });
        if let Some((network, _)) = duplicate {
            return Err(DriverError::Conflict(format!(
                "host network {} already exists",
                network.name
            )));
        }

        let identity = NetworkIdentity::new(
            spec.runtime_network_id.as_str(),
            spec.tenant.as_str(),
            spec.name.as_str(),
            cidr,
        );
        let config = HostNetworkConfig {
            name: self.naming.generate_name(&identity),
            adapter: self.adapter.clone(),
            subnet_cidr: identity.subnet_cidr.clone(),
            gateway: spec.subnet.default_gateway,
            dns_servers: spec
                .subnet
                .dns_servers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        };

        let network = retry_while(
            &self.create_policy,
            |attempt| self.try_create_network(&config, attempt),
            CreateFailure::is_recoverable,
        )
        .await
        .map_err(CreateFailure::into_driver_error)?;

        info!(id = %network.id, name = %network.name, "host network created");
        Self::to_local_network(&network, identity)
    }

    async fn network(&self, runtime_network_id: &str) -> Result<LocalNetwork, DriverError> {
        let (network, identity) = self.find_network(runtime_network_id).await?;
        Self::to_local_network(&network, identity)
    }

    async fn delete_network(&self, runtime_network_id: &str) -> Result<(), DriverError> {
        let (network, _) = self.find_network(runtime_network_id).await?;
        self.api
            .delete_network(&network.id)
            .await
            .map_err(host_error)?;
        info!(id = %network.id, name = %network.name, "host network deleted");

        let adapter_shared = match self.owned_networks().await {
            Ok(others) => others.iter().any(|(other, _)| other.adapter == network.adapter),
            Err(e) => {
                warn!(
                    adapter = %network.adapter,
                    error = %e,
                    "cannot list networks after deletion, skipping adapter wait"
                );
                true
            }
        };
        if !adapter_shared {
            // The network itself is gone; a slow adapter is not a delete failure.
            if let Err(e) =
                wait_for_adapter(self.inspector.as_ref(), &network.adapter, &self.adapter_policy).await
            {
                warn!(adapter = %network.adapter, error = %e, "adapter did not come back after network deletion");
            }
        }
        Ok(())
    }

    async fn list_networks(&self) -> Result<Vec<LocalNetwork>, DriverError> {
        let mut result = Vec::new();
        for (network, identity) in self.owned_networks().await? {
            match Self::to_local_network(&network, identity) {
                Ok(local) => result.push(local),
                Err(e) => warn!(name = %network.name, error = %e, "skipping unreadable host network"),
            }
        }
        Ok(result)
    }
}

impl<H: HostNetworkingApi, I: InterfaceInspector> LocalEndpointRepository for HostRepository<H, I> {
    async fn create_endpoint(&self, spec: &LocalEndpointSpec) -> Result<LocalEndpoint, DriverError> {
        if self.find_endpoint(&spec.name).await.is_ok() {
            return Err(DriverError::Conflict(format!(
                "endpoint {} already exists",
                spec.name
            )));
        }

        let config = HostEndpointConfig {
            name: spec.name.clone(),
            network_id: spec.network_local_id.clone(),
            ip: spec.ip,
            gateway: spec.gateway,
            mac: spec.mac.to_host_format(),
        };
        let endpoint = self
            .api
            .create_endpoint(&config)
            .await
            .map_err(host_error)?;
        debug!(id = %endpoint.id, name = %endpoint.name, mac = %endpoint.mac, "host endpoint created");
        Self::to_local_endpoint(endpoint)
    }

    async fn endpoint(&self, name: &str) -> Result<LocalEndpoint, DriverError> {
        Self::to_local_endpoint(self.find_endpoint(name).await?)
    }

    async fn delete_endpoint(&self, name: &str) -> Result<(), DriverError> {
        let endpoint = self.find_endpoint(name).await?;
        self.api
            .delete_endpoint(&endpoint.id)
            .await
            .map_err(host_error)?;
        debug!(id = %endpoint.id, name, "host endpoint deleted");
        Ok(())
    }

    async fn list_endpoints(&self) -> Result<Vec<LocalEndpoint>, DriverError> {
        let owned: HashSet<String> = self
            .owned_networks()
            .await?
            .into_iter()
            .map(|(network, _)| network.id)
            .collect();
        self.api
            .list_endpoints()
            .await
            .map_err(host_error)?
            .into_iter()
            .filter(|endpoint| owned.contains(&endpoint.network_id))
            .map(Self::to_local_endpoint)
            .collect()
    }
}
