//! Driver core: network and endpoint lifecycle across the controller, the
//! host-local repositories and the dataplane agent.
//!
//! Agent notifications run on detached tasks. The runtime only creates the
//! container (and its kernel interface) after `create_endpoint` returns, so
//! callers must not assume a notification has completed when the enclosing
//! call returns.
//!
//! Operations are not serialized against each other; concurrent calls for
//! the same identity rely on the query-before-create behaviour of the
//! collaborators.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use overlay_cnm_core::error::{ConfigError, DriverError};
use overlay_cnm_core::metrics as m;
use overlay_cnm_core::model::{
    Endpoint, Ipv4Cidr, LocalEndpoint, LocalEndpointSpec, LocalNetworkSpec, PortBinding,
};
use overlay_cnm_core::ports::{
    Controller, LocalEndpointRepository, LocalNetworkRepository, NetworkDriver, PortAssociation,
};

/// Label prefixed to the first segment of a host endpoint id.
pub const INTERFACE_NAME_PREFIX: &str = "Container NIC";

/// Kernel-visible name the forwarding layer uses to match an endpoint's
/// interface.
pub fn friendly_interface_name(local_endpoint_id: &str) -> String {
    let segment = local_endpoint_id
        .split('-')
        .next()
        .unwrap_or(local_endpoint_id);
    format!("{INTERFACE_NAME_PREFIX} {segment}")
}

fn same_subnet(a: &Ipv4Cidr, b: &Ipv4Cidr) -> bool {
    a.prefix_len() == b.prefix_len() && a.network() == b.network()
}

/// Orchestrates the four lifecycle operations.
pub struct DriverCore<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    controller: Arc<C>,
    networks: Arc<N>,
    endpoints: Arc<E>,
    ports: Arc<P>,
    port_notify_delay: Duration,
}

impl<C, N, E, P> DriverCore<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    fn notify_add_port(&self, binding: PortBinding) {
        let ports = Arc::clone(&self.ports);
        let delay = self.port_notify_delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = ports.add_port(&binding).await;
            record_notification("add", result.is_ok());
            match result {
                Ok(()) => debug!(
                    endpoint_id = %binding.container_id,
                    vif_uuid = %binding.vif_uuid,
                    "agent notified about new port"
                ),
                Err(e) => warn!(
                    endpoint_id = %binding.container_id,
                    vif_uuid = %binding.vif_uuid,
                    error = %e,
                    "failed to notify agent about new port"
                ),
            }
        });
    }

    fn notify_delete_port(&self, endpoint_id: &str, vif_uuid: String) {
        let ports = Arc::clone(&self.ports);
        let endpoint_id = endpoint_id.to_owned();
        tokio::spawn(async move {
            let result = ports.delete_port(&vif_uuid).await;
            record_notification("delete", result.is_ok());
            match result {
                Ok(()) => debug!(%endpoint_id, %vif_uuid, "agent notified about removed port"),
                Err(e) => warn!(
                    %endpoint_id,
                    %vif_uuid,
                    error = %e,
                    "failed to notify agent about removed port"
                ),
            }
        });
    }
}

fn record_notification(action: &'static str, ok: bool) {
    let result = if ok { "ok" } else { "error" };
    metrics::counter!(
        m::PORT_NOTIFICATIONS_TOTAL,
        m::LABEL_ACTION => action,
        m::LABEL_RESULT => result
    )
    .increment(1);
}

impl<C, N, E, P> NetworkDriver for DriverCore<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    async fn create_network(
        &self,
        runtime_network_id: &str,
        tenant: &str,
        network: &str,
        subnet: &Ipv4Cidr,
    ) -> Result<(), DriverError> {
        let selector = (!subnet.is_any()).then_some(subnet);
        let remote = self
            .controller
            .network_with_subnet(tenant, network, selector)
            .await?;
        if remote.subnet.default_gateway.is_none() {
            warn!(
                tenant,
                network,
                subnet = %remote.subnet.cidr,
                "controller subnet has no default gateway"
            );
        }

        let existing = self
            .networks
            .list_networks()
            .await?
            .into_iter()
            .find(|n| n.tenant == tenant && n.name == network);
        if let Some(existing) = existing {
            if !same_subnet(&existing.subnet.cidr, &remote.subnet.cidr) {
                return Err(DriverError::Conflict(format!(
                    "network {tenant}/{network} already exists with subnet {}, requested {}",
                    existing.subnet.cidr, remote.subnet.cidr
                )));
            }
            if existing.runtime_network_id != runtime_network_id {
                return Err(DriverError::Conflict(format!(
                    "network {tenant}/{network} ({}) is already bound to runtime network {}",
                    existing.subnet.cidr, existing.runtime_network_id
                )));
            }
            debug!(runtime_network_id, local_id = %existing.local_id, "network already exists");
            return Ok(());
        }

        let spec = LocalNetworkSpec {
            runtime_network_id: runtime_network_id.to_owned(),
            tenant: tenant.to_owned(),
            name: network.to_owned(),
            subnet: remote.subnet,
        };
        let local = self.networks.create_network(&spec).await?;
        info!(
            runtime_network_id,
            tenant,
            network,
            subnet = %local.subnet.cidr,
            local_id = %local.local_id,
            "network created"
        );
        Ok(())
    }

    async fn delete_network(&self, runtime_network_id: &str) -> Result<(), DriverError> {
        let local = self.networks.network(runtime_network_id).await?;
        let active = self
            .endpoints
            .list_endpoints()
            .await?
            .iter()
            .filter(|e| e.network_local_id == local.local_id)
            .count();
        if active > 0 {
            warn!(runtime_network_id, active, "refusing to delete network");
            return Err(DriverError::Conflict(
                "cannot delete network with active endpoints".to_owned(),
            ));
        }

        self.networks.delete_network(runtime_network_id).await?;
        info!(runtime_network_id, local_id = %local.local_id, "network deleted");
        Ok(())
    }

    async fn create_endpoint(
        &self,
        runtime_network_id: &str,
        endpoint_id: &str,
        requested_ip: Option<Ipv4Addr>,
    ) -> Result<Endpoint, DriverError> {
        let local = self.networks.network(runtime_network_id).await?;
        let remote = self
            .controller
            .network_with_subnet(&local.tenant, &local.name, Some(&local.subnet.cidr))
            .await?;

        // The runtime has no stable container id at this point.
        let container_id = endpoint_id;
        let container = self
            .controller
            .create_container_in_subnet(&remote, container_id, requested_ip)
            .await?;
        let gateway = container.gateway.ok_or_else(|| {
            DriverError::Validation(format!(
                "subnet {} of network {}/{} has no default gateway",
                local.subnet.cidr, local.tenant, local.name
            ))
        })?;

        let spec = LocalEndpointSpec {
            name: endpoint_id.to_owned(),
            network_local_id: local.local_id.clone(),
            ip: container.ip,
            gateway,
            mac: container.mac,
        };
        let local_endpoint = self.endpoints.create_endpoint(&spec).await?;
        let interface_name = friendly_interface_name(&local_endpoint.local_id);

        info!(
            runtime_network_id,
            endpoint_id,
            ip = %container.ip,
            mac = %container.mac,
            interface = %interface_name,
            "endpoint created"
        );

        self.notify_add_port(PortBinding {
            vm_uuid: container.vm_uuid.clone(),
            vif_uuid: container.vmi_uuid.clone(),
            interface_name: interface_name.clone(),
            mac: container.mac,
            container_id: container_id.to_owned(),
            ip: container.ip,
            network_uuid: container.network_uuid.clone(),
        });

        Ok(Endpoint {
            container,
            local_id: local_endpoint.local_id,
            interface_name,
        })
    }

    async fn delete_endpoint(
        &self,
        runtime_network_id: &str,
        endpoint_id: &str,
    ) -> Result<(), DriverError> {
        self.networks.network(runtime_network_id).await?;

        let mut lookup_error = None;
        match self.controller.container(endpoint_id).await {
            Ok(container) => {
                self.notify_delete_port(endpoint_id, container.vmi_uuid);
                if let Err(e) = self.controller.delete_container(endpoint_id).await {
                    warn!(endpoint_id, error = %e, "failed to delete controller resources");
                }
            }
            Err(e) => {
                warn!(endpoint_id, error = %e, "controller resources not found, cleaning up host endpoint");
                lookup_error = Some(e);
            }
        }

        self.endpoints.delete_endpoint(endpoint_id).await?;
        info!(runtime_network_id, endpoint_id, "endpoint deleted");

        match lookup_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn endpoint(&self, endpoint_id: &str) -> Result<LocalEndpoint, DriverError> {
        self.endpoints.endpoint(endpoint_id).await
    }
}

/// Builder for [`DriverCore`].
pub struct DriverCoreBuilder<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    controller: Option<Arc<C>>,
    networks: Option<Arc<N>>,
    endpoints: Option<Arc<E>>,
    ports: Option<Arc<P>>,
    port_notify_delay: Duration,
}

impl<C, N, E, P> DriverCoreBuilder<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    pub fn new() -> Self {
        Self {
            controller: None,
            networks: None,
            endpoints: None,
            ports: None,
            port_notify_delay: Duration::ZERO,
        }
    }

    pub fn controller(mut self, controller: Arc<C>) -> Self {
        self.controller = Some(controller);
        self
    }

    pub fn networks(mut self, networks: Arc<N>) -> Self {
        self.networks = Some(networks);
        self
    }

    pub fn endpoints(mut self, endpoints: Arc<E>) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn ports(mut self, ports: Arc<P>) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Delay before each AddPort notification is sent.
    pub fn port_notify_delay(mut self, delay: Duration) -> Self {
        self.port_notify_delay = delay;
        self
    }

    /// # Errors
    ///
    /// [`ConfigError::InvalidValue`] if a collaborator was not provided.
    pub fn build(self) -> Result<DriverCore<C, N, E, P>, ConfigError> {
        Ok(DriverCore {
            controller: required(self.controller, "controller")?,
            networks: required(self.networks, "networks")?,
            endpoints: required(self.endpoints, "endpoints")?,
            ports: required(self.ports, "ports")?,
            port_notify_delay: self.port_notify_delay,
        })
    }
}

impl<C, N, E, P> Default for DriverCoreBuilder<C, N, E, P>
where
    C: Controller,
    N: LocalNetworkRepository,
    E: LocalEndpointRepository,
    P: PortAssociation,
{
    fn default() -> Self {
        Self::new()
    }
}

fn required<T>(value: Option<T>, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: "must be provided".to_owned(),
    })
}
