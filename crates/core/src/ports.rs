//! Capability traits at the driver's external boundaries.
//!
//! The driver core is generic over these traits and holds each collaborator
//! behind an `Arc`, so tests swap in in-memory implementations.
//!
//! ```text
//!                 ┌──────────────┐
//!  runtime ──────▶│ NetworkDriver│ (driver core)
//!                 └──────┬───────┘
//!        ┌───────────────┼──────────────────┬─────────────────┐
//!        ▼               ▼                  ▼                 ▼
//!   Controller   LocalNetworkRepository  LocalEndpoint-   PortAssociation
//!                                        Repository
//! ```

use std::future::Future;
use std::net::Ipv4Addr;

use crate::error::DriverError;
use crate::model::{
    Container, Endpoint, Ipv4Cidr, LocalEndpoint, LocalEndpointSpec, LocalNetwork,
    LocalNetworkSpec, Network, PortBinding,
};

/// SDN controller client.
pub trait Controller: Send + Sync + 'static {
    /// Looks up a tenant network restricted to one subnet.
    ///
    /// With `subnet == None` the network must hold exactly one subnet, which
    /// is returned.
    ///
    /// # Errors
    ///
    /// `NotFound` if the tenant, network or subnet does not exist.
    fn network_with_subnet(
        &self,
        tenant: &str,
        network: &str,
        subnet: Option<&Ipv4Cidr>,
    ) -> impl Future<Output = Result<Network, DriverError>> + Send;

    /// Gets or creates the virtual machine, interface and instance IP for
    /// `container_id` inside `network`.
    ///
    /// # Errors
    ///
    /// `Conflict` if an instance IP already exists with an address other
    /// than `requested_ip`.
    fn create_container_in_subnet(
        &self,
        network: &Network,
        container_id: &str,
        requested_ip: Option<Ipv4Addr>,
    ) -> impl Future<Output = Result<Container, DriverError>> + Send;

    /// # Errors
    ///
    /// `NotFound` if nothing was created for `container_id`.
    fn container(
        &self,
        container_id: &str,
    ) -> impl Future<Output = Result<Container, DriverError>> + Send;

    fn delete_container(
        &self,
        container_id: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// Host-local network store. Only driver-owned networks are visible.
pub trait LocalNetworkRepository: Send + Sync + 'static {
    /// # Errors
    ///
    /// `Conflict` if a network with the same encoded identity exists.
    fn create_network(
        &self,
        spec: &LocalNetworkSpec,
    ) -> impl Future<Output = Result<LocalNetwork, DriverError>> + Send;

    /// # Errors
    ///
    /// `NotFound` if no owned network carries `runtime_network_id`.
    fn network(
        &self,
        runtime_network_id: &str,
    ) -> impl Future<Output = Result<LocalNetwork, DriverError>> + Send;

    fn delete_network(
        &self,
        runtime_network_id: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn list_networks(&self) -> impl Future<Output = Result<Vec<LocalNetwork>, DriverError>> + Send;
}

/// Host-local endpoint store, keyed by endpoint name.
pub trait LocalEndpointRepository: Send + Sync + 'static {
    fn create_endpoint(
        &self,
        spec: &LocalEndpointSpec,
    ) -> impl Future<Output = Result<LocalEndpoint, DriverError>> + Send;

    /// # Errors
    ///
    /// `NotFound` if no endpoint is named `name`.
    fn endpoint(&self, name: &str)
    -> impl Future<Output = Result<LocalEndpoint, DriverError>> + Send;

    fn delete_endpoint(&self, name: &str) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn list_endpoints(
        &self,
    ) -> impl Future<Output = Result<Vec<LocalEndpoint>, DriverError>> + Send;
}

/// Dataplane agent port table.
pub trait PortAssociation: Send + Sync + 'static {
    fn add_port(&self, port: &PortBinding) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn delete_port(&self, vif_uuid: &str) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// Host forwarding extension attached to a virtual switch.
pub trait ForwardingExtension: Send + Sync + 'static {
    fn is_enabled(&self, vswitch: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;

    fn is_running(&self, vswitch: &str) -> impl Future<Output = Result<bool, DriverError>> + Send;

    fn enable(&self, vswitch: &str) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// The operations the protocol server dispatches to.
pub trait NetworkDriver: Send + Sync + 'static {
    fn create_network(
        &self,
        runtime_network_id: &str,
        tenant: &str,
        network: &str,
        subnet: &Ipv4Cidr,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn delete_network(
        &self,
        runtime_network_id: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn create_endpoint(
        &self,
        runtime_network_id: &str,
        endpoint_id: &str,
        requested_ip: Option<Ipv4Addr>,
    ) -> impl Future<Output = Result<Endpoint, DriverError>> + Send;

    fn delete_endpoint(
        &self,
        runtime_network_id: &str,
        endpoint_id: &str,
    ) -> impl Future<Output = Result<(), DriverError>> + Send;

    /// Reads a host-local endpoint by name.
    fn endpoint(
        &self,
        endpoint_id: &str,
    ) -> impl Future<Output = Result<LocalEndpoint, DriverError>> + Send;
}
