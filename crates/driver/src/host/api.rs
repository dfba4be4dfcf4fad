//! Raw host networking stack boundary.
//!
//! [`HostNetworkingApi`] is the thin client over the OS network service;
//! names are opaque strings and errors are opaque messages. The
//! [`HostRepository`](super::HostRepository) layers naming, retry and
//! adapter waits on top of it.

use std::future::Future;
use std::net::Ipv4Addr;

/// Opaque error reported by the host networking stack.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct HostApiError {
    message: String,
}

impl HostApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Host network creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNetworkConfig {
    pub name: String,
    pub adapter: String,
    pub subnet_cidr: String,
    pub gateway: Option<Ipv4Addr>,
    /// Comma-separated DNS servers.
    pub dns_servers: String,
}

/// A host network as listed by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostNetwork {
    pub id: String,
    pub name: String,
    pub adapter: String,
    pub subnet_cidr: String,
    pub gateway: Option<Ipv4Addr>,
    pub dns_servers: String,
}

/// Host endpoint creation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpointConfig {
    pub name: String,
    pub network_id: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Dash-delimited upper-case MAC.
    pub mac: String,
}

/// A host endpoint as listed by the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEndpoint {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: String,
}

/// Network/endpoint CRUD on the host networking stack.
pub trait HostNetworkingApi: Send + Sync + 'static {
    fn create_network(
        &self,
        config: &HostNetworkConfig,
    ) -> impl Future<Output = Result<HostNetwork, HostApiError>> + Send;

    fn delete_network(&self, id: &str) -> impl Future<Output = Result<(), HostApiError>> + Send;

    fn list_networks(&self) -> impl Future<Output = Result<Vec<HostNetwork>, HostApiError>> + Send;

    fn create_endpoint(
        &self,
        config: &HostEndpointConfig,
    ) -> impl Future<Output = Result<HostEndpoint, HostApiError>> + Send;

    fn delete_endpoint(&self, id: &str) -> impl Future<Output = Result<(), HostApiError>> + Send;

    fn list_endpoints(
        &self,
    ) -> impl Future<Output = Result<Vec<HostEndpoint>, HostApiError>> + Send;
}

/// Reads interface addresses.
pub trait InterfaceInspector: Send + Sync + 'static {
    /// IPv4 addresses currently bound to `interface`, or `None` if the
    /// interface does not exist.
    fn ipv4_addresses(
        &self,
        interface: &str,
    ) -> impl Future<Output = Result<Option<Vec<Ipv4Addr>>, HostApiError>> + Send;
}

/// Failure class of a host networking error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostErrorClass {
    /// Known-transient stack failure; worth retrying.
    Recoverable,
    Permanent,
}

/// Classifies a host networking error.
///
/// The stack reports a transient failure during network creation only
/// through its message text.
pub fn classify_host_error(err: &HostApiError) -> HostErrorClass {
    let message = err.message().to_lowercase();
    if message.contains("hns failed") && message.contains("unspecified error") {
        HostErrorClass::Recoverable
    } else {
        HostErrorClass::Permanent
    }
}
