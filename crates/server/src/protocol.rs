//! Wire types of the remote network-plugin protocol.
//!
//! Field names follow the runtime's PascalCase JSON. Requests carry more
//! fields than the driver reads; unknown fields are ignored.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::model::Ipv4Cidr;

/// Media type of every protocol response.
pub const CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Options key carrying driver-specific `--opt` values.
pub const GENERIC_OPTIONS_KEY: &str = "com.docker.network.generic";

/// `EndpointInfo` key for the host endpoint id.
pub const INFO_HOST_ID_KEY: &str = "hnsid";

/// `EndpointInfo` key for the endpoint MAC address.
pub const INFO_MAC_KEY: &str = "com.docker.network.endpoint.macaddress";

/// Failure of one protocol call.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The request body could not be decoded.
    #[error("{0}")]
    BadRequest(String),

    /// The request was decoded but its options are unusable.
    #[error("{0}")]
    Invalid(String),

    /// The call is part of the protocol but not supported by this driver.
    #[error("not implemented")]
    NotImplemented,

    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Error body understood by the runtime.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "Err")]
    pub err: String,
}

#[derive(Debug, Serialize)]
pub struct ActivateResponse {
    #[serde(rename = "Implements")]
    pub implements: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
pub struct CapabilitiesResponse {
    #[serde(rename = "Scope")]
    pub scope: &'static str,
}

#[derive(Debug, Default, Deserialize)]
pub struct IpamData {
    #[serde(rename = "AddressSpace", default)]
    pub address_space: String,
    #[serde(rename = "Pool", default)]
    pub pool: String,
    #[serde(rename = "Gateway", default)]
    pub gateway: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateNetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "Options", default)]
    pub options: HashMap<String, Value>,
    #[serde(rename = "IPv4Data", default)]
    pub ipv4_data: Vec<IpamData>,
}

/// Tenant, network and subnet selected by a CreateNetwork request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSelector {
    pub tenant: String,
    pub network: String,
    pub subnet: Ipv4Cidr,
}

impl CreateNetworkRequest {
    /// Extracts the generic `tenant`/`network` options and the first IPv4 pool.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Invalid`] naming the first missing or malformed input.
    pub fn selector(&self) -> Result<NetworkSelector, HandlerError> {
        let generic = self
            .options
            .get(GENERIC_OPTIONS_KEY)
            .ok_or_else(|| HandlerError::Invalid("Generic options missing".to_owned()))?
            .as_object()
            .ok_or_else(|| HandlerError::Invalid("Malformed generic options".to_owned()))?;

        let option = |key: &str, missing: &str| -> Result<String, HandlerError> {
            match generic.get(key) {
                None => Err(HandlerError::Invalid(missing.to_owned())),
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(HandlerError::Invalid("Malformed generic options".to_owned())),
            }
        };
        let tenant = option("tenant", "Tenant not specified")?;
        let network = option("network", "Network name not specified")?;

        let pool = self
            .ipv4_data
            .first()
            .ok_or_else(|| HandlerError::Invalid("Docker subnet IPv4 data missing".to_owned()))?;
        let subnet = pool.pool.parse().map_err(|e| {
            HandlerError::Invalid(format!("invalid IPv4 pool '{}': {e}", pool.pool))
        })?;

        Ok(NetworkSelector {
            tenant,
            network,
            subnet,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct NetworkRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EndpointInterface {
    #[serde(rename = "Address", default, skip_serializing_if = "String::is_empty")]
    pub address: String,
    #[serde(rename = "AddressIPv6", default, skip_serializing_if = "String::is_empty")]
    pub address_ipv6: String,
    #[serde(rename = "MacAddress", default, skip_serializing_if = "String::is_empty")]
    pub mac_address: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateEndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
    #[serde(rename = "Interface", default)]
    pub interface: Option<EndpointInterface>,
}

impl CreateEndpointRequest {
    /// Address pre-assigned by the runtime, if any.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Invalid`] if the address is present but not an IPv4
    /// address or CIDR.
    pub fn requested_ip(&self) -> Result<Option<Ipv4Addr>, HandlerError> {
        let Some(address) = self
            .interface
            .as_ref()
            .map(|i| i.address.as_str())
            .filter(|a| !a.is_empty())
        else {
            return Ok(None);
        };
        let ip = address.split('/').next().unwrap_or(address);
        ip.parse()
            .map(Some)
            .map_err(|_| HandlerError::Invalid(format!("invalid interface address '{address}'")))
    }
}

#[derive(Debug, Serialize)]
pub struct CreateEndpointResponse {
    #[serde(rename = "Interface")]
    pub interface: EndpointInterface,
}

/// Body shared by DeleteEndpoint, EndpointOperInfo, Join and Leave.
#[derive(Debug, Deserialize)]
pub struct EndpointRequest {
    #[serde(rename = "NetworkID")]
    pub network_id: String,
    #[serde(rename = "EndpointID")]
    pub endpoint_id: String,
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    #[serde(rename = "Value")]
    pub value: HashMap<&'static str, String>,
}

#[derive(Debug, Serialize)]
pub struct JoinResponse {
    #[serde(rename = "Gateway")]
    pub gateway: String,
    #[serde(rename = "DisableGatewayService")]
    pub disable_gateway_service: bool,
}

/// Empty success body.
#[derive(Debug, Default, Serialize)]
pub struct Empty {}
