//! Data model shared by the driver core, its collaborators and the protocol server.
//!
//! Controller-side objects ([`Network`], [`Container`]) and host-local objects
//! ([`LocalNetwork`], [`LocalEndpoint`]) are kept as separate types: the two
//! sides are owned by different systems and only the driver core links them.

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Address parsing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddrParseError {
    #[error("invalid CIDR '{0}'")]
    Cidr(String),

    #[error("invalid MAC address '{0}'")]
    Mac(String),
}

/// An IPv4 address with a prefix length, e.g. `10.0.0.0/24` or `10.0.0.5/24`.
///
/// The address part is kept as given; [`Ipv4Cidr::network`] yields the
/// masked network address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix_len: u8,
}

impl Ipv4Cidr {
    /// `0.0.0.0/0`, used by the runtime when no subnet was chosen.
    pub const ANY: Self = Self {
        addr: Ipv4Addr::UNSPECIFIED,
        prefix_len: 0,
    };

    pub fn new(addr: Ipv4Addr, prefix_len: u8) -> Result<Self, AddrParseError> {
        if prefix_len > 32 {
            return Err(AddrParseError::Cidr(format!("{addr}/{prefix_len}")));
        }
        Ok(Self { addr, prefix_len })
    }

    pub fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether this is the catch-all `0.0.0.0/0`.
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }

    fn mask(&self) -> u32 {
        match self.prefix_len {
            0 => 0,
            n => u32::MAX << (32 - u32::from(n)),
        }
    }

    /// The masked network address.
    pub fn network(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) & self.mask())
    }

    /// The broadcast address of the subnet.
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.addr) | !self.mask())
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        u32::from(ip) & self.mask() == u32::from(self.network())
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix_len)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddrParseError::Cidr(s.to_owned());
        let (addr, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let addr: Ipv4Addr = addr.parse().map_err(|_| invalid())?;
        let prefix_len: u8 = prefix.parse().map_err(|_| invalid())?;
        Self::new(addr, prefix_len).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = AddrParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(value: Ipv4Cidr) -> Self {
        value.to_string()
    }
}

/// A 48-bit MAC address.
///
/// Parses both the colon-delimited form used by the controller and the
/// runtime, and the dash-delimited form used by the host networking stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// Host stack form: upper-case, dash-delimited (`02-42-AC-11-00-02`).
    pub fn to_host_format(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join("-")
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddress {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || AddrParseError::Mac(s.to_owned());
        let parts: Vec<&str> = s.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(invalid());
        }
        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 {
                return Err(invalid());
            }
            *slot = u8::from_str_radix(part, 16).map_err(|_| invalid())?;
        }
        Ok(Self(octets))
    }
}

/// A controller-side subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub cidr: Ipv4Cidr,
    /// Optional; some deployments intentionally omit it.
    pub default_gateway: Option<Ipv4Addr>,
    pub dns_servers: Vec<Ipv4Addr>,
}

/// A controller-side virtual network, resolved down to one subnet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    /// Controller UUID of the virtual network.
    pub uuid: String,
    pub tenant: String,
    pub name: String,
    pub subnet: Subnet,
}

/// Controller-side resources materialized for one container attachment:
/// virtual machine, interface and instance IP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    pub vm_uuid: String,
    pub vmi_uuid: String,
    pub network_uuid: String,
    pub ip: Ipv4Addr,
    pub prefix_len: u8,
    pub mac: MacAddress,
    pub gateway: Option<Ipv4Addr>,
}

/// Input for creating a host-local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNetworkSpec {
    /// Network handle assigned by the container runtime.
    pub runtime_network_id: String,
    pub tenant: String,
    pub name: String,
    pub subnet: Subnet,
}

/// A driver-owned host-local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalNetwork {
    /// Identifier assigned by the host networking stack.
    pub local_id: String,
    pub runtime_network_id: String,
    pub tenant: String,
    pub name: String,
    pub subnet: Subnet,
}

/// Input for creating a host-local endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpointSpec {
    pub name: String,
    pub network_local_id: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: MacAddress,
}

/// A host-local endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEndpoint {
    /// Identifier assigned by the host networking stack.
    pub local_id: String,
    pub name: String,
    pub network_local_id: String,
    pub ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mac: MacAddress,
}

/// A fully created endpoint as returned by CreateEndpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub container: Container,
    pub local_id: String,
    /// Kernel-visible interface name the dataplane correlates against.
    pub interface_name: String,
}

/// A port registration sent to the dataplane agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortBinding {
    pub vm_uuid: String,
    pub vif_uuid: String,
    pub interface_name: String,
    pub mac: MacAddress,
    pub container_id: String,
    pub ip: Ipv4Addr,
    pub network_uuid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cidr_parses_and_displays_as_given() {
        let cidr: Ipv4Cidr = "10.0.0.5/24".parse().expect("should parse cidr");
        assert_eq!(cidr.addr(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(cidr.prefix_len(), 24);
        assert_eq!(cidr.network(), Ipv4Addr::new(10, 0, 0, 0));
        assert_eq!(cidr.broadcast(), Ipv4Addr::new(10, 0, 0, 255));
        assert_eq!(cidr.to_string(), "10.0.0.5/24");
    }

    #[test]
    fn cidr_rejects_garbage() {
        assert!("10.0.0.0".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.0/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0/24".parse::<Ipv4Cidr>().is_err());
        assert!("fe80::/64".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn cidr_contains() {
        let cidr: Ipv4Cidr = "10.0.0.0/24".parse().expect("should parse cidr");
        assert!(cidr.contains(Ipv4Addr::new(10, 0, 0, 77)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 1, 1)));
        assert!(Ipv4Cidr::ANY.contains(Ipv4Addr::new(192, 168, 1, 1)));
    }

    #[test]
    fn cidr_any() {
        assert!("0.0.0.0/0".parse::<Ipv4Cidr>().expect("should parse cidr").is_any());
        assert!(!"10.0.0.0/8".parse::<Ipv4Cidr>().expect("should parse cidr").is_any());
    }

    #[test]
    fn mac_round_trips_between_formats() {
        let mac: MacAddress = "02:42:ac:11:00:0f".parse().expect("should parse mac");
        assert_eq!(mac.to_host_format(), "02-42-AC-11-00-0F");
        let back: MacAddress = mac.to_host_format().parse().expect("should parse host-format mac");
        assert_eq!(back, mac);
        assert_eq!(back.to_string(), "02:42:ac:11:00:0f");
    }

    #[test]
    fn mac_rejects_bad_input() {
        assert!("02:42:ac:11:00".parse::<MacAddress>().is_err());
        assert!("02:42:ac:11:00:zz".parse::<MacAddress>().is_err());
        assert!("0242.ac11.000f".parse::<MacAddress>().is_err());
    }
}
