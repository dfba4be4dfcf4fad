//! In-memory SDN controller.
//!
//! Holds tenant networks with their subnets and materializes one virtual
//! machine, interface and instance IP per container id, reusing them on
//! repeated requests.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tracing::debug;

use overlay_cnm_core::config::NetworkSeed;
use overlay_cnm_core::error::DriverError;
use overlay_cnm_core::model::{Container, Ipv4Cidr, MacAddress, Network, Subnet};
use overlay_cnm_core::ports::Controller;

#[derive(Debug, Clone)]
struct VirtualNetwork {
    uuid: String,
    tenant: String,
    name: String,
    subnets: Vec<Subnet>,
}

#[derive(Debug, Default)]
struct ControllerState {
    networks: Vec<VirtualNetwork>,
    containers: HashMap<String, Container>,
    /// Allocated instance IPs per virtual network.
    allocated: HashMap<String, HashSet<Ipv4Addr>>,
}

/// Controller kept in memory.
#[derive(Debug, Default)]
pub struct SimulatedController {
    state: Mutex<ControllerState>,
    fail_deletes: AtomicBool,
}

impl SimulatedController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a tenant network.
    pub fn with_network(mut self, tenant: &str, name: &str, subnets: Vec<Subnet>) -> Self {
        self.state.get_mut().networks.push(VirtualNetwork {
            uuid: uuid::Uuid::new_v4().to_string(),
            tenant: tenant.to_owned(),
            name: name.to_owned(),
            subnets,
        });
        self
    }

    /// Makes `delete_container` fail.
    pub fn with_failing_deletes(self) -> Self {
        self.fail_deletes.store(true, Ordering::SeqCst);
        self
    }

    /// Builds a controller from `[[controller.networks]]` seeds.
    pub fn from_seeds(seeds: &[NetworkSeed]) -> Result<Self, DriverError> {
        let mut controller = Self::new();
        for seed in seeds {
            let subnets = seed
                .subnets
                .iter()
                .map(|s| -> Result<Subnet, DriverError> {
                    let invalid = |what: &str| {
                        DriverError::Validation(format!(
                            "seed {}/{}: invalid {what}",
                            seed.tenant, seed.name
                        ))
                    };
                    Ok(Subnet {
                        cidr: s.cidr.parse().map_err(|_| invalid("cidr"))?,
                        default_gateway: s
                            .gateway
                            .as_deref()
                            .map(str::parse::<Ipv4Addr>)
                            .transpose()
                            .map_err(|_| invalid("gateway"))?,
                        dns_servers: s
                            .dns
                            .iter()
                            .map(|d| d.parse::<Ipv4Addr>())
                            .collect::<Result<Vec<_>, _>>()
                            .map_err(|_| invalid("dns server"))?,
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            controller = controller.with_network(&seed.tenant, &seed.name, subnets);
        }
        Ok(controller)
    }

    pub async fn container_count(&self) -> usize {
        self.state.lock().await.containers.len()
    }

    /// Drops a container's resources without going through the driver.
    pub async fn forget_container(&self, container_id: &str) {
        let mut state = self.state.lock().await;
        if let Some(container) = state.containers.remove(container_id) {
            if let Some(set) = state.allocated.get_mut(&container.network_uuid) {
                set.remove(&container.ip);
            }
        }
    }
}

fn same_subnet(a: &Ipv4Cidr, b: &Ipv4Cidr) -> bool {
    a.prefix_len() == b.prefix_len() && a.network() == b.network()
}

/// Locally administered MAC from a random UUID.
fn generate_mac() -> MacAddress {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    MacAddress::new([0x02, bytes[0], bytes[1], bytes[2], bytes[3], bytes[4]])
}

/// First free host address of `subnet`, skipping network, broadcast,
/// gateway and DNS addresses.
fn next_free_address(subnet: &Subnet, used: &HashSet<Ipv4Addr>) -> Option<Ipv4Addr> {
    let first = u32::from(subnet.cidr.network()).checked_add(1)?;
    let last = u32::from(subnet.cidr.broadcast()).checked_sub(1)?;
    (first..=last).map(Ipv4Addr::from).find(|ip| {
        !used.contains(ip)
            && subnet.default_gateway != Some(*ip)
            && !subnet.dns_servers.contains(ip)
    })
}

impl Controller for SimulatedController {
    async fn network_with_subnet(
        &self,
        tenant: &str,
        network: &str,
        subnet: Option<&Ipv4Cidr>,
    ) -> Result<Network, DriverError> {
        let state = self.state.lock().await;
        let vn = state
            .networks
            .iter()
            .find(|n| n.tenant == tenant && n.name == network)
            .ok_or_else(|| {
                DriverError::NotFound(format!("network {tenant}/{network} not found in controller"))
            })?;

        let found = match subnet {
            Some(cidr) => vn
                .subnets
                .iter()
                .find(|s| same_subnet(&s.cidr, cidr))
                .ok_or_else(|| {
                    DriverError::NotFound(format!(
                        "subnet {cidr} not found in network {tenant}/{network}"
                    ))
                })?,
            None => match vn.subnets.as_slice() {
                [only] => only,
                other => {
                    return Err(DriverError::Validation(format!(
                        "network {tenant}/{network} has {} subnets, a subnet must be specified",
                        other.len()
                    )));
                }
            },
        };

        Ok(Network {
            uuid: vn.uuid.clone(),
            tenant: vn.tenant.clone(),
            name: vn.name.clone(),
            subnet: found.clone(),
        })
    }

    async fn create_container_in_subnet(
        &self,
        network: &Network,
        container_id: &str,
        requested_ip: Option<Ipv4Addr>,
    ) -> Result<Container, DriverError> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.containers.get(container_id) {
            if let Some(ip) = requested_ip {
                if ip != existing.ip {
                    return Err(DriverError::Conflict(format!(
                        "InstanceIp already exists with IP {} different than given {ip}",
                        existing.ip
                    )));
                }
            }
            debug!(container_id, "reusing existing controller resources");
            return Ok(existing.clone());
        }

        let used = state.allocated.entry(network.uuid.clone()).or_default();
        let ip = match requested_ip {
            Some(ip) => {
                if !network.subnet.cidr.contains(ip) {
                    return Err(DriverError::Validation(format!(
                        "requested IP {ip} is outside subnet {}",
                        network.subnet.cidr
                    )));
                }
                if used.contains(&ip) {
                    return Err(DriverError::Conflict(format!("IP {ip} is already in use")));
                }
                ip
            }
            None => next_free_address(&network.subnet, used).ok_or_else(|| {
                DriverError::Controller(format!("subnet {} is exhausted", network.subnet.cidr))
            })?,
        };
        used.insert(ip);

        let container = Container {
            vm_uuid: uuid::Uuid::new_v4().to_string(),
            vmi_uuid: uuid::Uuid::new_v4().to_string(),
            network_uuid: network.uuid.clone(),
            ip,
            prefix_len: network.subnet.cidr.prefix_len(),
            mac: generate_mac(),
            gateway: network.subnet.default_gateway,
        };
        state
            .containers
            .insert(container_id.to_owned(), container.clone());
        Ok(container)
    }

    async fn container(&self, container_id: &str) -> Result<Container, DriverError> {
        self.state
            .lock()
            .await
            .containers
            .get(container_id)
            .cloned()
            .ok_or_else(|| DriverError::NotFound(format!("container {container_id} not found")))
    }

    async fn delete_container(&self, container_id: &str) -> Result<(), DriverError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(DriverError::Controller(format!(
                "failed to delete instance {container_id}"
            )));
        }
        let mut state = self.state.lock().await;
        let container = state
            .containers
            .remove(container_id)
            .ok_or_else(|| DriverError::NotFound(format!("container {container_id} not found")))?;
        if let Some(set) = state.allocated.get_mut(&container.network_uuid) {
            set.remove(&container.ip);
        }
        Ok(())
    }
}
