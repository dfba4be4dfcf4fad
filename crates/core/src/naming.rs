//! Host network naming scheme.
//!
//! A driver-owned host network carries its whole identity in its name:
//!
//! ```text
//! <prefix>:<runtime network id>:<tenant>:<network>:<subnet cidr>
//! ```
//!
//! Listing all host networks and keeping the ones whose first token is the
//! owner prefix is how the driver rediscovers its state after a restart.
//! Values containing the delimiter are not supported.

/// Token delimiter.
pub const DELIMITER: char = ':';

/// Default owner prefix.
pub const DEFAULT_OWNER_PREFIX: &str = "Contrail";

const TOKEN_COUNT: usize = 5;

/// The identity encoded in a driver-owned host network name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NetworkIdentity {
    pub runtime_network_id: String,
    pub tenant: String,
    pub network: String,
    pub subnet_cidr: String,
}

impl NetworkIdentity {
    pub fn new(
        runtime_network_id: impl Into<String>,
        tenant: impl Into<String>,
        network: impl Into<String>,
        subnet_cidr: impl Into<String>,
    ) -> Self {
        Self {
            runtime_network_id: runtime_network_id.into(),
            tenant: tenant.into(),
            network: network.into(),
            subnet_cidr: subnet_cidr.into(),
        }
    }
}

/// Encodes and decodes host network names for one owner prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingScheme {
    prefix: String,
}

impl Default for NamingScheme {
    fn default() -> Self {
        Self::new(DEFAULT_OWNER_PREFIX)
    }
}

impl NamingScheme {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn generate_name(&self, identity: &NetworkIdentity) -> String {
        let d = DELIMITER;
        format!(
            "{}{d}{}{d}{}{d}{}{d}{}",
            self.prefix,
            identity.runtime_network_id,
            identity.tenant,
            identity.network,
            identity.subnet_cidr
        )
    }

    /// Decodes a name produced by [`generate_name`](Self::generate_name).
    ///
    /// Returns `None` for names not owned by this prefix or with the wrong arity.
    pub fn split_name(&self, name: &str) -> Option<NetworkIdentity> {
        let tokens: Vec<&str> = name.split(DELIMITER).collect();
        if tokens.len() != TOKEN_COUNT || tokens[0] != self.prefix {
            return None;
        }
        Some(NetworkIdentity::new(tokens[1], tokens[2], tokens[3], tokens[4]))
    }

    pub fn is_owned(&self, name: &str) -> bool {
        name.split(DELIMITER).next() == Some(self.prefix.as_str())
    }
}
