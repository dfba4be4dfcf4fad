//! Driver configuration.
//!
//! [`CnmConfig`] is built once at process start and passed by reference into
//! the driver and server constructors.
//!
//! # Precedence
//! 1. CLI flags (applied by the daemon)
//! 2. Environment variables (`CNM_<SECTION>_<FIELD>`, e.g. `CNM_AGENT_URL`)
//! 3. Config file
//! 4. `Default` implementations
//!
//! ```no_run
//! # async fn example() -> Result<(), overlay_cnm_core::error::CnmError> {
//! use overlay_cnm_core::config::CnmConfig;
//!
//! let config = CnmConfig::load("/etc/overlay-cnm/cnm.toml").await?;
//! let config = CnmConfig::parse("[agent]\nurl = \"http://127.0.0.1:9091\"")?;
//! # Ok(())
//! # }
//! ```

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{CnmError, ConfigError};
use crate::model::Ipv4Cidr;
use crate::naming::{DEFAULT_OWNER_PREFIX, DELIMITER};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CnmConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub driver: DriverConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub extension: ExtensionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl CnmConfig {
    /// Loads a TOML file, applies environment overrides and validates.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, CnmError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Loads a TOML file without environment overrides or validation.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, CnmError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CnmError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                CnmError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    pub fn parse(toml_str: &str) -> Result<Self, CnmError> {
        toml::from_str(toml_str).map_err(|e| {
            CnmError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// Applies `CNM_<SECTION>_<FIELD>` environment variables.
    ///
    /// Seeded controller networks can only be set in the file.
    pub fn apply_env_overrides(&mut self) {
        override_string(&mut self.general.log_level, "CNM_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CNM_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "CNM_GENERAL_PID_FILE");

        override_string(&mut self.driver.name, "CNM_DRIVER_NAME");
        override_string(&mut self.driver.network_prefix, "CNM_DRIVER_NETWORK_PREFIX");
        override_string(&mut self.driver.socket_path, "CNM_DRIVER_SOCKET_PATH");
        override_string(&mut self.driver.plugin_dir, "CNM_DRIVER_PLUGIN_DIR");
        override_string(&mut self.driver.vswitch_name, "CNM_DRIVER_VSWITCH_NAME");
        override_string(&mut self.driver.adapter, "CNM_DRIVER_ADAPTER");
        override_u64(
            &mut self.driver.port_notify_delay_ms,
            "CNM_DRIVER_PORT_NOTIFY_DELAY_MS",
        );
        override_u64(
            &mut self.driver.pipe_poll_timeout_ms,
            "CNM_DRIVER_PIPE_POLL_TIMEOUT_MS",
        );
        override_u64(
            &mut self.driver.pipe_poll_interval_ms,
            "CNM_DRIVER_PIPE_POLL_INTERVAL_MS",
        );

        override_u64(
            &mut self.host.create_retry_initial_delay_ms,
            "CNM_HOST_CREATE_RETRY_INITIAL_DELAY_MS",
        );
        override_u64(
            &mut self.host.create_retry_timeout_ms,
            "CNM_HOST_CREATE_RETRY_TIMEOUT_MS",
        );
        override_u32(
            &mut self.host.create_retry_multiplier,
            "CNM_HOST_CREATE_RETRY_MULTIPLIER",
        );
        override_u64(
            &mut self.host.adapter_wait_timeout_ms,
            "CNM_HOST_ADAPTER_WAIT_TIMEOUT_MS",
        );
        override_u64(
            &mut self.host.adapter_wait_interval_ms,
            "CNM_HOST_ADAPTER_WAIT_INTERVAL_MS",
        );

        override_string(&mut self.agent.url, "CNM_AGENT_URL");
        override_u64(
            &mut self.agent.request_timeout_secs,
            "CNM_AGENT_REQUEST_TIMEOUT_SECS",
        );

        override_string(&mut self.controller.ip, "CNM_CONTROLLER_IP");
        override_u16(&mut self.controller.port, "CNM_CONTROLLER_PORT");

        override_bool(&mut self.extension.enabled, "CNM_EXTENSION_ENABLED");
        override_bool(&mut self.extension.running, "CNM_EXTENSION_RUNNING");

        override_bool(&mut self.metrics.enabled, "CNM_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "CNM_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "CNM_METRICS_PORT");
    }

    pub fn validate(&self) -> Result<(), CnmError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        self.driver.validate()?;
        self.host.validate()?;
        self.agent.validate()?;
        self.controller.validate()?;

        if self.metrics.enabled && self.metrics.endpoint != "/metrics" {
            return Err(invalid(
                "metrics.endpoint",
                "only '/metrics' is supported".to_owned(),
            ));
        }

        Ok(())
    }
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// trace, debug, info, warn, error
    pub log_level: String,
    /// json, pretty
    pub log_format: String,
    /// Empty disables the PID file.
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// Driver identity and protocol server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Driver name; also the discovery file stem.
    pub name: String,
    /// First token of every driver-owned host network name.
    pub network_prefix: String,
    /// Unix socket the protocol server listens on.
    pub socket_path: String,
    /// Directory the container runtime scans for `<name>.spec` files.
    pub plugin_dir: String,
    /// Virtual switch the forwarding extension is attached to.
    pub vswitch_name: String,
    /// Physical adapter backing driver networks.
    pub adapter: String,
    /// Delay before notifying the agent of a new port.
    pub port_notify_delay_ms: u64,
    pub pipe_poll_timeout_ms: u64,
    pub pipe_poll_interval_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_OWNER_PREFIX.to_owned(),
            network_prefix: DEFAULT_OWNER_PREFIX.to_owned(),
            socket_path: "/run/docker/plugins/contrail.sock".to_owned(),
            plugin_dir: "/etc/docker/plugins".to_owned(),
            vswitch_name: "Layered Ethernet".to_owned(),
            adapter: "eth0".to_owned(),
            port_notify_delay_ms: 0,
            pipe_poll_timeout_ms: 5_000,
            pipe_poll_interval_ms: 300,
        }
    }
}

impl DriverConfig {
    fn validate(&self) -> Result<(), CnmError> {
        if self.name.is_empty() || self.name.contains(['/', '\\']) {
            return Err(invalid(
                "driver.name",
                "must be non-empty and contain no path separators".to_owned(),
            ));
        }
        if self.network_prefix.is_empty() || self.network_prefix.contains(DELIMITER) {
            return Err(invalid(
                "driver.network_prefix",
                format!("must be non-empty and must not contain '{DELIMITER}'"),
            ));
        }
        if self.socket_path.is_empty() {
            return Err(invalid("driver.socket_path", "must not be empty".to_owned()));
        }
        if self.plugin_dir.is_empty() {
            return Err(invalid("driver.plugin_dir", "must not be empty".to_owned()));
        }
        if self.adapter.is_empty() {
            return Err(invalid("driver.adapter", "must not be empty".to_owned()));
        }
        validate_poll(
            "driver.pipe_poll",
            self.pipe_poll_timeout_ms,
            self.pipe_poll_interval_ms,
        )
    }
}

/// Host networking retry and wait budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub create_retry_initial_delay_ms: u64,
    pub create_retry_timeout_ms: u64,
    pub create_retry_multiplier: u32,
    pub adapter_wait_timeout_ms: u64,
    pub adapter_wait_interval_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            create_retry_initial_delay_ms: 100,
            create_retry_timeout_ms: 10_000,
            create_retry_multiplier: 2,
            adapter_wait_timeout_ms: 15_000,
            adapter_wait_interval_ms: 300,
        }
    }
}

impl HostConfig {
    fn validate(&self) -> Result<(), CnmError> {
        validate_poll(
            "host.create_retry",
            self.create_retry_timeout_ms,
            self.create_retry_initial_delay_ms,
        )?;
        if self.create_retry_multiplier < 1 {
            return Err(invalid(
                "host.create_retry_multiplier",
                "must be at least 1".to_owned(),
            ));
        }
        validate_poll(
            "host.adapter_wait",
            self.adapter_wait_timeout_ms,
            self.adapter_wait_interval_ms,
        )
    }
}

/// Dataplane agent endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub url: String,
    pub request_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:9091".to_owned(),
            request_timeout_secs: 5,
        }
    }
}

impl AgentConfig {
    fn validate(&self) -> Result<(), CnmError> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(invalid(
                "agent.url",
                "must start with http:// or https://".to_owned(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(invalid(
                "agent.request_timeout_secs",
                "must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// SDN controller address and seeded networks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub ip: String,
    pub port: u16,
    /// Networks preloaded into the in-process controller.
    pub networks: Vec<NetworkSeed>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ip: "127.0.0.1".to_owned(),
            port: 8082,
            networks: Vec::new(),
        }
    }
}

impl ControllerConfig {
    fn validate(&self) -> Result<(), CnmError> {
        for (i, seed) in self.networks.iter().enumerate() {
            if seed.tenant.is_empty() || seed.name.is_empty() {
                return Err(invalid(
                    &format!("controller.networks[{i}]"),
                    "tenant and name must not be empty".to_owned(),
                ));
            }
            for (j, subnet) in seed.subnets.iter().enumerate() {
                let field = format!("controller.networks[{i}].subnets[{j}]");
                let cidr: Ipv4Cidr = subnet
                    .cidr
                    .parse()
                    .map_err(|e: crate::model::AddrParseError| invalid(&field, e.to_string()))?;
                if let Some(gateway) = &subnet.gateway {
                    let gateway: Ipv4Addr = gateway
                        .parse()
                        .map_err(|_| invalid(&field, format!("invalid gateway '{gateway}'")))?;
                    if !cidr.contains(gateway) {
                        return Err(invalid(
                            &field,
                            format!("gateway {gateway} is outside {cidr}"),
                        ));
                    }
                }
                for dns in &subnet.dns {
                    dns.parse::<Ipv4Addr>()
                        .map_err(|_| invalid(&field, format!("invalid dns server '{dns}'")))?;
                }
            }
        }
        Ok(())
    }
}

/// A tenant network known to the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkSeed {
    pub tenant: String,
    pub name: String,
    pub subnets: Vec<SubnetSeed>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SubnetSeed {
    pub cidr: String,
    pub gateway: Option<String>,
    pub dns: Vec<String>,
}

/// Initial state of the in-process forwarding extension.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub enabled: bool,
    pub running: bool,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            running: true,
        }
    }
}

/// Prometheus exporter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
    pub port: u16,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
            endpoint: "/metrics".to_owned(),
        }
    }
}

fn invalid(field: &str, reason: String) -> CnmError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

fn validate_poll(field: &str, timeout_ms: u64, interval_ms: u64) -> Result<(), CnmError> {
    if interval_ms == 0 {
        return Err(invalid(field, "interval must be greater than 0".to_owned()));
    }
    if timeout_ms < interval_ms {
        return Err(invalid(
            field,
            format!("timeout ({timeout_ms}ms) is shorter than interval ({interval_ms}ms)"),
        ));
    }
    Ok(())
}

// --- environment override helpers ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u16(target: &mut u16, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u32(target: &mut u32, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_u64(target: &mut u64, env_key: &str) {
    override_parsed(target, env_key);
}

fn override_parsed<T: std::str::FromStr>(target: &mut T, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<T>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                expected = std::any::type_name::<T>(),
                "failed to parse env var, ignoring"
            ),
        }
    }
}
