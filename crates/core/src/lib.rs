//! Shared building blocks of the overlay CNM driver.
//!
//! - [`error`]: error taxonomy
//! - [`config`]: TOML configuration with environment overrides
//! - [`model`]: controller-side and host-local data model
//! - [`ports`]: capability traits at the external boundaries
//! - [`polling`]: bounded polling and retry
//! - [`naming`]: host network naming scheme
//! - [`metrics`]: metric names

pub mod config;
pub mod error;
pub mod metrics;
pub mod model;
pub mod naming;
pub mod polling;
pub mod ports;

pub use config::CnmConfig;
pub use error::{CnmError, ConfigError, DriverError, ErrorKind, ServerError};
pub use model::{
    Container, Endpoint, Ipv4Cidr, LocalEndpoint, LocalEndpointSpec, LocalNetwork,
    LocalNetworkSpec, MacAddress, Network, PortBinding, Subnet,
};
pub use naming::{NamingScheme, NetworkIdentity};
pub use polling::{Action, Clock, ManualClock, PollingPolicy, Sleeper, TokioClock};
pub use ports::{
    Controller, ForwardingExtension, LocalEndpointRepository, LocalNetworkRepository,
    NetworkDriver, PortAssociation,
};
