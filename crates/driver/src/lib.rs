//! Overlay CNM driver: orchestration and its collaborators.
//!
//! - [`driver`]: [`DriverCore`], the network/endpoint lifecycle across the
//!   controller, the host and the dataplane agent
//! - [`vrouter`]: forwarding extension startup gate
//! - [`host`]: host-local repositories over the raw host networking API
//! - [`agent`]: dataplane agent HTTP client
//! - [`simulator`]: in-process controller, host, extension and port table

pub mod agent;
pub mod driver;
pub mod host;
pub mod simulator;
pub mod vrouter;

pub use agent::{AgentClient, PortRequest};
pub use driver::{DriverCore, DriverCoreBuilder, friendly_interface_name};
pub use host::{HostRepository, classify_host_error};
pub use vrouter::VRouterManager;
