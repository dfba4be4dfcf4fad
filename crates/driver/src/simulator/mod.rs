//! In-process collaborators.
//!
//! Real controller and host-network clients live outside this crate; these
//! implementations honour the same capability contracts and back the daemon
//! and the test suites.

mod controller;
mod extension;
mod host;
mod ports;

pub use controller::SimulatedController;
pub use extension::SimulatedExtension;
pub use host::SimulatedHost;
pub use ports::RecordingPorts;
