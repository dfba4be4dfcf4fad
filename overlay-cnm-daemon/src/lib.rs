//! Overlay CNM daemon library.
//!
//! Exposes the daemon modules for integration tests; `main.rs` is the
//! binary entry point.

pub mod cli;
pub mod logging;
pub mod metrics_server;
pub mod orchestrator;
pub mod pid_file;

pub use orchestrator::{DaemonDriver, DaemonError, Orchestrator, load_config};
