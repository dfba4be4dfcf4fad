//! Remote network-plugin protocol server.
//!
//! - [`protocol`]: JSON wire types and option parsing
//! - [`routes`]: per-call handlers dispatching to a [`NetworkDriver`](overlay_cnm_core::NetworkDriver)
//! - [`server`]: Unix socket lifecycle
//! - [`discovery`]: plugin discovery file

pub mod discovery;
pub mod protocol;
pub mod routes;
pub mod server;

pub use routes::router;
pub use server::{CnmServer, ServerConfig, ServerState, StopSignal};
