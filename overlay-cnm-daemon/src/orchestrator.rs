//! Daemon assembly and lifecycle.
//!
//! # Startup stages
//!
//! 1. configuration (load, overrides, validation)  -> exit 2 on failure
//! 2. logging                                      -> exit 1
//! 3. collaborators, metrics exporter, PID file    -> exit 2 / 4
//! 4. vRouter forwarding extension                 -> exit 3
//! 5. protocol server                              -> exit 4
//!
//! After startup the daemon waits for SIGTERM/SIGINT or for the server's
//! stop signal; the latter, and a failed shutdown, exit with 5.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use overlay_cnm_core::config::CnmConfig;
use overlay_cnm_core::error::{CnmError, DriverError, ServerError};
use overlay_cnm_core::metrics as m;
use overlay_cnm_driver::simulator::{SimulatedController, SimulatedExtension, SimulatedHost};
use overlay_cnm_driver::{AgentClient, DriverCore, DriverCoreBuilder, HostRepository, VRouterManager};
use overlay_cnm_server::{CnmServer, ServerConfig, ServerState};

use crate::cli::DaemonCli;
use crate::metrics_server;
use crate::pid_file::PidFile;

/// Address the in-process host reports for the physical adapter.
const SIMULATED_ADAPTER_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 10);

type HostRepo = HostRepository<SimulatedHost, SimulatedHost>;

/// Driver core as wired by the daemon.
pub type DaemonDriver = DriverCore<SimulatedController, HostRepo, HostRepo, AgentClient>;

/// A failed daemon stage.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("configuration failed: {0}")]
    Config(String),

    #[error("vRouter initialization failed: {0}")]
    VRouter(#[source] DriverError),

    #[error("startup failed: {0}")]
    Startup(String),

    #[error("runtime failure: {0}")]
    Runtime(String),
}

impl DaemonError {
    /// Process exit code for this stage.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Logging(_) => 1,
            Self::Config(_) => 2,
            Self::VRouter(_) => 3,
            Self::Startup(_) => 4,
            Self::Runtime(_) => 5,
        }
    }
}

impl From<CnmError> for DaemonError {
    fn from(e: CnmError) -> Self {
        Self::Config(e.to_string())
    }
}

/// Loads the file, then applies environment and CLI overrides, then validates.
pub async fn load_config(cli: &DaemonCli) -> Result<CnmConfig, DaemonError> {
    let mut config = CnmConfig::from_file(&cli.config).await?;
    config.apply_env_overrides();
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Owns the driver stack for one daemon run.
pub struct Orchestrator {
    config: CnmConfig,
    vrouter: VRouterManager<SimulatedExtension>,
    server: CnmServer<DaemonDriver>,
}

impl Orchestrator {
    /// Builds every collaborator from a validated configuration.
    ///
    /// Installs the metrics exporter when enabled.
    pub fn build_from_config(config: CnmConfig) -> Result<Self, DaemonError> {
        config.validate()?;

        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)
                .map_err(|e| DaemonError::Startup(e.to_string()))?;
        }

        let controller = SimulatedController::from_seeds(&config.controller.networks)
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        info!(
            controller = %format!("{}:{}", config.controller.ip, config.controller.port),
            seeded_networks = config.controller.networks.len(),
            "using in-process controller"
        );

        let host = Arc::new(
            SimulatedHost::new()
                .with_interface(&config.driver.adapter, vec![SIMULATED_ADAPTER_ADDRESS]),
        );
        let repo = Arc::new(HostRepository::from_config(
            Arc::clone(&host),
            host,
            &config.driver,
            &config.host,
        ));
        let agent = AgentClient::new(&config.agent).map_err(|e| DaemonError::Config(e.to_string()))?;

        let driver = DriverCoreBuilder::new()
            .controller(Arc::new(controller))
            .networks(Arc::clone(&repo))
            .endpoints(repo)
            .ports(Arc::new(agent))
            .port_notify_delay(Duration::from_millis(config.driver.port_notify_delay_ms))
            .build()
            .map_err(|e| DaemonError::Config(e.to_string()))?;

        let extension = Arc::new(SimulatedExtension::new(
            config.extension.enabled,
            config.extension.running,
        ));
        let vrouter = VRouterManager::new(extension, config.driver.vswitch_name.clone());
        let server = CnmServer::new(
            Arc::new(driver),
            ServerConfig::from_driver_config(&config.driver),
        );

        debug!(agent = %config.agent.url, "orchestrator built");
        Ok(Self {
            config,
            vrouter,
            server,
        })
    }

    pub fn server_state(&self) -> ServerState {
        self.server.state()
    }

    /// Gates on the forwarding extension, then starts the protocol server.
    pub async fn start(&mut self) -> Result<(), DaemonError> {
        info!(vswitch = %self.vrouter.vswitch(), "initializing vRouter");
        self.vrouter.initialize().await.map_err(DaemonError::VRouter)?;

        self.server
            .start()
            .await
            .map_err(|e| DaemonError::Startup(e.to_string()))?;

        metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
        Ok(())
    }

    /// Stops the protocol server if it is serving.
    pub async fn stop(&mut self) -> Result<(), DaemonError> {
        match self.server.stop().await {
            Ok(()) | Err(ServerError::NotServing) => Ok(()),
            Err(e) => Err(DaemonError::Runtime(e.to_string())),
        }
    }

    /// Runs until a shutdown signal or an unexpected server stop.
    ///
    /// The PID file, if configured, exists exactly for the duration of
    /// this call.
    pub async fn run(&mut self) -> Result<(), DaemonError> {
        let _pid_file = match self.pid_file_path() {
            Some(path) => {
                Some(PidFile::create(path).map_err(|e| DaemonError::Startup(format!("{e:#}")))?)
            }
            None => None,
        };
        self.serve().await
    }

    async fn serve(&mut self) -> Result<(), DaemonError> {
        self.start().await?;
        let mut stop_signal = self.server.stop_signal();
        info!(socket = %self.config.driver.socket_path, "overlay-cnm-daemon running");

        tokio::select! {
            signal = wait_for_shutdown_signal() => {
                let signal = signal?;
                info!(signal, "shutdown signal received");
                self.stop().await
            }
            failure = stop_signal.wait() => {
                error!(error = %failure, "protocol server stopped unexpectedly");
                if let Err(e) = self.stop().await {
                    error!(error = %e, "cleanup after server failure failed");
                }
                Err(DaemonError::Runtime(failure.to_string()))
            }
        }
    }

    fn pid_file_path(&self) -> Option<PathBuf> {
        let path = &self.config.general.pid_file;
        (!path.is_empty()).then(|| PathBuf::from(path))
    }
}

/// Waits for SIGTERM or SIGINT and returns its name.
async fn wait_for_shutdown_signal() -> Result<&'static str, DaemonError> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| DaemonError::Runtime(format!("failed to install SIGTERM handler: {e}")))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| DaemonError::Runtime(format!("failed to install SIGINT handler: {e}")))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_per_stage() {
        assert_eq!(DaemonError::Logging(String::new()).exit_code(), 1);
        assert_eq!(DaemonError::Config(String::new()).exit_code(), 2);
        assert_eq!(
            DaemonError::VRouter(DriverError::Fatal(String::new())).exit_code(),
            3
        );
        assert_eq!(DaemonError::Startup(String::new()).exit_code(), 4);
        assert_eq!(DaemonError::Runtime(String::new()).exit_code(), 5);
    }

    #[test]
    fn config_errors_map_to_config_stage() {
        let err: DaemonError = CnmError::Config(
            overlay_cnm_core::error::ConfigError::ParseFailed {
                reason: "bad".to_owned(),
            },
        )
        .into();
        assert_eq!(err.exit_code(), 2);
    }
}
