//! IPC server lifecycle.
//!
//! ```text
//! NotServing ──start──> Starting ──> Serving ──stop──> Stopping ──> NotServing
//!      ^                   │
//!      └──── failure ──────┘
//! ```
//!
//! `start` binds the Unix socket, serves the protocol router on a
//! background task and publishes the discovery file. A serve failure after
//! `start` returned is reported through [`StopSignal`].

use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use overlay_cnm_core::config::DriverConfig;
use overlay_cnm_core::error::ServerError;
use overlay_cnm_core::polling::{PollingPolicy, wait_until};
use overlay_cnm_core::ports::NetworkDriver;

use crate::discovery;
use crate::routes;

/// Socket file mode: owner read/write only.
const SOCKET_MODE: u32 = 0o600;

/// Lifecycle state of a [`CnmServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    NotServing,
    Starting,
    Serving,
    Stopping,
}

impl ServerState {
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::NotServing => "not_serving",
            Self::Starting => "starting",
            Self::Serving => "serving",
            Self::Stopping => "stopping",
        }
    }
}

/// Where and how the server listens.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub plugin_dir: PathBuf,
    /// Discovery file stem.
    pub name: String,
    /// Budget for the socket to appear, become dialable and disappear.
    pub poll: PollingPolicy,
}

impl ServerConfig {
    pub fn from_driver_config(driver: &DriverConfig) -> Self {
        Self {
            socket_path: PathBuf::from(&driver.socket_path),
            plugin_dir: PathBuf::from(&driver.plugin_dir),
            name: driver.name.clone(),
            poll: PollingPolicy::timeout(
                Duration::from_millis(driver.pipe_poll_timeout_ms),
                Duration::from_millis(driver.pipe_poll_interval_ms),
            ),
        }
    }
}

/// Receives the reason the serve task ended on its own.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<Option<String>>,
}

impl StopSignal {
    /// Resolves once the serve task has failed after startup.
    pub async fn wait(&mut self) -> ServerError {
        let reason = match self.rx.wait_for(Option::is_some).await {
            Ok(reason) => reason.clone().unwrap_or_default(),
            Err(_) => "server dropped".to_owned(),
        };
        ServerError::Serve(reason)
    }
}

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    spec_file: PathBuf,
}

/// Serves the remote network-plugin protocol for one driver.
pub struct CnmServer<D: NetworkDriver> {
    driver: Arc<D>,
    config: ServerConfig,
    state: ServerState,
    running: Option<Running>,
    failure_tx: watch::Sender<Option<String>>,
}

impl<D: NetworkDriver> CnmServer<D> {
    pub fn new(driver: Arc<D>, config: ServerConfig) -> Self {
        let (failure_tx, _) = watch::channel(None);
        Self {
            driver,
            config,
            state: ServerState::NotServing,
            running: None,
            failure_tx,
        }
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Signal fired when serving stops without [`stop`](Self::stop).
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            rx: self.failure_tx.subscribe(),
        }
    }

    /// Starts serving.
    ///
    /// # Errors
    ///
    /// [`ServerError::AlreadyServing`] unless the server is idle, and
    /// [`ServerError::Startup`] naming the failed step. A failed start
    /// releases everything it acquired. A socket another server still
    /// accepts connections on is never touched.
    pub async fn start(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::NotServing {
            warn!(state = self.state.state_name(), "start requested while not idle");
            return Err(ServerError::AlreadyServing);
        }
        self.state = ServerState::Starting;
        self.failure_tx.send_replace(None);
        info!(socket = %self.config.socket_path.display(), "starting protocol server");

        if let Err(e) = claim_socket(&self.config.socket_path).await {
            self.state = ServerState::NotServing;
            error!(error = %e, "protocol server failed to start");
            return Err(e);
        }

        match self.try_start().await {
            Ok(running) => {
                self.running = Some(running);
                self.state = ServerState::Serving;
                info!(socket = %self.config.socket_path.display(), "protocol server serving");
                Ok(())
            }
            Err(e) => {
                if let Err(cleanup) = remove_socket(&self.config.socket_path).await {
                    warn!(error = %cleanup, "failed to remove socket after failed start");
                }
                self.state = ServerState::NotServing;
                error!(error = %e, "protocol server failed to start");
                Err(e)
            }
        }
    }

    async fn try_start(&self) -> Result<Running, ServerError> {
        let socket_path = &self.config.socket_path;
        let listener =
            UnixListener::bind(socket_path).map_err(|e| startup("binding socket", e))?;
        tokio::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(SOCKET_MODE))
            .await
            .map_err(|e| startup("restricting socket permissions", e))?;

        wait_until(&self.config.poll, "socket file", || async move {
            tokio::fs::try_exists(socket_path).await.unwrap_or(false)
        })
        .await
        .map_err(|e| startup("waiting for socket file", e))?;

        let cancel = CancellationToken::new();
        let task = self.spawn_serve(listener, cancel.clone());

        let dialable = wait_until(&self.config.poll, "socket to accept connections", || async move {
            UnixStream::connect(socket_path).await.is_ok()
        })
        .await;
        if let Err(e) = dialable {
            shutdown_task(&cancel, task).await;
            return Err(startup("waiting for socket to accept connections", e));
        }

        match discovery::write_spec_file(&self.config.plugin_dir, &self.config.name, socket_path)
            .await
        {
            Ok(spec_file) => Ok(Running {
                cancel,
                task,
                spec_file,
            }),
            Err(e) => {
                shutdown_task(&cancel, task).await;
                Err(startup("writing discovery file", e))
            }
        }
    }

    fn spawn_serve(&self, listener: UnixListener, cancel: CancellationToken) -> JoinHandle<()> {
        let app = routes::router(Arc::clone(&self.driver));
        let failure_tx = self.failure_tx.clone();
        tokio::spawn(async move {
            let shutdown = cancel.clone().cancelled_owned();
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await;
            if cancel.is_cancelled() {
                debug!("serve loop finished");
                return;
            }
            let reason = match result {
                Ok(()) => "exited without being stopped".to_owned(),
                Err(e) => e.to_string(),
            };
            error!(%reason, "protocol server stopped serving");
            failure_tx.send_replace(Some(reason));
        })
    }

    /// Stops serving and releases the socket and the discovery file.
    ///
    /// # Errors
    ///
    /// [`ServerError::NotServing`] unless serving, and
    /// [`ServerError::Shutdown`] if a resource could not be released.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        if self.state != ServerState::Serving {
            return Err(ServerError::NotServing);
        }
        let Some(running) = self.running.take() else {
            return Err(ServerError::NotServing);
        };
        self.state = ServerState::Stopping;
        info!("stopping protocol server");

        let result = self.release(running).await;
        self.state = ServerState::NotServing;
        match &result {
            Ok(()) => info!("protocol server stopped"),
            Err(e) => error!(error = %e, "protocol server stopped with leftovers"),
        }
        result
    }

    async fn release(&self, running: Running) -> Result<(), ServerError> {
        shutdown_task(&running.cancel, running.task).await;

        discovery::remove_spec_file(&running.spec_file)
            .await
            .map_err(|e| shutdown("removing discovery file", e))?;

        let socket_path = &self.config.socket_path;
        remove_socket(socket_path)
            .await
            .map_err(|e| shutdown("removing socket", e))?;
        wait_until(&self.config.poll, "socket file removal", || async move {
            !tokio::fs::try_exists(socket_path).await.unwrap_or(true)
        })
        .await
        .map_err(|e| shutdown("waiting for socket removal", e))?;
        Ok(())
    }
}

impl<D: NetworkDriver> Drop for CnmServer<D> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn shutdown_task(cancel: &CancellationToken, task: JoinHandle<()>) {
    cancel.cancel();
    if let Err(e) = task.await {
        warn!(error = %e, "serve task ended abnormally");
    }
}

/// Prepares `path` for binding: creates its directory and removes a stale
/// socket file. Fails if a live server still accepts connections there.
async fn claim_socket(path: &Path) -> Result<(), ServerError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| startup("creating socket directory", e))?;
    }
    match UnixStream::connect(path).await {
        Ok(_) => Err(startup(
            "socket already in use",
            format!("another server is listening on {}", path.display()),
        )),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
            ) =>
        {
            debug!(socket = %path.display(), "removing stale socket");
            remove_socket(path)
                .await
                .map_err(|e| startup("removing stale socket", e))
        }
        Err(e) => Err(startup("checking existing socket", e)),
    }
}

async fn remove_socket(path: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn startup(stage: &'static str, reason: impl ToString) -> ServerError {
    ServerError::Startup {
        stage,
        reason: reason.to_string(),
    }
}

fn shutdown(stage: &'static str, reason: impl ToString) -> ServerError {
    ServerError::Shutdown {
        stage,
        reason: reason.to_string(),
    }
}
