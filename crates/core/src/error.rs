//! Error types shared by every overlay-cnm crate.
//!
//! [`DriverError`] carries the failure taxonomy the driver reports to the
//! container runtime; [`DriverError::kind`] collapses it into an
//! [`ErrorKind`] for callers that only branch on the class.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum CnmError {
    /// Configuration errors
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Driver operation errors
    #[error("driver error: {0}")]
    Driver(#[from] DriverError),

    /// Protocol server errors
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// I/O errors
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file does not exist
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// TOML parsing failed
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// A field holds a value outside its allowed range
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Coarse failure class of a [`DriverError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing request input; nothing external was touched.
    Validation,
    /// A controller or host-local resource is absent.
    NotFound,
    /// The request contradicts existing state; nothing was mutated.
    Conflict,
    /// A transient condition that did not clear within its retry budget.
    Transient,
    /// Requires operator intervention; never retried.
    Fatal,
    /// An external collaborator reported a failure outside the classes above.
    Upstream,
}

/// Errors raised by the driver core and its collaborators.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),

    /// SDN controller client failure
    #[error("controller: {0}")]
    Controller(String),

    /// Host network-state client failure
    #[error("host networking: {0}")]
    HostNetworking(String),

    /// Dataplane agent failure
    #[error("port association: {0}")]
    PortAssociation(String),

    /// A bounded wait ran out of budget
    #[error("waited for {what} for too long ({elapsed:?})")]
    WaitTimeout { what: String, elapsed: Duration },
}

impl DriverError {
    /// Returns the taxonomy class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::Transient(_) | Self::WaitTimeout { .. } => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Controller(_) | Self::HostNetworking(_) | Self::PortAssociation(_) => {
                ErrorKind::Upstream
            }
        }
    }

    /// Whether this error means the resource does not exist.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Protocol server lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// `start` was called while the server was not idle
    #[error("already serving")]
    AlreadyServing,

    /// `stop` was called while the server was not serving
    #[error("not serving")]
    NotServing,

    /// A startup step failed; the server is back to not serving
    #[error("startup failed while {stage}: {reason}")]
    Startup { stage: &'static str, reason: String },

    /// A shutdown step failed; OS resources may still be held
    #[error("shutdown failed while {stage}: {reason}")]
    Shutdown { stage: &'static str, reason: String },

    /// The background serve task ended with an error after startup
    #[error("serve loop failed: {0}")]
    Serve(String),
}
