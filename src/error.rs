//! Error types for crossvm.

use std::fmt;
use std::time::Duration;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// How a remote command ended when it did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The command ran to completion with a non-zero exit status.
    Exited(i32),
    /// The session dropped before an exit status was received.
    ConnectionLost,
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Exited(code) => write!(f, "exit status {}", code),
            RemoteStatus::ConnectionLost => write!(f, "connection lost"),
        }
    }
}

/// Errors produced while provisioning, using or tearing down a VM.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid or inconsistent input, detected before anything is launched.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The configuration file could not be read or parsed.
    #[error("failed to load config: {0}")]
    ConfigLoad(String),

    /// The hypervisor process could not be started.
    #[error("failed to launch hypervisor: {0}")]
    Launch(String),

    /// The guest never answered on the forwarded SSH port.
    #[error(
        "guest did not become reachable on port {port} within {}",
        humantime::format_duration(*.timeout)
    )]
    ConnectivityTimeout { port: u16, timeout: Duration },

    /// A command executed inside the guest failed.
    #[error("remote command `{command}` failed: {status}")]
    RemoteCommand {
        command: String,
        status: RemoteStatus,
    },

    /// The guest did not power off in time and the hypervisor was killed.
    #[error(
        "guest did not shut down within {}, hypervisor was killed",
        humantime::format_duration(*.timeout)
    )]
    ShutdownTimeout { timeout: Duration },

    /// An operation was attempted in the wrong lifecycle state.
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// The orchestration was cancelled by the caller.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration(msg.into())
    }

    /// Create a launch error.
    pub fn launch(msg: impl Into<String>) -> Self {
        Error::Launch(msg.into())
    }

    /// Process exit code a CLI should report for this error.
    ///
    /// A failed remote command forwards the guest's own exit status so the
    /// caller sees the same result as if the command had run locally.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::RemoteCommand {
                status: RemoteStatus::Exited(code),
                ..
            } if *code != 0 => *code,
            Error::RemoteCommand {
                status: RemoteStatus::ConnectionLost,
                ..
            } => 255,
            Error::Cancelled => 130,
            _ => 1,
        }
    }
}
