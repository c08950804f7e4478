//! Command execution inside the guest over SSH.
//!
//! Commands are run through the system `ssh` client against the forwarded
//! port on the host loopback interface. Output is streamed straight to the
//! caller's stdout and stderr.

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_SSH_PORT, DEFAULT_SSH_USER};
use crate::error::{Error, RemoteStatus, Result};
use crate::probe::GUEST_HOST;

/// Exit status `ssh` reports for its own failures (connection refused,
/// authentication failure, dropped session).
const SSH_ERROR_STATUS: i32 = 255;

/// Options shared by every ssh invocation.
///
/// Guest images are ephemeral and their host keys change on every boot, so
/// host key checking is disabled and nothing is recorded in known_hosts.
const SSH_OPTS: &[&str] = &[
    "-o", "StrictHostKeyChecking=no",
    "-o", "UserKnownHostsFile=/dev/null",
    "-o", "LogLevel=ERROR",
    "-o", "BatchMode=yes",
    "-o", "ConnectTimeout=5",
];

/// Shell used to interpret commands inside the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Shell {
    /// The login shell of the SSH user.
    #[default]
    Default,
    Bash,
    Sh,
}

impl Shell {
    /// Wrap `command` so it is interpreted by this shell.
    pub fn wrap(self, command: &str) -> String {
        match self {
            Shell::Default => command.to_string(),
            Shell::Bash => format!("bash -c {}", quote(command)),
            Shell::Sh => format!("sh -c {}", quote(command)),
        }
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shell::Default => write!(f, "default"),
            Shell::Bash => write!(f, "bash"),
            Shell::Sh => write!(f, "sh"),
        }
    }
}

impl FromStr for Shell {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" => Ok(Shell::Default),
            "bash" => Ok(Shell::Bash),
            "sh" => Ok(Shell::Sh),
            _ => Err(Error::configuration(format!("invalid shell: {}", s))),
        }
    }
}

/// Quote a string for a POSIX shell.
pub fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Parse a whitespace-separated list of environment variable names.
pub fn parse_env_names(names: &str) -> Result<Vec<String>> {
    names
        .split_whitespace()
        .map(|name| {
            let mut chars = name.chars();
            let valid_start = chars
                .next()
                .map(|c| c.is_ascii_alphabetic() || c == '_')
                .unwrap_or(false);
            if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(name.to_string())
            } else {
                Err(Error::configuration(format!(
                    "invalid environment variable name: {}",
                    name
                )))
            }
        })
        .collect()
}

/// How to reach and log into the guest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshSettings {
    /// ssh client binary.
    pub program: PathBuf,
    /// Forwarded host port.
    pub port: u16,
    /// Login user inside the guest.
    pub user: String,
    /// Private key file, if not using the agent or default keys.
    pub identity: Option<PathBuf>,
    /// Shell interpreting each command.
    pub shell: Shell,
    /// Directory inside the guest commands run in.
    pub working_directory: Option<String>,
    /// Host environment variables forwarded with `SendEnv`.
    pub forward_env: Vec<String>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ssh"),
            port: DEFAULT_SSH_PORT,
            user: DEFAULT_SSH_USER.to_string(),
            identity: None,
            shell: Shell::Default,
            working_directory: None,
            forward_env: Vec::new(),
        }
    }
}

/// Runs commands inside the guest, one at a time.
#[derive(Debug, Clone)]
pub struct RemoteExecutor {
    settings: SshSettings,
}

impl RemoteExecutor {
    /// Create an executor.
    pub fn new(settings: SshSettings) -> Self {
        Self { settings }
    }

    /// Connection settings.
    pub fn settings(&self) -> &SshSettings {
        &self.settings
    }

    /// The command line the guest's login shell receives.
    pub fn remote_command(&self, command: &str) -> String {
        let command = self.settings.shell.wrap(command);
        match &self.settings.working_directory {
            Some(dir) => format!("cd {} && {}", quote(dir), command),
            None => command,
        }
    }

    /// Arguments passed to the ssh client.
    pub fn ssh_args(&self, command: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTS.iter().map(|s| s.to_string()).collect();
        args.extend(["-p".to_string(), self.settings.port.to_string()]);

        if let Some(identity) = &self.settings.identity {
            args.extend(["-i".to_string(), identity.display().to_string()]);
        }

        for name in &self.settings.forward_env {
            args.extend(["-o".to_string(), format!("SendEnv={}", name)]);
        }

        args.push(format!("{}@{}", self.settings.user, GUEST_HOST));
        args.push(self.remote_command(command));
        args
    }

    /// Run `command` in the guest and wait for it to finish.
    ///
    /// # Errors
    ///
    /// [`Error::RemoteCommand`] for a non-zero exit status or a lost
    /// session, [`Error::Cancelled`] if `cancel` fires while the command is
    /// running. The command is never retried.
    pub async fn execute(&self, command: &str, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!(port = self.settings.port, command = %command, "executing remote command");

        let mut child = Command::new(&self.settings.program)
            .args(self.ssh_args(command))
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                tracing::error!(program = %self.settings.program.display(), error = %e, "failed to spawn ssh");
                e
            })?;

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill ssh session");
                }
                return Err(Error::Cancelled);
            }
        };

        let remote_status = match status.code() {
            Some(0) => {
                tracing::debug!(command = %command, "remote command succeeded");
                return Ok(());
            }
            Some(SSH_ERROR_STATUS) | None => RemoteStatus::ConnectionLost,
            Some(code) => RemoteStatus::Exited(code),
        };

        Err(Error::RemoteCommand {
            command: command.to_string(),
            status: remote_status,
        })
    }
}
