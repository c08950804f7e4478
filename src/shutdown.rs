//! Guest shutdown sequencing.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::os::OperatingSystem;
use crate::process::HypervisorProcess;
use crate::remote::RemoteExecutor;

/// Powers the guest off and waits for the hypervisor to exit.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownSequencer {
    timeout: Duration,
}

impl ShutdownSequencer {
    /// Create a sequencer that gives the guest `timeout` to power off.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Shut the guest down.
    ///
    /// Delivering the shutdown command is best-effort: the guest usually
    /// drops the SSH session while powering off, and a failed delivery still
    /// falls through to waiting for the hypervisor. Returns the hypervisor's
    /// exit code, or [`Error::ShutdownTimeout`] after killing it when the
    /// deadline passes. If `cancel` fires at any point the hypervisor is
    /// killed and [`Error::Cancelled`] is returned.
    pub async fn shutdown(
        &self,
        executor: &RemoteExecutor,
        process: &mut HypervisorProcess,
        os: OperatingSystem,
        cancel: &CancellationToken,
    ) -> Result<i32> {
        let deadline = Instant::now() + self.timeout;
        let command = os.shutdown_command();

        if process.is_running() {
            tracing::info!(os = %os, command = command, "shutting down guest");

            match tokio::time::timeout_at(deadline, executor.execute(command, cancel)).await {
                Ok(Ok(())) => tracing::debug!("shutdown command delivered"),
                Ok(Err(Error::Cancelled)) => return self.cancelled(process).await,
                Ok(Err(e)) => tracing::debug!(error = %e, "shutdown command did not complete"),
                Err(_) => tracing::debug!("shutdown command timed out"),
            }
        }

        let waited = tokio::select! {
            waited = tokio::time::timeout_at(deadline, process.wait()) => waited,
            _ = cancel.cancelled() => return self.cancelled(process).await,
        };

        match waited {
            Ok(code) => {
                let code = code?;
                tracing::info!(exit_code = code, "hypervisor exited");
                Ok(code)
            }
            Err(_) => {
                tracing::warn!(pid = ?process.pid(), timeout = ?self.timeout, "guest did not power off, killing hypervisor");
                process.kill().await?;
                Err(Error::ShutdownTimeout {
                    timeout: self.timeout,
                })
            }
        }
    }

    async fn cancelled(&self, process: &mut HypervisorProcess) -> Result<i32> {
        tracing::info!(pid = ?process.pid(), "shutdown cancelled, killing hypervisor");
        process.kill().await?;
        Err(Error::Cancelled)
    }
}
