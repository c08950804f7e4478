//! Hypervisor process management.
//!
//! This module spawns the hypervisor as a child process and owns it until
//! it has been reaped, including signal delivery and forced termination.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};

use crate::error::{Error, Result};
use crate::qemu::HypervisorCommand;

/// Default timeout for graceful exit after SIGTERM before SIGKILL.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Check if a process is alive.
///
/// Returns true if the process exists and is running.
pub fn is_alive(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, 0) == 0 }
}

/// Send SIGTERM to a process.
///
/// Returns true if the signal was sent successfully.
pub fn terminate(pid: libc::pid_t) -> bool {
    unsafe { libc::kill(pid, libc::SIGTERM) == 0 }
}

/// Convert an exit status into a shell-style exit code.
///
/// Processes killed by a signal report `128 + signal`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

/// A running hypervisor.
///
/// The process is killed if the handle is dropped while it is still running,
/// so a handle can never leak a detached VM.
#[derive(Debug)]
pub struct HypervisorProcess {
    child: Child,
    pid: Option<u32>,
    exit_code: Option<i32>,
}

impl HypervisorProcess {
    /// Spawn the hypervisor.
    ///
    /// The process must survive `startup_grace` to count as launched; QEMU
    /// exits right away when it rejects its arguments or cannot bind the
    /// forwarded port, and that is reported as [`Error::Launch`].
    pub async fn launch(command: &HypervisorCommand, startup_grace: Duration) -> Result<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| {
            Error::launch(format!("{}: {}", command.program.display(), e))
        })?;

        let pid = child.id();
        tracing::info!(pid = ?pid, program = %command.program.display(), "hypervisor spawned");
        tracing::debug!(command = %command, "hypervisor command line");

        let mut process = Self {
            child,
            pid,
            exit_code: None,
        };

        if !startup_grace.is_zero() {
            match tokio::time::timeout(startup_grace, process.wait()).await {
                Ok(Ok(code)) => {
                    return Err(Error::launch(format!(
                        "hypervisor exited during startup with status {}",
                        code
                    )));
                }
                Ok(Err(e)) => return Err(Error::launch(e.to_string())),
                Err(_) => {}
            }
        }

        Ok(process)
    }

    /// Get the process ID.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Get the exit code if the process has exited and been reaped.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    /// Check for exit without blocking.
    pub fn try_wait(&mut self) -> Result<Option<i32>> {
        if let Some(code) = self.exit_code {
            return Ok(Some(code));
        }

        Ok(self.child.try_wait()?.map(|status| self.record(status)))
    }

    /// Check if the process is still running.
    pub fn is_running(&mut self) -> bool {
        matches!(self.try_wait(), Ok(None))
    }

    /// Wait for the process to exit.
    ///
    /// Cancel-safe: dropping the future leaves the process untouched.
    pub async fn wait(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        let status = self.child.wait().await?;
        Ok(self.record(status))
    }

    /// Send SIGTERM to the process.
    ///
    /// Returns false if the process has already exited.
    pub fn terminate(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        match self.pid {
            Some(pid) => terminate(pid as libc::pid_t),
            None => false,
        }
    }

    /// SIGKILL the process and reap it.
    pub async fn kill(&mut self) -> Result<i32> {
        if let Some(code) = self.exit_code {
            return Ok(code);
        }

        self.child.kill().await?;
        self.wait().await
    }

    /// Gracefully stop the process.
    ///
    /// Sends SIGTERM, waits for `timeout`, then SIGKILL.
    pub async fn stop(&mut self, timeout: Duration) -> Result<i32> {
        if !self.terminate() {
            return self.wait().await;
        }

        match tokio::time::timeout(timeout, self.wait()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::debug!(pid = ?self.pid, "SIGTERM timeout, sending SIGKILL");
                self.kill().await
            }
        }
    }

    fn record(&mut self, status: ExitStatus) -> i32 {
        let code = exit_code(status);
        tracing::debug!(pid = ?self.pid, exit_code = code, "hypervisor exited");
        self.exit_code = Some(code);
        code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn command(program: &str, args: &[&str]) -> HypervisorCommand {
        HypervisorCommand {
            program: PathBuf::from(program),
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_is_alive_self() {
        // Current process should be alive
        let pid = unsafe { libc::getpid() };
        assert!(is_alive(pid));
    }

    #[test]
    fn test_is_alive_nonexistent() {
        // PID 99999999 is unlikely to exist
        assert!(!is_alive(99999999));
    }

    #[tokio::test]
    async fn test_launch_missing_binary() {
        let result = HypervisorProcess::launch(
            &command("/nonexistent/qemu-system-x86_64", &[]),
            Duration::ZERO,
        )
        .await;
        assert!(matches!(result, Err(Error::Launch(_))));
    }

    #[tokio::test]
    async fn test_launch_detects_early_exit() {
        let result =
            HypervisorProcess::launch(&command("false", &[]), Duration::from_secs(2)).await;
        assert!(matches!(result, Err(Error::Launch(_))));
    }

    #[tokio::test]
    async fn test_stop_running_process() {
        let mut process =
            HypervisorProcess::launch(&command("sleep", &["30"]), Duration::from_millis(100))
                .await
                .unwrap();
        let pid = process.pid().unwrap() as libc::pid_t;
        assert!(process.is_running());

        let code = process.stop(DEFAULT_STOP_TIMEOUT).await.unwrap();
        assert_eq!(code, 128 + libc::SIGTERM);
        assert!(!process.is_running());
        assert!(!is_alive(pid));
    }

    #[tokio::test]
    async fn test_stop_escalates_to_sigkill() {
        let mut process = HypervisorProcess::launch(
            &command("sh", &["-c", "trap '' TERM; exec sleep 30"]),
            Duration::from_millis(200),
        )
        .await
        .unwrap();

        let code = process.stop(Duration::from_millis(300)).await.unwrap();
        assert_eq!(code, 128 + libc::SIGKILL);
        assert_eq!(process.exit_code(), Some(code));
    }

    #[tokio::test]
    async fn test_wait_after_exit_is_cached() {
        let mut process =
            HypervisorProcess::launch(&command("sh", &["-c", "exit 7"]), Duration::ZERO)
                .await
                .unwrap();
        assert_eq!(process.wait().await.unwrap(), 7);
        assert_eq!(process.wait().await.unwrap(), 7);
        assert!(!process.terminate());
        assert_eq!(process.kill().await.unwrap(), 7);
    }
}
