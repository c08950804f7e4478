//! VM lifecycle orchestration.
//!
//! ```text
//! Vm::new(config)         Created      (config validated, nothing spawned)
//!   └─► start()           Booting      (hypervisor spawned)
//!         └─► probe       Probing ─► Ready | TimedOut
//!   └─► execute() × N     Executing ─► Ready
//!   └─► shutdown()        ShuttingDown ─► Terminated
//! ```
//!
//! A [`Vm`] exclusively owns its hypervisor process. Every failure path
//! terminates it, and dropping the `Vm` kills it as a last resort.

use std::fmt;

use tokio_util::sync::CancellationToken;

use crate::architecture::Architecture;
use crate::config::{Timeouts, VmConfig};
use crate::error::{Error, Result};
use crate::os::OperatingSystem;
use crate::probe::{ProbeReport, Prober};
use crate::process::{HypervisorProcess, DEFAULT_STOP_TIMEOUT};
use crate::qemu::{self, HypervisorCommand};
use crate::remote::{RemoteExecutor, SshSettings};
use crate::shutdown::ShutdownSequencer;

/// Lifecycle state of a VM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmState {
    /// Configured, hypervisor not started.
    Created,
    /// Hypervisor process is running, guest is booting.
    Booting,
    /// Waiting for the guest's SSH server.
    Probing,
    /// Guest is reachable and idle.
    Ready,
    /// A remote command is running.
    Executing,
    /// Guest is being powered off.
    ShuttingDown,
    /// Hypervisor has exited and been reaped.
    Terminated,
    /// The guest never became reachable.
    TimedOut,
    /// Launch or boot failed.
    Failed,
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmState::Created => write!(f, "created"),
            VmState::Booting => write!(f, "booting"),
            VmState::Probing => write!(f, "probing"),
            VmState::Ready => write!(f, "ready"),
            VmState::Executing => write!(f, "executing"),
            VmState::ShuttingDown => write!(f, "shutting-down"),
            VmState::Terminated => write!(f, "terminated"),
            VmState::TimedOut => write!(f, "timed-out"),
            VmState::Failed => write!(f, "failed"),
        }
    }
}

/// One ephemeral virtual machine.
#[derive(Debug)]
pub struct Vm {
    config: VmConfig,
    architecture: Architecture,
    os: OperatingSystem,
    timeouts: Timeouts,
    executor: RemoteExecutor,
    state: VmState,
    process: Option<HypervisorProcess>,
}

impl Vm {
    /// Create a VM. Fails with [`Error::Configuration`] before anything is
    /// spawned if the configuration is invalid.
    ///
    /// The SSH port in `ssh` is replaced by the configuration's forwarded
    /// port so the two can never disagree.
    pub fn new(
        config: VmConfig,
        architecture: Architecture,
        os: OperatingSystem,
        mut ssh: SshSettings,
        timeouts: Timeouts,
    ) -> Result<Self> {
        config.validate()?;
        ssh.port = config.ssh_host_port;

        Ok(Self {
            config,
            architecture,
            os,
            timeouts,
            executor: RemoteExecutor::new(ssh),
            state: VmState::Created,
            process: None,
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> VmState {
        self.state
    }

    /// Guest operating system.
    pub fn os(&self) -> OperatingSystem {
        self.os
    }

    /// The hypervisor invocation this VM runs.
    pub fn command(&self) -> HypervisorCommand {
        qemu::build_command(&self.config, self.architecture, self.os)
    }

    /// Hypervisor PID while it is running.
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(|p| p.pid())
    }

    fn transition(&mut self, next: VmState) {
        tracing::debug!(from = %self.state, to = %next, port = self.config.ssh_host_port, "vm state change");
        self.state = next;
    }

    /// Launch the hypervisor and wait until the guest is reachable.
    ///
    /// On failure the hypervisor has already been terminated.
    pub async fn start(&mut self, cancel: &CancellationToken) -> Result<ProbeReport> {
        if self.state != VmState::Created {
            return Err(Error::InvalidState {
                expected: VmState::Created.to_string(),
                actual: self.state.to_string(),
            });
        }

        let command = self.command();
        let process = match HypervisorProcess::launch(&command, self.timeouts.startup_grace).await
        {
            Ok(process) => process,
            Err(e) => {
                self.transition(VmState::Failed);
                return Err(e);
            }
        };
        self.process = Some(process);
        self.transition(VmState::Booting);

        let result = self.probe(cancel).await;
        match &result {
            Ok(_) => self.transition(VmState::Ready),
            Err(Error::ConnectivityTimeout { .. }) => {
                self.transition(VmState::TimedOut);
                self.terminate().await;
            }
            Err(_) => {
                self.transition(VmState::Failed);
                self.terminate().await;
            }
        }
        result
    }

    async fn probe(&mut self, cancel: &CancellationToken) -> Result<ProbeReport> {
        self.transition(VmState::Probing);
        let prober = Prober::new(self.config.ssh_host_port, &self.timeouts);
        let process = self
            .process
            .as_mut()
            .ok_or_else(|| Error::launch("hypervisor is not running"))?;

        tokio::select! {
            result = prober.wait_until_ready(cancel) => result,
            exited = process.wait() => {
                let code = exited?;
                Err(Error::launch(format!(
                    "hypervisor exited with status {} while the guest was booting",
                    code
                )))
            }
        }
    }

    /// Run one command inside the guest.
    ///
    /// Takes `&mut self`, so commands on one VM can only run one at a time.
    pub async fn execute(&mut self, command: &str, cancel: &CancellationToken) -> Result<()> {
        if self.state != VmState::Ready {
            return Err(Error::InvalidState {
                expected: VmState::Ready.to_string(),
                actual: self.state.to_string(),
            });
        }

        self.transition(VmState::Executing);
        let result = self.executor.execute(command, cancel).await;
        self.transition(VmState::Ready);
        result
    }

    /// Power the guest off and reap the hypervisor.
    ///
    /// Returns [`Error::ShutdownTimeout`] if the hypervisor had to be killed
    /// and [`Error::Cancelled`] if `cancel` fired first; it is terminated
    /// either way.
    pub async fn shutdown(&mut self, cancel: &CancellationToken) -> Result<()> {
        let Some(mut process) = self.process.take() else {
            self.transition(VmState::Terminated);
            return Ok(());
        };

        self.transition(VmState::ShuttingDown);
        let result = ShutdownSequencer::new(self.timeouts.shutdown)
            .shutdown(&self.executor, &mut process, self.os, cancel)
            .await;

        if process.is_running() {
            if let Err(e) = process.kill().await {
                tracing::warn!(error = %e, "failed to kill hypervisor");
            }
        }
        self.transition(VmState::Terminated);
        result.map(|_| ())
    }

    /// Stop the hypervisor without a graceful guest shutdown.
    async fn terminate(&mut self) {
        if let Some(mut process) = self.process.take() {
            match process.stop(DEFAULT_STOP_TIMEOUT).await {
                Ok(code) => tracing::debug!(exit_code = code, "hypervisor terminated"),
                Err(e) => tracing::warn!(error = %e, "failed to terminate hypervisor"),
            }
        }
        if !matches!(self.state, VmState::TimedOut | VmState::Failed) {
            self.transition(VmState::Terminated);
        }
    }

    /// Run the whole lifecycle: boot, run `commands` in order, shut down.
    ///
    /// The first failing command stops the sequence and becomes the result.
    /// Shutdown problems are logged and never override the commands'
    /// outcome, except cancellation. On cancellation the hypervisor is
    /// terminated, skipping or cutting short the guest shutdown, and
    /// [`Error::Cancelled`] is returned.
    pub async fn run(mut self, commands: &[String], cancel: &CancellationToken) -> Result<()> {
        self.start(cancel).await?;

        let mut outcome = Ok(());
        for command in commands {
            if let Err(e) = self.execute(command, cancel).await {
                outcome = Err(e);
                break;
            }
        }

        if cancel.is_cancelled() {
            tracing::info!("cancelled, terminating hypervisor");
            self.terminate().await;
            return Err(Error::Cancelled);
        }

        match self.shutdown(cancel).await {
            Ok(()) => {}
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => tracing::warn!(error = %e, "shutdown did not complete gracefully"),
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn write_files(dir: &Path) -> VmConfig {
        let disk = dir.join("disk.img");
        let resources = dir.join("resources.img");
        let firmware = dir.join("OVMF.fd");
        for path in [&disk, &resources, &firmware] {
            std::fs::write(path, b"").unwrap();
        }
        VmConfig::new(Architecture::X86_64, disk, resources, firmware)
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = VmConfig::new(
            Architecture::X86_64,
            "/nonexistent/disk.img",
            "/nonexistent/res.img",
            "/nonexistent/OVMF.fd",
        );
        let result = Vm::new(
            config,
            Architecture::X86_64,
            OperatingSystem::FreeBsd,
            SshSettings::default(),
            Timeouts::default(),
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_new_aligns_ssh_port() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_files(dir.path());
        config.ssh_host_port = 4022;

        let vm = Vm::new(
            config,
            Architecture::X86_64,
            OperatingSystem::OpenBsd,
            SshSettings::default(),
            Timeouts::default(),
        )
        .unwrap();

        assert_eq!(vm.state(), VmState::Created);
        assert_eq!(vm.executor.settings().port, 4022);
        assert!(vm
            .command()
            .args
            .iter()
            .any(|a| a == "user,id=user.0,hostfwd=tcp::4022-:22"));
    }

    #[tokio::test]
    async fn test_execute_requires_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut vm = Vm::new(
            write_files(dir.path()),
            Architecture::X86_64,
            OperatingSystem::FreeBsd,
            SshSettings::default(),
            Timeouts::default(),
        )
        .unwrap();

        let result = vm.execute("true", &CancellationToken::new()).await;
        assert!(matches!(
            result,
            Err(Error::InvalidState { ref expected, ref actual })
                if expected == "ready" && actual == "created"
        ));
        assert_eq!(vm.state(), VmState::Created);
    }

    #[tokio::test]
    async fn test_start_with_missing_hypervisor_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = write_files(dir.path());
        config.hypervisor = dir.path().join("no-such-qemu");

        let mut vm = Vm::new(
            config,
            Architecture::X86_64,
            OperatingSystem::FreeBsd,
            SshSettings::default(),
            Timeouts::default(),
        )
        .unwrap();

        let result = vm.start(&CancellationToken::new()).await;
        assert!(matches!(result, Err(Error::Launch(_))));
        assert_eq!(vm.state(), VmState::Failed);
        assert!(vm.pid().is_none());

        let again = vm.start(&CancellationToken::new()).await;
        assert!(matches!(again, Err(Error::InvalidState { .. })));
    }
}
