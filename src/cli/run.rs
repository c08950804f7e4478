//! Run command implementation.

use clap::Args;
use crossvm::config::Timeouts;
use crossvm::remote::{self, Shell, SshSettings};
use crossvm::vm::Vm;
use crossvm::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::args::VmArgs;

/// Boot a VM, run commands inside it and shut it down.
#[derive(Args, Debug)]
pub struct RunCmd {
    #[command(flatten)]
    pub vm: VmArgs,

    /// Command to run inside the guest (repeatable, run in order)
    #[arg(short = 'r', long = "run", value_name = "COMMAND", required = true)]
    pub commands: Vec<String>,

    /// Shell interpreting each command (default, bash, sh)
    #[arg(long, default_value = "default")]
    pub shell: Shell,

    /// Directory inside the guest to run commands in
    #[arg(short, long)]
    pub working_directory: Option<String>,

    /// Space-separated host environment variables to forward
    #[arg(short, long, default_value = "")]
    pub env: String,

    /// Login user inside the guest
    #[arg(long)]
    pub ssh_user: Option<String>,

    /// SSH private key
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// How long to wait for the guest to boot (e.g. 5m)
    #[arg(long, value_parser = parse_duration)]
    pub boot_timeout: Option<Duration>,

    /// How long to wait for the guest to power off (e.g. 2m)
    #[arg(long, value_parser = parse_duration)]
    pub shutdown_timeout: Option<Duration>,
}

/// Parse a human-readable duration such as `30s` or `5m`.
fn parse_duration(s: &str) -> std::result::Result<Duration, humantime::DurationError> {
    humantime::parse_duration(s)
}

impl RunCmd {
    /// Execute the run command.
    pub fn run(self) -> Result<()> {
        let defaults = self.vm.load_config()?;
        let config = self.vm.vm_config(&defaults)?;

        let ssh = SshSettings {
            user: self.ssh_user.clone().unwrap_or(defaults.ssh_user.clone()),
            identity: self.identity.clone().or(defaults.identity.clone()),
            shell: self.shell,
            working_directory: self.working_directory.clone(),
            forward_env: remote::parse_env_names(&self.env)?,
            ..SshSettings::default()
        };

        let timeouts = Timeouts {
            boot: self.boot_timeout.unwrap_or(defaults.timeouts.boot),
            shutdown: self.shutdown_timeout.unwrap_or(defaults.timeouts.shutdown),
            ..defaults.timeouts
        };

        let vm = Vm::new(
            config,
            self.vm.architecture,
            self.vm.operating_system,
            ssh,
            timeouts,
        )?;
        tracing::debug!(command = %vm.command(), "hypervisor command");

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(Error::Io)?;

        runtime.block_on(async move {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("received interrupt");
                    on_signal.cancel();
                }
            });

            vm.run(&self.commands, &cancel).await
        })
    }
}
