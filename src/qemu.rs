//! QEMU command line construction.
//!
//! [`build_command`] is a pure function: the same configuration,
//! architecture and guest always produce the same argument vector.

use crate::architecture::Architecture;
use crate::config::VmConfig;
use crate::os::OperatingSystem;
use std::fmt;
use std::path::{Path, PathBuf};

/// Guest port the SSH daemon listens on.
pub const GUEST_SSH_PORT: u16 = 22;

/// Options shared by both disk drives.
const DRIVE_OPTIONS: &str = "cache=writeback,discard=ignore,format=raw";

/// A fully built hypervisor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HypervisorCommand {
    /// Binary to execute.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<String>,
}

impl HypervisorCommand {
    /// Program followed by its arguments, as one vector.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

impl fmt::Display for HypervisorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.argv().join(" "))
    }
}

/// Build the QEMU invocation for a guest.
pub fn build_command(
    config: &VmConfig,
    architecture: Architecture,
    os: OperatingSystem,
) -> HypervisorCommand {
    let cpus = config.cpu_count;
    let nic = os.network_device(architecture);

    let mut args: Vec<String> = vec![
        "-machine".into(),
        format!("type={},accel={}", config.machine_type, config.accelerator),
        "-cpu".into(),
        config.cpu.clone(),
        "-smp".into(),
        format!("cpus={},sockets={}", cpus, cpus),
        "-m".into(),
        config.memory.clone(),
        "-device".into(),
        format!("{},netdev=user.0", nic),
        "-netdev".into(),
        format!(
            "user,id=user.0,hostfwd=tcp::{}-:{}",
            config.ssh_host_port, GUEST_SSH_PORT
        ),
        "-display".into(),
        "none".into(),
        "-monitor".into(),
        "none".into(),
        "-boot".into(),
        "strict=off".into(),
        "-bios".into(),
        config.firmware.display().to_string(),
    ];

    args.extend(disk_args(
        os,
        [
            config.disk_image.as_path(),
            config.resources_disk_image.as_path(),
        ],
    ));

    HypervisorCommand {
        program: config.hypervisor.clone(),
        args,
    }
}

/// Disk flags: the boot disk at index 0, the resources disk at index 1.
fn disk_args(os: OperatingSystem, disks: [&Path; 2]) -> Vec<String> {
    let controllers = os.disk_controllers();
    let mut args = Vec::new();

    if let Some(shared) = controllers.shared {
        args.push("-device".into());
        args.push(shared.into());
    }

    for (index, image) in disks.iter().enumerate() {
        args.push("-device".into());
        args.push(format!(
            "{},drive=drive{},bootindex={}",
            controllers.disk, index, index
        ));
        args.push("-drive".into());
        args.push(format!(
            "if=none,file={},id=drive{},{}",
            image.display(),
            index,
            DRIVE_OPTIONS
        ));
    }

    args
}
