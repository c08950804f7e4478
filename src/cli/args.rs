//! Arguments shared by every command that describes a VM.

use clap::Args;
use crossvm::architecture::Architecture;
use crossvm::config::{Accelerator, CrossvmConfig, VmConfig, RESOURCES_DISK_FILE};
use crossvm::os::OperatingSystem;
use crossvm::Error;
use std::path::PathBuf;

/// Guest and hardware selection.
#[derive(Args, Debug)]
pub struct VmArgs {
    /// Guest operating system (freebsd, netbsd, openbsd)
    #[arg(short = 'o', long)]
    pub operating_system: OperatingSystem,

    /// Guest operating system version, used to locate the disk image
    #[arg(long)]
    pub os_version: Option<String>,

    /// Guest architecture (x86-64, arm64)
    #[arg(short, long, default_value = "x86-64")]
    pub architecture: Architecture,

    /// Directory containing disk images and firmware
    #[arg(long)]
    pub resources_dir: Option<PathBuf>,

    /// Boot disk image (overrides the resources directory layout)
    #[arg(long)]
    pub disk_image: Option<PathBuf>,

    /// Resources disk image
    #[arg(long)]
    pub resources_disk: Option<PathBuf>,

    /// UEFI firmware image
    #[arg(long)]
    pub firmware: Option<PathBuf>,

    /// QEMU binary
    #[arg(long)]
    pub hypervisor: Option<PathBuf>,

    /// Accelerator (hvf, kvm, tcg); detected when omitted
    #[arg(long)]
    pub accelerator: Option<Accelerator>,

    /// QEMU machine type
    #[arg(long)]
    pub machine_type: Option<String>,

    /// QEMU CPU model
    #[arg(long)]
    pub cpu: Option<String>,

    /// Number of vCPUs
    #[arg(long)]
    pub cpu_count: Option<u32>,

    /// Guest memory (QEMU syntax, e.g. 4G)
    #[arg(short, long)]
    pub memory: Option<String>,

    /// Host port forwarded to the guest's SSH server
    #[arg(long)]
    pub ssh_port: Option<u16>,

    /// Config file (defaults to the user config directory)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl VmArgs {
    /// Load the config file named on the command line, or the default one.
    pub fn load_config(&self) -> crossvm::Result<CrossvmConfig> {
        match &self.config {
            Some(path) => CrossvmConfig::load_from(path),
            None => CrossvmConfig::load(),
        }
    }

    /// Resolve the VM configuration, with command-line values taking
    /// precedence over the config file.
    pub fn vm_config(&self, defaults: &CrossvmConfig) -> crossvm::Result<VmConfig> {
        let arch = self.architecture;
        let resources_dir = self
            .resources_dir
            .as_ref()
            .or(defaults.resources_dir.as_ref());

        let mut config = match (resources_dir, &self.os_version) {
            (Some(dir), Some(version)) => {
                VmConfig::from_resources_dir(arch, self.operating_system, version, dir)
            }
            (Some(dir), None) => {
                let disk = self.disk_image.clone().ok_or_else(|| {
                    Error::configuration("--disk-image or --os-version is required")
                })?;
                VmConfig::new(
                    arch,
                    disk,
                    dir.join(RESOURCES_DISK_FILE),
                    dir.join(arch.firmware_file()),
                )
            }
            (None, _) => {
                let missing = |flag: &str| {
                    Error::configuration(format!("{} or --resources-dir is required", flag))
                };
                VmConfig::new(
                    arch,
                    self.disk_image.clone().ok_or_else(|| missing("--disk-image"))?,
                    self.resources_disk
                        .clone()
                        .ok_or_else(|| missing("--resources-disk"))?,
                    self.firmware.clone().ok_or_else(|| missing("--firmware"))?,
                )
            }
        };

        if let Some(disk) = &self.disk_image {
            config.disk_image = disk.clone();
        }
        if let Some(disk) = &self.resources_disk {
            config.resources_disk_image = disk.clone();
        }
        if let Some(firmware) = &self.firmware {
            config.firmware = firmware.clone();
        }
        if let Some(hypervisor) = &self.hypervisor {
            config.hypervisor = hypervisor.clone();
        }
        if let Some(accelerator) = self.accelerator {
            config.accelerator = accelerator;
        }
        if let Some(machine_type) = &self.machine_type {
            config.machine_type = machine_type.clone();
        }
        if let Some(cpu) = &self.cpu {
            config.cpu = cpu.clone();
        }
        config.cpu_count = self.cpu_count.unwrap_or(defaults.cpu_count);
        config.memory = self
            .memory
            .clone()
            .unwrap_or_else(|| defaults.memory.clone());
        config.ssh_host_port = self.ssh_port.unwrap_or(defaults.ssh_port);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        vm: VmArgs,
    }

    fn parse(args: &[&str]) -> VmArgs {
        TestCli::try_parse_from(std::iter::once("crossvm").chain(args.iter().copied()))
            .unwrap()
            .vm
    }

    #[test]
    fn test_resources_dir_layout() {
        let args = parse(&[
            "--operating-system",
            "netbsd",
            "--os-version",
            "10.0",
            "--resources-dir",
            "/srv/vm",
            "--cpu-count",
            "4",
        ]);
        let config = args.vm_config(&CrossvmConfig::default()).unwrap();

        assert_eq!(config.disk_image, PathBuf::from("/srv/vm/netbsd-10.0-x86-64.img"));
        assert_eq!(config.resources_disk_image, PathBuf::from("/srv/vm/resources.img"));
        assert_eq!(config.firmware, PathBuf::from("/srv/vm/OVMF.fd"));
        assert_eq!(config.cpu_count, 4);
        assert_eq!(config.memory, "6G");
    }

    #[test]
    fn test_explicit_paths_and_overrides() {
        let args = parse(&[
            "-o",
            "freebsd",
            "--disk-image",
            "/tmp/disk.img",
            "--resources-disk",
            "/tmp/res.img",
            "--firmware",
            "/fw/OVMF.fd",
            "--accelerator",
            "kvm",
            "--machine-type",
            "q35",
            "--cpu",
            "host",
            "--memory",
            "2048",
            "--ssh-port",
            "3000",
        ]);
        let defaults = CrossvmConfig {
            cpu_count: 8,
            ..CrossvmConfig::default()
        };
        let config = args.vm_config(&defaults).unwrap();

        assert_eq!(config.disk_image, PathBuf::from("/tmp/disk.img"));
        assert_eq!(config.accelerator, Accelerator::Kvm);
        assert_eq!(config.cpu, "host");
        assert_eq!(config.cpu_count, 8);
        assert_eq!(config.memory, "2048");
        assert_eq!(config.ssh_host_port, 3000);
    }

    #[test]
    fn test_missing_disk_image() {
        let args = parse(&["-o", "openbsd", "--firmware", "/fw/OVMF.fd"]);
        assert!(matches!(
            args.vm_config(&CrossvmConfig::default()),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_operating_system_rejected() {
        let result = TestCli::try_parse_from(["crossvm", "-o", "plan9"]);
        assert!(result.is_err());
    }
}
