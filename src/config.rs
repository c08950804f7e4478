//! VM and tool configuration.
//!
//! [`VmConfig`] is the immutable description of one hypervisor invocation.
//! [`CrossvmConfig`] holds the user's defaults, read once from an optional
//! TOML file before any VM is created.

use crate::architecture::Architecture;
use crate::error::{Error, Result};
use crate::os::OperatingSystem;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Host port forwarded to the guest's SSH daemon unless overridden.
pub const DEFAULT_SSH_PORT: u16 = 2847;

/// Default number of vCPUs.
pub const DEFAULT_CPU_COUNT: u32 = 2;

/// Default guest memory, in QEMU `-m` syntax.
pub const DEFAULT_MEMORY: &str = "6G";

/// Default user the guest images accept SSH logins for.
pub const DEFAULT_SSH_USER: &str = "runner";

/// Resources disk file name inside a resources directory.
pub const RESOURCES_DISK_FILE: &str = "resources.img";

/// Application name for config file storage.
const APP_NAME: &str = "crossvm";

/// Config file name inside the application config directory.
const CONFIG_FILE: &str = "config.toml";

/// Hardware virtualization backend passed to `-machine accel=`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accelerator {
    /// macOS Hypervisor.framework.
    Hvf,
    /// Linux KVM.
    Kvm,
    /// Pure software emulation.
    Tcg,
}

impl Accelerator {
    /// Pick the fastest accelerator available for running `architecture`
    /// guests on this host.
    pub fn detect(architecture: Architecture) -> Self {
        if !architecture.is_host() {
            return Accelerator::Tcg;
        }

        if cfg!(target_os = "macos") {
            Accelerator::Hvf
        } else if cfg!(target_os = "linux") && Path::new("/dev/kvm").exists() {
            Accelerator::Kvm
        } else {
            Accelerator::Tcg
        }
    }
}

impl fmt::Display for Accelerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Accelerator::Hvf => write!(f, "hvf"),
            Accelerator::Kvm => write!(f, "kvm"),
            Accelerator::Tcg => write!(f, "tcg"),
        }
    }
}

impl FromStr for Accelerator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hvf" => Ok(Accelerator::Hvf),
            "kvm" => Ok(Accelerator::Kvm),
            "tcg" => Ok(Accelerator::Tcg),
            _ => Err(Error::configuration(format!("invalid accelerator: {}", s))),
        }
    }
}

/// Everything needed to build one hypervisor invocation.
///
/// Build it, call [`VmConfig::validate`], then hand it to
/// [`Vm::new`](crate::vm::Vm::new), which validates again and keeps its own
/// copy for the lifetime of the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmConfig {
    /// QEMU system emulator to run.
    pub hypervisor: PathBuf,
    /// Virtualization backend.
    pub accelerator: Accelerator,
    /// `-machine type=` value.
    pub machine_type: String,
    /// `-cpu` model.
    pub cpu: String,
    /// Number of vCPUs (one socket each).
    pub cpu_count: u32,
    /// Guest memory in QEMU `-m` syntax (e.g. `2048`, `6G`).
    pub memory: String,
    /// Host port forwarded to guest port 22.
    pub ssh_host_port: u16,
    /// Boot disk image (raw).
    pub disk_image: PathBuf,
    /// Secondary disk image carrying task resources (raw).
    pub resources_disk_image: PathBuf,
    /// UEFI firmware image.
    pub firmware: PathBuf,
}

impl VmConfig {
    /// Create a configuration with the architecture's defaults.
    pub fn new(
        architecture: Architecture,
        disk_image: impl Into<PathBuf>,
        resources_disk_image: impl Into<PathBuf>,
        firmware: impl Into<PathBuf>,
    ) -> Self {
        Self {
            hypervisor: PathBuf::from(architecture.hypervisor_binary()),
            accelerator: Accelerator::detect(architecture),
            machine_type: architecture.default_machine_type().to_string(),
            cpu: architecture.default_cpu().to_string(),
            cpu_count: DEFAULT_CPU_COUNT,
            memory: DEFAULT_MEMORY.to_string(),
            ssh_host_port: DEFAULT_SSH_PORT,
            disk_image: disk_image.into(),
            resources_disk_image: resources_disk_image.into(),
            firmware: firmware.into(),
        }
    }

    /// Create a configuration using the standard layout of a resources
    /// directory: `<os>-<version>-<arch>.img`, `resources.img` and the
    /// architecture's firmware file.
    pub fn from_resources_dir(
        architecture: Architecture,
        os: OperatingSystem,
        version: &str,
        dir: &Path,
    ) -> Self {
        Self::new(
            architecture,
            dir.join(disk_image_name(os, version, architecture)),
            dir.join(RESOURCES_DISK_FILE),
            dir.join(architecture.firmware_file()),
        )
    }

    /// Check the configuration before anything is launched.
    pub fn validate(&self) -> Result<()> {
        if self.cpu_count == 0 {
            return Err(Error::configuration("cpu count must be at least 1"));
        }
        if self.memory.trim().is_empty() {
            return Err(Error::configuration("memory size cannot be empty"));
        }
        if self.ssh_host_port == 0 {
            return Err(Error::configuration("ssh host port cannot be 0"));
        }

        for (label, path) in [
            ("disk image", &self.disk_image),
            ("resources disk image", &self.resources_disk_image),
            ("firmware", &self.firmware),
        ] {
            if !path.is_file() {
                return Err(Error::configuration(format!(
                    "{} does not exist: {}",
                    label,
                    path.display()
                )));
            }
        }

        Ok(())
    }
}

/// File name of a guest's boot disk image.
pub fn disk_image_name(os: OperatingSystem, version: &str, architecture: Architecture) -> String {
    format!("{}-{}-{}.img", os, version, architecture)
}

/// Timeouts governing the VM lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Maximum time from launch until the guest's SSH server answers.
    #[serde(with = "duration_str")]
    pub boot: Duration,

    /// Delay between connectivity probes.
    #[serde(with = "duration_str")]
    pub poll_interval: Duration,

    /// Upper bound for a single connectivity probe.
    #[serde(with = "duration_str")]
    pub probe_attempt: Duration,

    /// Time the guest gets to power off before the hypervisor is killed.
    #[serde(with = "duration_str")]
    pub shutdown: Duration,

    /// How long the hypervisor must stay up after spawn to count as launched.
    #[serde(with = "duration_str")]
    pub startup_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            boot: Duration::from_secs(300),
            poll_interval: Duration::from_secs(1),
            probe_attempt: Duration::from_secs(5),
            shutdown: Duration::from_secs(120),
            startup_grace: Duration::from_millis(500),
        }
    }
}

/// User defaults loaded from `config.toml`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossvmConfig {
    /// Default number of vCPUs.
    pub cpu_count: u32,

    /// Default guest memory.
    pub memory: String,

    /// Default forwarded SSH port.
    pub ssh_port: u16,

    /// Login user inside the guest.
    pub ssh_user: String,

    /// Private key used to log into the guest.
    pub identity: Option<PathBuf>,

    /// Directory holding disk images and firmware.
    pub resources_dir: Option<PathBuf>,

    /// Lifecycle timeouts.
    pub timeouts: Timeouts,
}

impl Default for CrossvmConfig {
    fn default() -> Self {
        Self {
            cpu_count: DEFAULT_CPU_COUNT,
            memory: DEFAULT_MEMORY.to_string(),
            ssh_port: DEFAULT_SSH_PORT,
            ssh_user: DEFAULT_SSH_USER.to_string(),
            identity: None,
            resources_dir: None,
            timeouts: Timeouts::default(),
        }
    }
}

impl CrossvmConfig {
    /// Default location of the config file, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Load configuration from the default location.
    ///
    /// If the configuration file doesn't exist, returns the default configuration.
    pub fn load() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("{}: {}", path.display(), e)))
    }
}

/// Serde adapter storing durations as human-readable strings (`"90s"`, `"5m"`).
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
