//! Guest operating system variants.
//!
//! The differences between guests are captured as plain lookup tables:
//! which storage controller the disks hang off, which NIC model the guest
//! has drivers for, and how to power the guest off.

use crate::architecture::Architecture;
use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// NIC model used unless a guest needs something architecture-specific.
pub const DEFAULT_NETWORK_DEVICE: &str = "virtio-net";

/// Guest operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    FreeBsd,
    NetBsd,
    OpenBsd,
}

/// Storage controller layout for the two guest disks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskControllers {
    /// Controller shared by both disks, added once before them.
    pub shared: Option<&'static str>,
    /// Per-disk device model.
    pub disk: &'static str,
}

impl OperatingSystem {
    /// All supported guests.
    pub const ALL: [OperatingSystem; 3] = [
        OperatingSystem::FreeBsd,
        OperatingSystem::NetBsd,
        OperatingSystem::OpenBsd,
    ];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            OperatingSystem::FreeBsd => "freebsd",
            OperatingSystem::NetBsd => "netbsd",
            OperatingSystem::OpenBsd => "openbsd",
        }
    }

    /// Disk controller devices for this guest.
    pub fn disk_controllers(self) -> DiskControllers {
        match self {
            OperatingSystem::FreeBsd => DiskControllers {
                shared: None,
                disk: "virtio-blk-pci",
            },
            OperatingSystem::NetBsd | OperatingSystem::OpenBsd => DiskControllers {
                shared: Some("virtio-scsi-pci"),
                disk: "scsi-hd",
            },
        }
    }

    /// NIC model for this guest on the given architecture.
    pub fn network_device(self, architecture: Architecture) -> &'static str {
        match self {
            OperatingSystem::OpenBsd => architecture.network_device(),
            OperatingSystem::FreeBsd | OperatingSystem::NetBsd => DEFAULT_NETWORK_DEVICE,
        }
    }

    /// Command run inside the guest to power it off.
    pub fn shutdown_command(self) -> &'static str {
        match self {
            OperatingSystem::FreeBsd => "sudo shutdown -p now",
            OperatingSystem::NetBsd | OperatingSystem::OpenBsd => "sudo shutdown -h -p now",
        }
    }
}

impl fmt::Display for OperatingSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperatingSystem {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "freebsd" => Ok(OperatingSystem::FreeBsd),
            "netbsd" => Ok(OperatingSystem::NetBsd),
            "openbsd" => Ok(OperatingSystem::OpenBsd),
            _ => Err(Error::configuration(format!(
                "invalid operating system: {}",
                s
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operating_system() {
        assert_eq!(
            "FreeBSD".parse::<OperatingSystem>().unwrap(),
            OperatingSystem::FreeBsd
        );
        assert_eq!(
            "netbsd".parse::<OperatingSystem>().unwrap(),
            OperatingSystem::NetBsd
        );
        assert_eq!(
            " openbsd ".parse::<OperatingSystem>().unwrap(),
            OperatingSystem::OpenBsd
        );
        assert!("haiku".parse::<OperatingSystem>().is_err());
    }

    #[test]
    fn test_network_device() {
        for arch in Architecture::ALL {
            assert_eq!(OperatingSystem::FreeBsd.network_device(arch), "virtio-net");
            assert_eq!(OperatingSystem::NetBsd.network_device(arch), "virtio-net");
            assert_eq!(
                OperatingSystem::OpenBsd.network_device(arch),
                arch.network_device()
            );
        }
    }

    #[test]
    fn test_shutdown_command() {
        assert_eq!(
            OperatingSystem::FreeBsd.shutdown_command(),
            "sudo shutdown -p now"
        );
        assert_eq!(
            OperatingSystem::NetBsd.shutdown_command(),
            "sudo shutdown -h -p now"
        );
        assert_eq!(
            OperatingSystem::OpenBsd.shutdown_command(),
            "sudo shutdown -h -p now"
        );
    }

    #[test]
    fn test_disk_controllers() {
        let freebsd = OperatingSystem::FreeBsd.disk_controllers();
        assert_eq!(freebsd.shared, None);
        assert_eq!(freebsd.disk, "virtio-blk-pci");

        for os in [OperatingSystem::NetBsd, OperatingSystem::OpenBsd] {
            let controllers = os.disk_controllers();
            assert_eq!(controllers.shared, Some("virtio-scsi-pci"));
            assert_eq!(controllers.disk, "scsi-hd");
        }
    }
}
