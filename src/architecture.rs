//! Guest CPU architectures.
//!
//! Each architecture maps to a fixed set of traits used when building the
//! hypervisor command line. All lookups are infallible; unknown names are
//! rejected when parsing.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// CPU architecture of the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Architecture {
    #[default]
    X86_64,
    Arm64,
}

impl Architecture {
    /// All supported architectures.
    pub const ALL: [Architecture; 2] = [Architecture::X86_64, Architecture::Arm64];

    /// Canonical name, as used in disk image file names.
    pub fn name(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86-64",
            Architecture::Arm64 => "arm64",
        }
    }

    /// QEMU network device model for guests that need an
    /// architecture-specific NIC.
    pub fn network_device(self) -> &'static str {
        match self {
            Architecture::X86_64 => "e1000",
            Architecture::Arm64 => "virtio-net",
        }
    }

    /// Name of the QEMU system emulator for this architecture.
    pub fn hypervisor_binary(self) -> &'static str {
        match self {
            Architecture::X86_64 => "qemu-system-x86_64",
            Architecture::Arm64 => "qemu-system-aarch64",
        }
    }

    /// Default `-machine type=` value.
    pub fn default_machine_type(self) -> &'static str {
        match self {
            Architecture::X86_64 => "q35",
            Architecture::Arm64 => "virt",
        }
    }

    /// Default `-cpu` model.
    pub fn default_cpu(self) -> &'static str {
        match self {
            Architecture::X86_64 => "max",
            Architecture::Arm64 => "cortex-a57",
        }
    }

    /// File name of the UEFI firmware inside the resources directory.
    pub fn firmware_file(self) -> &'static str {
        match self {
            Architecture::X86_64 => "OVMF.fd",
            Architecture::Arm64 => "QEMU_EFI.fd",
        }
    }

    /// Whether this architecture matches the host CPU.
    pub fn is_host(self) -> bool {
        match self {
            Architecture::X86_64 => std::env::consts::ARCH == "x86_64",
            Architecture::Arm64 => std::env::consts::ARCH == "aarch64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "x86-64" | "x86_64" | "amd64" => Ok(Architecture::X86_64),
            "arm64" | "aarch64" => Ok(Architecture::Arm64),
            _ => Err(Error::configuration(format!("invalid architecture: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_architecture() {
        let cases = [
            ("x86-64", Architecture::X86_64),
            ("x86_64", Architecture::X86_64),
            ("AMD64", Architecture::X86_64),
            ("", Architecture::X86_64),
            ("arm64", Architecture::Arm64),
            ("aarch64", Architecture::Arm64),
        ];
        for (input, expected) in cases {
            assert_eq!(input.parse::<Architecture>().unwrap(), expected, "{}", input);
        }

        assert!(matches!(
            "mips".parse::<Architecture>(),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_default_is_x86_64() {
        assert_eq!(Architecture::default(), Architecture::X86_64);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for arch in Architecture::ALL {
            assert_eq!(arch.to_string().parse::<Architecture>().unwrap(), arch);
        }
    }
}
