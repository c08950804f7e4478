//! crossvm - ephemeral QEMU virtual machines for running tasks on BSD guests.
//!
//! A [`vm::Vm`] launches QEMU for one guest, waits for its SSH server,
//! runs commands inside it and powers it off again:
//!
//! ```no_run
//! use crossvm::architecture::Architecture;
//! use crossvm::config::{Timeouts, VmConfig};
//! use crossvm::os::OperatingSystem;
//! use crossvm::remote::SshSettings;
//! use crossvm::vm::Vm;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> crossvm::Result<()> {
//! let config = VmConfig::new(
//!     Architecture::X86_64,
//!     "freebsd-14.1-x86-64.img",
//!     "resources.img",
//!     "OVMF.fd",
//! );
//! let vm = Vm::new(
//!     config,
//!     Architecture::X86_64,
//!     OperatingSystem::FreeBsd,
//!     SshSettings::default(),
//!     Timeouts::default(),
//! )?;
//! vm.run(&["uname -a".to_string()], &CancellationToken::new()).await
//! # }
//! ```

pub mod architecture;
pub mod config;
pub mod error;
pub mod os;
pub mod probe;
pub mod process;
pub mod qemu;
pub mod remote;
pub mod shutdown;
pub mod vm;

pub use error::{Error, Result};

/// crossvm version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
