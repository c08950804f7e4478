//! Command command: print the hypervisor invocation without running it.

use clap::Args;
use crossvm::qemu;
use crossvm::{Error, Result};

use super::args::VmArgs;

/// Print the QEMU command line for a VM.
#[derive(Args, Debug)]
pub struct CommandCmd {
    #[command(flatten)]
    pub vm: VmArgs,

    /// Print as a JSON array
    #[arg(long)]
    pub json: bool,
}

impl CommandCmd {
    /// Execute the command command.
    pub fn run(self) -> Result<()> {
        let defaults = self.vm.load_config()?;
        let config = self.vm.vm_config(&defaults)?;
        let command = qemu::build_command(&config, self.vm.architecture, self.vm.operating_system);

        if self.json {
            let json = serde_json::to_string_pretty(&command.argv())
                .map_err(|e| Error::configuration(e.to_string()))?;
            println!("{}", json);
        } else {
            for token in command.argv() {
                println!("{}", token);
            }
        }
        Ok(())
    }
}
