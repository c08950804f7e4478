//! crossvm CLI entry point.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cli;

/// crossvm - ephemeral QEMU virtual machines for BSD guests
#[derive(Parser, Debug)]
#[command(name = "crossvm")]
#[command(about = "Run commands inside ephemeral BSD virtual machines")]
#[command(version)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Boot a VM, run commands inside it and shut it down.
    Run(cli::run::RunCmd),

    /// Print the hypervisor command line for a VM.
    Command(cli::command::CommandCmd),
}

fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    tracing::debug!(version = crossvm::VERSION, "starting crossvm");

    let result = match cli.command {
        Commands::Run(cmd) => cmd.run(),
        Commands::Command(cmd) => cmd.run(),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` takes precedence over `--verbose`. Set `CROSSVM_LOG_FORMAT=json`
/// for machine-readable output.
fn init_logging(verbose: bool) {
    let default = if verbose { "crossvm=debug" } else { "crossvm=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let json = std::env::var("CROSSVM_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}
