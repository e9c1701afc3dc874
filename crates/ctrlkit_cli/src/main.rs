//! ctrlkit CLI
//!
//! Runs a `CronTab` controller against an in-memory control plane.
//!
//! # Commands
//!
//! - `run` - Seed the control plane, start the informer and controller,
//!   and print a summary on exit
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use commands::run::RunArgs;
use tracing_subscriber::EnvFilter;

/// Controller runtime demo.
#[derive(Parser)]
#[command(name = "ctrlkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the CronTab controller
    Run(RunArgs),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Run(args) => commands::run::run(args).await?,
        Commands::Version => {
            println!("ctrlkit CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
