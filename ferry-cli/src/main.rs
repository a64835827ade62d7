//! Ferry CLI - Command-line interface
//!
//! Runs directory services and storage nodes, and fetches or pushes files.

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use ferry_core::FerryError;
use ferry_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "ferry")]
#[command(about = "Peer-to-peer file location and transfer")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: commands::Commands,

    /// Console log level
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    /// Directory for the full trace log of this run
    #[arg(long, global = true)]
    logs_dir: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref()) {
        eprintln!("Warning: {e}");
    }

    match commands::handle_command(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!("Command failed: {:?}", e);
            match e.downcast_ref::<FerryError>() {
                Some(ferry_error) if ferry_error.is_user_error() => {
                    eprintln!("Error: {}", ferry_error.user_message());
                }
                _ => eprintln!("Error: {e:#}"),
            }
            ExitCode::FAILURE
        }
    }
}
