//! wgkeep binary entrypoint.

use std::io;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wgkeep::WgManager;
use wgkeep_cli::cli::{Cli, Commands};
use wgkeep_cli::commands::{InterfaceCommand, PeerCommand, StatsCommand};
use wgkeep_cli::error::EXIT_FAILURE;
use wgkeep_cli::output::OutputFormat;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<(), wgkeep_cli::CliError> {
    let format = OutputFormat::new(cli.format);
    let manager = WgManager::from_config(&cli.manager_config());
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Interface { command } => {
            let cmd = InterfaceCommand::new(&manager);
            cmd.execute(&mut stdout, &format, command).await?;
        }
        Commands::Peer { command } => {
            let cmd = PeerCommand::new(&manager);
            cmd.execute(&mut stdout, &format, command).await?;
        }
        Commands::Stats { command } => {
            let cmd = StatsCommand::new(&manager);
            cmd.execute(&mut stdout, &format, command).await?;
        }
    }

    Ok(())
}
