//! Cairn - Container Image to VM Disk
//!
//! CLI entry point that dispatches to subcommands.

use cairn::cli::{Cli, Commands};
use cairn::config::ConfigManager;
use cairn::error::CairnResult;
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> CairnResult<()> {
    let cli = Cli::parse();

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug.
    // Everything goes to stderr; stdout is reserved for the artifact path.
    let filter = match cli.verbose {
        0 => EnvFilter::new("cairn=warn"),
        1 => EnvFilter::new("cairn=info"),
        _ => EnvFilter::new("cairn=debug"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Load configuration
    let config_manager = if let Some(ref path) = cli.config {
        ConfigManager::with_path(path.clone())
    } else {
        ConfigManager::new()
    };
    let config = config_manager.load().await?;

    // Dispatch to command
    match cli.command {
        Commands::Pull(args) => cairn::cli::commands::pull(args, &config).await,
        Commands::Cache(args) => cairn::cli::commands::cache(args, &config).await,
        Commands::Config(args) => cairn::cli::commands::config(args, &config_manager, &config).await,
    }
}
