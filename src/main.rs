//! Polywallet - wallet connection orchestrator CLI

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;

use polywallet::cli::commands;
use polywallet::config::Config;
use polywallet::TransportKind;

/// Wallet connection orchestrator
#[derive(Parser)]
#[command(name = "polywallet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a full connect lifecycle against the simulated wallet environment
    Connect {
        /// Transport to use: injected or remote
        #[arg(short, long, default_value = "injected")]
        transport: String,

        /// Skip the disconnect confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check reachability of the configured runtime script sources
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("polywallet=info".parse().unwrap()),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Connect { transport, yes } => {
            let kind: TransportKind = match transport.parse() {
                Ok(kind) => kind,
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(2);
                }
            };
            commands::connect(&config, kind, yes).await
        }
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
