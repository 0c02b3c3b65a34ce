use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use actiongate::config::Config;

/// `ActionGate` - confirmation-gated execution of AI-proposed HTTP actions.
#[derive(Parser, Debug)]
#[command(name = "actiongate")]
#[command(version)]
#[command(about = "Execute schema-described HTTP actions behind a human confirm step.", long_about = None)]
struct Cli {
    /// Path to config.toml (default: platform config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the confirmation gateway
    Serve {
        /// Bind host (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Bind port (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Validate the config file and print the resolved settings
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.gateway.host.clone());
            let port = port.unwrap_or(config.gateway.port);
            info!("starting actiongate gateway on {host}:{port}");
            actiongate::gateway::run_gateway(&host, port, config).await
        }
        Commands::CheckConfig => {
            let rendered = toml::to_string_pretty(&config)?;
            println!("{rendered}");
            Ok(())
        }
    }
}
