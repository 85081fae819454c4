use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use relay_core::{app, Config};
use std::path::PathBuf;
use tabled::{Table, Tabled};
use tracing::{error, info};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and summarize a configuration
    ValidateConfig(ConfigArgs),
    /// Start the relayer
    Start(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    /// Configuration file (.json or .toml)
    #[arg(short, long, value_name = "FILE", conflicts_with_all = ["config_dir", "config_name"])]
    config: Option<PathBuf>,

    /// Directory searched for the named configuration
    #[arg(long, value_name = "DIR", default_value = ".")]
    config_dir: PathBuf,

    /// Configuration name, without extension
    #[arg(long, value_name = "NAME", default_value = "fullConfig")]
    config_name: String,
}

impl ConfigArgs {
    fn load(&self) -> Result<Config> {
        let config = match &self.config {
            Some(path) => {
                info!("Loading config from {}", path.display());
                Config::load(path)
            }
            None => {
                info!("Loading config {} from {}", self.config_name, self.config_dir.display());
                Config::load_named(&self.config_dir, &self.config_name)
            }
        };
        config.context("Invalid configuration")
    }
}

#[derive(Tabled)]
struct ChainRow {
    id: u8,
    name: String,
    #[tabled(rename = "type")]
    chain_type: String,
    endpoint: String,
    from: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::ValidateConfig(args) => {
            let config = args.load()?;
            let rows = config.chains.iter().map(|chain| ChainRow {
                id: chain.id,
                name: chain.name.clone(),
                chain_type: chain.chain_type.clone(),
                endpoint: chain.endpoint.clone(),
                from: chain.from.clone(),
            });
            println!("Configuration is valid");
            println!("{}", Table::new(rows));
            println!("Poll interval: {}s", config.relayer.poll_interval);
            println!("Max retries: {}", config.relayer.max_retries);
            println!("Retry delay: {}s", config.relayer.retry_delay);
            println!("Block store: {}", config.relayer.blockstore_path.display());
            Ok(())
        }
        Commands::Start(args) => {
            let config = args.load()?;
            info!("Starting relayer for {} chains", config.chains.len());

            if let Err(e) = app::run(config).await {
                error!("Relayer exited: {}", e);
                return Err(e.into());
            }

            Ok(())
        }
    }
}
