use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use riftnode::{logging, Config, Node};

/// RIFT fabric node
#[derive(Parser, Debug)]
#[command(name = "riftnode", version, about)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", env = "RIFTNODE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory
    #[arg(short, long, value_name = "DIR", env = "RIFTNODE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Create a new configuration and exit
    #[arg(long)]
    init: bool,

    /// Log level or filter directives, overriding the configuration
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.init {
        let config = Config::create_default(args.config, args.data_dir)?;
        println!("Created configuration at {}", config.config_path().display());
        println!("System ID: {}", config.node.system_id);
        return Ok(());
    }

    let mut config = Config::load(args.config, args.data_dir)?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    logging::init(&config.logging)?;

    info!("Loaded configuration from {}", config.config_path().display());

    let mut node = Node::new(config).await?;
    node.run().await
}
