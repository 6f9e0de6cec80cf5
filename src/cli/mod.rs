use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;

use crate::{
    agent::{self, directory::HttpUserDirectory},
    config::Config,
    platform, server,
    utils::logging::{enable_logging, AGENT_PREFIX, SERVER_PREFIX},
};

#[derive(Parser, Debug)]
#[command(name = "Deskwatch", version, long_about = None)]
#[command(about = "Workstation usage tracking: capture agent and reporting server")]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, help = "Enable verbose logging")]
    log: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(about = "Run the capture agent in the current console")]
    Agent {
        #[arg(long, help = "Path to the configuration file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Run the ingestion and reporting server")]
    Serve {
        #[arg(long, help = "Path to the configuration file")]
        config: Option<PathBuf>,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

pub async fn run_cli() -> Result<()> {
    let args = Args::parse();

    let logging_level = if args.log {
        Some(LevelFilter::TRACE)
    } else {
        None
    };

    match args.commands {
        Commands::Agent { config } => {
            let config = load_config(config.as_ref())?.agent;
            enable_logging(
                AGENT_PREFIX,
                PathBuf::from(&config.data_dir).as_path(),
                logging_level,
                args.log,
            )?;
            let client = reqwest::Client::builder()
                .timeout(config.network_timeout())
                .build()?;
            let directory = Arc::new(HttpUserDirectory::new(client, config.server_url.clone()));
            agent::start_agent(
                config,
                platform::activity_probe()?,
                platform::input_hook(),
                directory,
            )
            .await
        }
        Commands::Serve { config } => {
            let config = load_config(config.as_ref())?.server;
            enable_logging(
                SERVER_PREFIX,
                PathBuf::from(&config.data_dir).as_path(),
                logging_level,
                args.log,
            )?;
            server::start_server(config).await
        }
    }
}
