//! CLI entry point for the unibox gateway

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use unibox_channels::ChannelManager;
use unibox_core::config::{Config, ConfigLoader};
use unibox_core::events::TopicHub;
use unibox_core::logging::init_logging;
use unibox_gateway::auth::StaticTokenValidator;
use unibox_gateway::{run_server, AppState};
use unibox_jobs::{JobQueue, LexiconAnalyzer, ReconciliationSink, ScheduledMessageDispatcher};

#[derive(Parser)]
#[command(name = "unibox")]
#[command(about = "Unified inbox message delivery and analysis pipeline")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration directory
    #[arg(short, long, global = true)]
    config_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway and background services
    Run,
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Write a default config file
    Init,
}

fn loader_for(cli: &Cli) -> ConfigLoader {
    match &cli.config_dir {
        Some(dir) => ConfigLoader::with_dir(dir),
        None => ConfigLoader::new(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loader = loader_for(&cli);

    match cli.command {
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let config = loader.load()?;
                println!("{}", serde_json::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Init => {
                let config = Config::default();
                loader.save(&config)?;
                println!("Wrote {}", loader.config_dir().join("config.json").display());
                Ok(())
            }
        },
        Commands::Run => run(loader).await,
    }
}

async fn run(loader: ConfigLoader) -> Result<()> {
    let config = loader.load()?;
    let _log_guard = init_logging(&config.logging);
    info!("unibox gateway starting");

    let hub = TopicHub::new();
    let channels = Arc::new(ChannelManager::from_config(&config));
    info!("Channels: {:?}", channels.list_channels());

    let queue = Arc::new(JobQueue::new(
        loader.data_dir().join("jobs.json"),
        config.queue.clone(),
        Arc::new(LexiconAnalyzer::new()),
        hub.clone(),
    ));
    queue.start().await;

    let dispatcher = Arc::new(ScheduledMessageDispatcher::new(
        loader.data_dir().join("schedules.json"),
        config.scheduler.clone(),
        channels.clone(),
        hub.clone(),
    ));
    dispatcher.start().await;

    let sink = Arc::new(ReconciliationSink::new(channels.clone(), hub.clone()));

    let state = AppState {
        queue: queue.clone(),
        dispatcher: dispatcher.clone(),
        sink,
        channels,
        hub,
        auth: Arc::new(StaticTokenValidator::new(
            config.gateway.access_tokens.clone(),
        )),
    };

    // Ctrl-C drives the graceful shutdown of the server and services
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            let _ = signal_tx.send(());
        }
    });

    let result = run_server(state, &config.gateway.host, config.gateway.port, shutdown_rx).await;

    dispatcher.stop().await;
    queue.stop().await;

    if let Err(e) = &result {
        error!("Gateway exited with error: {}", e);
    }
    info!("unibox gateway stopped");
    result
}
