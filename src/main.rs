//! Edge Agent - Main Entry Point

use edge_agent::config::AgentConfig;
use edge_agent::observability::init_default_logging;
use edge_agent::protocol::MessageReceived;
use edge_agent::{EdgeAgent, MqttTransport};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tokio::signal;
use tracing::{error, info, warn};

/// Edge-to-cloud telemetry agent
#[derive(Parser)]
#[command(name = "edge-agent")]
#[command(about = "Edge-to-cloud telemetry agent for SCADA brokers")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "EDGE_AGENT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and run until interrupted
    Run,
    /// Validate the configuration file
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting edge agent v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_agent(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<AgentConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(AgentConfig::load_from_file(path)?)
        }
        None => {
            // Try default locations
            for path_str in ["agent.toml", "config/agent.toml"] {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(AgentConfig::load_from_file(&path)?);
                }
            }
            Err("No configuration file found. Provide one with -c/--config or create agent.toml".into())
        }
    }
}

async fn run_agent(config: AgentConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(node_id = %config.agent.node_id, "Application starting");

    let agent = EdgeAgent::new(config, MqttTransport::new()).await?;
    agent.set_on_connect(|| info!("Connected to broker"));
    agent.set_on_disconnect(|| warn!("Disconnected from broker"));
    agent.set_on_message(|message| match message {
        MessageReceived::WriteValue(write) => {
            info!(devices = write.device_list.len(), "Write value request received");
        }
        MessageReceived::TimeSync(sync) => {
            info!(utc_time = %sync.utc_time, "Time sync received");
        }
        MessageReceived::ConfigAck(ack) => {
            info!(accepted = ack.result, "Config acknowledgement received");
        }
    });

    agent.connect().await?;

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Agent is running, waiting for shutdown signal");
    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    info!("Application shutdown initiated");
    agent.disconnect().await;
    Ok(())
}

fn handle_config_command(config: AgentConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
