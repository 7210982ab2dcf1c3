mod server;

use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;

use roomcast_api::SignalingClient;
use roomcast_core::{bootstrap::load_config, logging, models::RoomId, Config};

use server::RoomcastServer;

#[derive(Debug, Parser)]
#[command(name = "roomcast", version, about = "Multi-party media signaling server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the signaling server
    Serve {
        /// Config file (defaults to ROOMCAST_CONFIG_PATH, then ./config.yaml)
        #[arg(short, long)]
        config: Option<String>,
    },
    /// Join a room on a running server and print what it offers
    Probe {
        #[arg(long, env = "ROOMCAST_URL", default_value = "ws://127.0.0.1:3001/ws")]
        url: String,
        #[arg(long)]
        room: String,
        /// Per-request timeout; defaults to `signaling.request_timeout_ms`
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Config file to read the default timeout from
        #[arg(short, long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    match Cli::parse().command {
        Command::Serve { config } => serve(config.as_deref()).await,
        Command::Probe {
            url,
            room,
            timeout_ms,
            config,
        } => {
            let timeout = match timeout_ms {
                Some(ms) => Duration::from_millis(ms),
                None => probe_timeout(&load_config(config.as_deref())?),
            };
            probe(&url, &room, timeout).await
        }
    }
}

async fn serve(config_path: Option<&str>) -> Result<()> {
    let config = load_config(config_path)?;

    // Keep the guard alive so the file writer flushes on exit
    let _log_guard = logging::init_logging(&config.logging)?;
    info!("Roomcast server starting...");
    info!("HTTP address: {}", config.http_address());

    RoomcastServer::new(config).start().await
}

fn probe_timeout(config: &Config) -> Duration {
    config.signaling.request_timeout()
}

async fn probe(url: &str, room: &str, timeout: Duration) -> Result<()> {
    let room_id = RoomId::from(room);
    let client = SignalingClient::connect_with_timeout(url, timeout).await?;
    let joined = client.join(&room_id).await?;
    let capabilities = client.get_capabilities().await?;

    let report = serde_json::json!({
        "clientId": client.client_id(),
        "roomId": joined.room_id,
        "producers": joined.producers,
        "rtpCapabilities": capabilities,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    client.exit(&room_id)?;
    client.close().await;
    Ok(())
}
