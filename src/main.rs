//! CLI for ssehub
//!
//! Subcommands:
//! - `server`: run the hub behind its HTTP event-stream server
//! - `listen`: follow a stream with the reconnecting client and print records
//! - `publish`: publish one record through a running server

use std::sync::Arc;

use clap::Parser;
use ssehub::broker::{Hub, QueryChannelResolver};
use ssehub::client::{ChannelConsumer, ClientEvent, Session};
use ssehub::config::{Settings, load_config};
use ssehub::transport::{PublishRequest, PublishResponse, StreamSettings, serve};
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "ssehub")]
enum Command {
    /// Start the SSE server
    Server,
    /// Follow an event stream, reconnecting as needed
    Listen {
        /// Stream URL including channels (default: client.endpoint from config)
        #[arg(long)]
        url: Option<String>,
        /// Resume after this id
        #[arg(long)]
        last_event_id: Option<u64>,
    },
    /// Publish one record
    Publish {
        /// Base URL of the server
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
        /// Target channel, repeatable
        #[arg(long = "channel", required = true)]
        channels: Vec<String>,
        /// Event type tag
        #[arg(long = "type", default_value = "")]
        event_type: String,
        payload: String,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            ssehub::utils::logging::init("info");
            error!("Invalid configuration: {}", e);
            return;
        }
    };
    ssehub::utils::logging::init(&config.log.level);

    let result = match cmd {
        Command::Server => run_server(config).await,
        Command::Listen { url, last_event_id } => run_listen(config, url, last_event_id).await,
        Command::Publish {
            url,
            channels,
            event_type,
            payload,
        } => run_publish(&url, channels, event_type, payload).await,
    };
    if let Err(e) = result {
        error!("Command failed: {}", e);
    }
}

async fn run_server(config: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let addr = config.bind_address();
    let hub = Arc::new(Hub::with_resolver(
        config.hub.to_hub_config(),
        QueryChannelResolver::allow(config.hub.allowed_channels.clone()),
    ));
    let settings = StreamSettings {
        heartbeat: config.server.heartbeat(),
        allowed_origins: config.server.allowed_origins.clone(),
    };

    tokio::select! {
        result = serve(&addr, hub, settings) => {
            result?;
            error!("SSE server exited unexpectedly.");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received. Exiting gracefully.");
        }
    }

    Ok(())
}

async fn run_listen(
    config: Settings,
    url: Option<String>,
    last_event_id: Option<u64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = config.client.to_client_config();
    if let Some(url) = url {
        client.endpoint = url;
    }
    if let Some(id) = last_event_id {
        client = client.last_event_id(id);
    }

    let (consumer, mut events) = ChannelConsumer::new();
    let session = Session::http(client, consumer)?;
    session.connect()?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ClientEvent::Opened) => info!("Stream open."),
                Some(ClientEvent::Message(message)) => {
                    if message.event_type.is_empty() {
                        println!("[{}] {}", message.id, message.payload_lossy());
                    } else {
                        println!("[{}] {}: {}", message.id, message.event_type, message.payload_lossy());
                    }
                }
                Some(ClientEvent::DataLoss(gap)) => {
                    warn!("{} records were lost before id {:?}", gap.missed(), gap.oldest);
                }
                Some(ClientEvent::Terminated(e)) => {
                    info!("Session ended: {}", e);
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received. Exiting gracefully.");
                session.close();
            }
        }
    }

    Ok(())
}

async fn run_publish(
    url: &str,
    channels: Vec<String>,
    event_type: String,
    payload: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = reqwest::Client::new()
        .post(format!("{}/publish", url.trim_end_matches('/')))
        .json(&PublishRequest {
            channels,
            event_type,
            payload,
        })
        .send()
        .await?
        .error_for_status()?;
    let published: PublishResponse = response.json().await?;
    println!("{}", published.id);
    Ok(())
}
