//! # parley
//!
//! Parley binary: `serve` runs the chat hub, `chat` runs a terminal client
//! against one.

#![deny(unsafe_code)]

mod directory;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use parley_client::{ChatClient, ClientConfig, ClientEvent, ConnectionStatus};
use parley_core::{ChannelId, ServerEvent};
use parley_logging::LogFormat;
use parley_server::{ParleyServer, ServerConfig};
use parley_settings::ParleySettings;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::directory::DevDirectory;

/// Parley real-time chat hub.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Parley real-time chat hub")]
struct Cli {
    /// Settings file (defaults to `~/.parley/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the hub.
    Serve(ServeArgs),
    /// Connect as a terminal chat client.
    Chat(ChatArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// JSON file with channels and session tokens.
    #[arg(long)]
    directory: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Hub WebSocket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Session token.
    #[arg(long)]
    token: String,

    /// Channels to join. Lines typed on stdin go to the first one.
    #[arg(long = "channel", required = true, num_args = 1..)]
    channels: Vec<i64>,
}

fn load_settings(path: Option<&Path>) -> Result<ParleySettings> {
    let path = path.map_or_else(parley_settings::settings_path, Path::to_path_buf);
    parley_settings::load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = parley_settings::init_settings(load_settings(cli.settings.as_deref())?);
    let settings = parley_settings::get_settings();
    parley_logging::init_subscriber(
        &settings.logging.level,
        LogFormat::from_json_flag(settings.logging.json),
    );

    match cli.command {
        Command::Serve(args) => serve(settings, args).await,
        Command::Chat(args) => chat(settings, args).await,
    }
}

fn server_config(settings: &ParleySettings, args: &ServeArgs) -> ServerConfig {
    let mut config = ServerConfig::from(&settings.server);
    if let Some(host) = &args.host {
        config.host.clone_from(host);
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    config
}

async fn serve(settings: &ParleySettings, args: ServeArgs) -> Result<()> {
    let config = server_config(settings, &args);
    let directory = match &args.directory {
        Some(path) => DevDirectory::load(path)?,
        None => {
            tracing::warn!("no --directory given, every credential will be rejected");
            DevDirectory::default()
        }
    };
    tracing::info!(
        public_channels = directory.public_channels.len(),
        private_channels = directory.private_channels.len(),
        tokens = directory.tokens.len(),
        "directory loaded"
    );

    let metrics = parley_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = ParleyServer::new(config, directory.into_collaborators()).with_metrics(metrics);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("Parley hub listening on ws://{addr}/ws");

    server.shutdown().wait_for_signal().await;
    tracing::info!("Shutting down...");
    if !server.shutdown_gracefully().await {
        tracing::warn!("some connections did not close in time");
    }
    let _ = handle.await;
    tracing::info!("Shutdown complete");
    Ok(())
}

fn client_config(settings: &ParleySettings, args: &ChatArgs) -> ClientConfig {
    let mut config = ClientConfig::from(&settings.client).with_token(args.token.clone());
    if let Some(url) = &args.url {
        config.url.clone_from(url);
    }
    config
}

async fn chat(settings: &ParleySettings, args: ChatArgs) -> Result<()> {
    let config = client_config(settings, &args);
    let channels: Vec<ChannelId> = args.channels.iter().copied().map(ChannelId::new).collect();
    let Some(&target) = channels.first() else {
        bail!("at least one --channel is required");
    };

    let (client, mut events) = ChatClient::spawn(config);
    for &channel_id in &channels {
        client.subscribe(channel_id)?;
    }
    client.connect()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) if line.trim() == "/quit" => break,
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => client.post(target, line)?,
                    None => break,
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                if let Some(text) = render(&event) {
                    println!("{text}");
                }
                if event == ClientEvent::Status(ConnectionStatus::AuthRequired) {
                    bail!("the hub rejected the token");
                }
            }
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for ctrl-c")?;
                break;
            }
        }
    }

    client.disconnect()?;
    Ok(())
}

/// One terminal line for an event, or `None` for events not worth showing.
fn render(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Status(status) => Some(format!("* {status}")),
        ClientEvent::Closed(info) => Some(format!(
            "* connection closed ({}): {}",
            info.code.map_or_else(|| "no code".to_owned(), |c| c.to_string()),
            info.reason
        )),
        ClientEvent::Recovered { replayed, .. } if *replayed > 0 => {
            Some(format!("* reconnected, sent {replayed} queued message(s)"))
        }
        ClientEvent::Recovered { .. } => None,
        ClientEvent::Server(server) => match server {
            ServerEvent::Message {
                channel_id,
                message,
            } => Some(format!(
                "[#{channel_id}] user {}: {}",
                message.user_id, message.content
            )),
            ServerEvent::Typing {
                channel_id,
                user_id,
            } => Some(format!("[#{channel_id}] user {user_id} is typing")),
            ServerEvent::Subscribed { channel_id } => Some(format!("* joined #{channel_id}")),
            ServerEvent::Error {
                message,
                channel_id: Some(channel_id),
            } => Some(format!("! #{channel_id}: {message}")),
            ServerEvent::Error { message, .. } => Some(format!("! {message}")),
            ServerEvent::Connected { .. } | ServerEvent::Unsubscribed { .. } | ServerEvent::Pong => {
                None
            }
        },
    }
}
