//! chat-relay - a line-oriented TCP chat broadcast server

use anyhow::Result;
use chat_relay::config::Config;
use chat_relay::server::ServerListener;
use clap::Parser;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(about = "A TCP chat server that relays every line to all connected clients")]
#[command(version)]
struct Cli {
    /// Port to listen on (overrides the config file)
    port: Option<u16>,

    /// Address to bind (overrides the config file)
    #[arg(long)]
    host: Option<String>,

    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host {
        config.server.host = host;
    }

    tracing::info!(
        "Starting chat-relay on {}:{}",
        config.server.host,
        config.server.port
    );

    let listener = ServerListener::bind(&config.server).await?;

    // No interactive shutdown; the sender is held for the life of the
    // process so the accept loop runs until the process exits.
    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
    listener.run(shutdown_rx).await
}
