//! drydock-reaper - the cleanup daemon entry point.
//!
//! Runs inside the reaper companion container with the host's Docker
//! socket mounted. Clients register label filters over TCP; when a
//! client's connection closes, everything its filters match is removed.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use drydock::DockerEngine;
use drydock::reaper::ReaperDaemon;

#[derive(Parser, Debug)]
#[command(name = "drydock-reaper", about = "Session cleanup daemon for drydock")]
struct Cli {
    /// Port to listen on.
    #[arg(long, env = "DRYDOCK_REAPER_PORT", default_value_t = 8080)]
    port: u16,

    /// Seconds to wait for a (re)connection before exiting.
    #[arg(long, env = "DRYDOCK_REAPER_RECONNECT_TIMEOUT_SECS", default_value_t = 10)]
    reconnection_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let engine = DockerEngine::connect().await?;
    let listener = TcpListener::bind(("0.0.0.0", cli.port)).await?;
    tracing::info!(port = cli.port, "Reaper listening");

    let daemon = ReaperDaemon::new(
        Arc::new(engine),
        Duration::from_secs(cli.reconnection_timeout_secs),
    );
    daemon.run(listener).await?;

    Ok(())
}
