//! Replay host daemon: listens for trusted analysis front ends and
//! serves remote capture-replay sessions.

#![allow(clippy::missing_docs_in_private_items)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use anyhow::Result;
use clap::Parser;
use scry::{DEFAULT_PORT, Registry, Server, ServerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scry-host", version, about = "Replay host for remote GPU capture analysis")]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Trust configuration file (`allow <CIDR>` / `noexec` directives).
    /// Missing file means the default private ranges.
    #[arg(long, default_value = "scry-remote.conf")]
    config: PathBuf,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load(&cli.config);

    // Replay driver backends register here as they are ported; an empty
    // registry still serves enumeration, file transfer and trust
    // filtering, and answers every open with an unsupported status.
    let registry = Registry::new();

    let stop = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&stop))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&stop))?;

    let server = Server::bind(&cli.host, cli.port, config, registry)?;
    info!(addr = %server.local_addr()?, "scry replay host listening");
    server.serve(&stop);
    info!("shut down");
    Ok(())
}
