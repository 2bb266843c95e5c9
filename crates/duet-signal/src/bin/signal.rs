//! Duet Signal Server
//!
//! WebSocket server that pairs waiting participants and relays their
//! handshake messages.
//!
//! # Usage
//!
//! ```bash
//! # Defaults (port 3001, settings from the platform config dir if present)
//! duet-signal
//!
//! # Explicit config file and port override
//! duet-signal --config /etc/duet/config.toml --port 8080
//! ```

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use duet_core::Config;
use duet_signal::SignalServer;

#[derive(Parser, Debug)]
#[command(name = "duet-signal")]
#[command(about = "Duet signaling server for anonymous one-to-one video chat")]
#[command(version)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "DUET_PORT")]
    port: Option<u16>,

    /// Bind address (overrides the config file)
    #[arg(short, long, env = "DUET_BIND")]
    bind: Option<IpAddr>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print a sample config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::sample());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    if let Some(port) = args.port {
        config.signal.port = port;
    }
    if let Some(bind) = args.bind {
        config.signal.bind = bind;
    }

    let addr = SocketAddr::new(config.signal.bind, config.signal.port);

    info!("Starting Duet Signal Server");
    match config.signal.session_idle_timeout() {
        Some(timeout) => info!("Idle sessions are dropped after {:?}", timeout),
        None => info!("Idle session sweep disabled"),
    }

    let server = SignalServer::new(config.signal);
    server.serve(addr).await?;

    Ok(())
}
