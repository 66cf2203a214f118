//! # Tickbridge Server
//!
//! Market-data bridge between a charting application's on-disk tick archive
//! and streaming consumers on the private mesh.
//!
//! ## Overview
//!
//! The bridge provides:
//!
//! - **Delta streaming**: per-symbol WebSocket streams carrying an initial
//!   snapshot followed by sequenced field-level deltas
//! - **Historical access**: a path-restricted, read-only HTTP API over the
//!   archive for backfill and probes
//! - **Symbol registry**: role-based contract selection with scheduled
//!   rollover and hot reload
//! - **Health reporting**: watcher, archive, and subscription state in one
//!   structured endpoint
//!
//! ## Architecture
//!
//! The server is built on Axum and wires the `tickbridge-core` actors
//! together: archive watcher -> snapshot extractor -> delta engine ->
//! subscription hub, with the HTTP surface on the side.

/// Composition root and server lifecycle
pub mod bootstrap;

/// Control subcommands that talk to a running bridge
pub mod control;

/// Historical/control HTTP handlers
pub mod http;

/// Route organization
pub mod routes;

/// Shared handler state
pub mod state;

/// WebSocket streaming
pub mod websocket;


use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

/// Command line interface for the Tickbridge bridge server
#[derive(Parser, Debug)]
#[command(name = "tickbridge-server")]
#[command(about = "Market-data bridge server with delta streaming and archive access")]
struct Args {
    /// Path to the bridge config file (TOML)
    #[arg(short, long, env = "CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long, env = "BRIDGE_LISTEN")]
    listen: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the bridge
    Start,
    /// Ask a running bridge to reload its symbol configuration
    Reload,
    /// Print a running bridge's status
    Status,
    /// Probe a running bridge's health; exit 0 when healthy
    HealthCheck,
}

fn init_tracing() {
    // LOG_LEVEL is the documented knob; RUST_LOG still wins when set.
    let spec = std::env::var("RUST_LOG")
        .or_else(|_| std::env::var("LOG_LEVEL"))
        .unwrap_or_default();
    let filter = if spec.is_empty() {
        EnvFilter::new("info")
    } else {
        EnvFilter::try_new(spec).unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing();

    let code = match args.command {
        Command::Start => bootstrap::start(args.config.as_deref(), args.listen.as_deref()).await,
        Command::Reload => control::reload(args.config.as_deref(), args.listen.as_deref()).await,
        Command::Status => control::status(args.config.as_deref(), args.listen.as_deref()).await,
        Command::HealthCheck => {
            control::health_check(args.config.as_deref(), args.listen.as_deref()).await
        }
    };
    ExitCode::from(code)
}
