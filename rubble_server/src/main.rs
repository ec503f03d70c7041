//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p rubble_server -- [--addr 127.0.0.1:40000] [--tick-hz 25]
//!                                 [--chunks 64] [--rocks 60] [--width 300]
//!
//! The server listens for client connections, runs the fixed timestep
//! simulation, and streams per-viewport delta frames to onboarded sessions.

use std::env;

use anyhow::Context;
use rubble_server::server::GameServer;
use rubble_shared::config::GameConfig;
use tracing::info;

fn parse_args() -> GameConfig {
    let mut cfg = GameConfig::default();
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.listen_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            "--chunks" if i + 1 < args.len() => {
                cfg.chunk_count = args[i + 1].parse().unwrap_or(cfg.chunk_count);
                i += 2;
            }
            "--rocks" if i + 1 < args.len() => {
                cfg.target_rocks = args[i + 1].parse().unwrap_or(cfg.target_rocks);
                i += 2;
            }
            "--width" if i + 1 < args.len() => {
                cfg.world_width = args[i + 1].parse().unwrap_or(cfg.world_width);
                i += 2;
            }
            _ => i += 1,
        }
    }
    cfg
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args();
    cfg.validate().context("invalid configuration")?;
    info!(
        addr = %cfg.listen_addr,
        tick_hz = cfg.tick_hz,
        chunks = cfg.chunk_count,
        rocks = cfg.target_rocks,
        "Starting server"
    );

    let server = GameServer::bind(cfg).await.context("create server")?;
    let local = server.local_addr()?;
    info!(%local, "Server listening");

    server.run().await
}
