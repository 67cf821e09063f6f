//! Standalone server binary.
//!
//! Usage:
//!   cargo run -p rift_server -- [--addr 0.0.0.0:12345] [--tick-hz 100] [--config server.json]
//!
//! The server listens for UDP datagrams, runs the fixed-rate simulation, and
//! streams state updates back to connected clients. Ctrl-C shuts it down
//! cleanly.

use std::env;

use anyhow::Context;
use rift_server::GameServer;
use rift_shared::config::ServerConfig;
use tracing::info;

fn parse_args() -> anyhow::Result<ServerConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = ServerConfig::default();

    // A config file, if given, applies first; flags override it.
    let mut i = 1;
    while i < args.len() {
        if args[i] == "--config" && i + 1 < args.len() {
            let text = std::fs::read_to_string(&args[i + 1])
                .with_context(|| format!("read config {}", args[i + 1]))?;
            cfg = ServerConfig::from_json_str(&text).context("parse config")?;
        }
        i += 1;
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                cfg.bind_addr = args[i + 1].clone();
                i += 2;
            }
            "--tick-hz" if i + 1 < args.len() => {
                cfg.tick_hz = args[i + 1].parse().unwrap_or(cfg.tick_hz);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    info!(addr = %cfg.bind_addr, tick_hz = cfg.tick_hz, "starting server");

    let mut server = GameServer::bind(cfg).await.context("bind server")?;
    info!(local = %server.local_addr(), "server listening");
    server.start();

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("shutdown requested");
    server.stop().await;
    Ok(())
}
