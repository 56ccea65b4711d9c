//! we3graph server: hosts the shared command log over WebSocket.
//!
//! Configured from the environment (`WE3GRAPH_BIND_ADDR`,
//! `WE3GRAPH_STORAGE_PATH`, `WE3GRAPH_PAGE_SIZE`); a first argument
//! overrides the bind address. Logging follows `RUST_LOG`, default `info`.

use log::info;
use we3graph_sync::{ServerConfig, SyncServer};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = ServerConfig::from_env();
    if let Some(addr) = std::env::args().nth(1) {
        config.bind_addr = addr;
    }
    match &config.storage_path {
        Some(path) => info!("Starting we3graph server, log at {}", path.display()),
        None => info!("Starting we3graph server with an in-memory log"),
    }

    let server = SyncServer::new(config)?;
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            let stats = server.stats();
            info!(
                "Shutting down after {} connections, {} requests, {} commands ({} compacted)",
                stats.connections, stats.requests, stats.commands_appended, stats.commands_compacted
            );
        }
    }
    Ok(())
}
