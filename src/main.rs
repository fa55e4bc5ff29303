//! RAX Cloud Server - Entry Point
//!
//! Serves a sandboxed storage root over an HTTP file API with trash,
//! restore and zip downloads.

use log::{error, info};
use std::process;

use rax_cloud_server::Server;
use rax_cloud_server::config::ServerConfig;

#[tokio::main]
async fn main() {
    // RUST_LOG overrides the default filter
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match ServerConfig::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    info!("Launching cloud storage server...");

    let server = match Server::new(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = server.start().await {
        error!("Server terminated with error: {}", e);
        process::exit(1);
    }
}
