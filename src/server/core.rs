use axum::Router;
use log::{error, info};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::{ServerConfig, SharedRuntimeConfig, StartupConfig};
use crate::error::ServerError;
use crate::server::routes;
use crate::storage::Storage;
use crate::transfer::ArchiveSettings;

/// State shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<Storage>,
    pub runtime: SharedRuntimeConfig,
    pub archive: ArchiveSettings,
}

pub struct Server {
    listener: TcpListener,
    app: Router,
}

impl Server {
    /// Validates `config`, opens the storage root and binds the listener.
    pub async fn new(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let (startup, runtime) = config.split();
        Self::bind(startup, runtime).await
    }

    /// Binds without validating, so tests can ask for an ephemeral port.
    pub async fn bind(
        startup: StartupConfig,
        runtime: SharedRuntimeConfig,
    ) -> Result<Self, ServerError> {
        let storage = Storage::open(&startup.storage_root_path()).map_err(|e| {
            error!("Failed to open storage root {}: {}", startup.storage_root, e);
            e
        })?;

        let socket = startup.http_socket();
        let listener = TcpListener::bind(&socket).await.map_err(|e| {
            error!("Failed to bind to {}: {}", socket, e);
            e
        })?;
        info!("Server bound to {}", listener.local_addr()?);

        let state = AppState {
            storage: Arc::new(storage),
            runtime,
            archive: ArchiveSettings {
                chunk_size: startup.archive_chunk_size,
                channel_capacity: startup.archive_channel_capacity,
            },
        };

        Ok(Self {
            listener,
            app: routes::router(state),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves requests until Ctrl+C.
    pub async fn start(self) -> io::Result<()> {
        info!("Starting Rax cloud server on {}", self.local_addr()?);

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
