//! 1:1 Messaging Coordination Server - Entry Point
//!
//! Opens the store, starts the Hub actor on the configured fanout bus, and accepts
//! connections.

use std::env;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pairchat::{
    handle_connection, AppState, FanoutBus, Hub, LocalBus, RedisBus, ServerConfig, SqliteStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=pairchat=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pairchat=info")),
        )
        .init();

    let mut config = ServerConfig::from_env();

    // Bind address from command line overrides the environment
    if let Some(addr) = env::args().nth(1) {
        config.bind_addr = addr;
    }

    let store = SqliteStore::connect(&config.database_url, config.db_max_connections).await?;
    store.migrate().await?;

    let bus: Arc<dyn FanoutBus> = match &config.redis_url {
        Some(url) => Arc::new(RedisBus::new(url, &config.fanout_channel).await?),
        None => {
            info!("REDIS_URL not set, running single instance");
            Arc::new(LocalBus::default())
        }
    };
    let hub = Hub::start(bus).await?;
    info!("Hub actor {} started", hub.instance());

    // Start TCP listener
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Messaging server listening on {}", config.bind_addr);

    let state = AppState::new(Arc::new(store), hub, config);

    // Connection accept loop
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("New connection from {}", addr);
                let state = state.clone();

                // Spawn handler task for each connection
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, state).await {
                        error!("Connection handler error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}
