//! Chat relay server - Entry Point
//!
//! Binds the listener and runs the accept loop until Ctrl-C.
//!
//! Usage: `chat_relay [bind_addr] [log_dir]`

use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chat_relay::{ChatServer, ServerConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging with environment filter
    // Use RUST_LOG env var to control log level
    // e.g., RUST_LOG=debug or RUST_LOG=chat_relay=trace
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("chat_relay=info")),
        )
        .init();

    let mut config = ServerConfig::default();
    let mut args = env::args().skip(1);
    if let Some(addr) = args.next() {
        config.bind_addr = addr;
    }
    if let Some(dir) = args.next() {
        config.log_dir = PathBuf::from(dir);
    }

    // Failing to bind is the one fatal error
    let server = Arc::new(ChatServer::bind(config).await?);
    info!("Chat relay listening on {}", server.local_addr());

    let stopper = server.clone();
    let stop_task = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => stopper.stop().await,
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    server.run().await;

    // The accept loop only ends from `stop`; wait for it to finish draining
    let _ = stop_task.await;

    Ok(())
}
