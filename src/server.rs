//! ChatServer implementation
//!
//! Owns the listener and wires the shared pieces together: registry,
//! dispatcher, router and message store. The accept loop only accepts;
//! session setup runs as a dispatcher task.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::AppError;
use crate::message::ServerMessage;
use crate::registry::Registry;
use crate::router::Router;
use crate::store::MessageStore;

/// Text of the notice sent on shutdown
pub const SHUTDOWN_NOTICE: &str = "Server is shutting down";

/// The chat relay server
pub struct ChatServer {
    /// Taken by `run`; dropped when the accept loop ends
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    config: Arc<ServerConfig>,
    router: Arc<Router>,
    shutdown: CancellationToken,
    stopped: AtomicBool,
}

impl ChatServer {
    /// Bind the listener
    ///
    /// This is the only fatal failure: everything after it is handled per
    /// session.
    pub async fn bind(config: ServerConfig) -> Result<Self, AppError> {
        let listener = TcpListener::bind(&config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        let router = Arc::new(Router::new(
            Arc::new(Registry::new()),
            Dispatcher::new(config.max_workers),
            Arc::new(MessageStore::new(config.log_dir.clone())),
        ));

        Ok(Self {
            listener: Mutex::new(Some(listener)),
            local_addr,
            config: Arc::new(config),
            router,
            shutdown: CancellationToken::new(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Accept connections until `stop` is called
    ///
    /// The listening socket is closed when this returns.
    pub async fn run(&self) {
        let Some(listener) = self.listener.lock().take() else {
            warn!("Accept loop already started");
            return;
        };

        info!(
            "Chat relay accepting on {} (workers: {}, logs: {})",
            self.local_addr,
            self.config.max_workers,
            self.config.log_dir.display()
        );

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        info!("New connection from {}", addr);
                        self.router.dispatcher().spawn_connection(
                            stream,
                            addr,
                            self.router.clone(),
                            self.config.clone(),
                        );
                    }
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                    }
                },
            }
        }

        info!("Accept loop stopped");
    }

    /// Notify every connection, disconnect them all and stop accepting
    ///
    /// Safe to call more than once; later calls do nothing. Returns once
    /// in-flight dispatcher tasks have drained.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("Stopping server...");

        let notice = ServerMessage::Shutdown {
            text: SHUTDOWN_NOTICE.to_string(),
        };
        if let Err(e) = self.router.broadcast_all(notice).await {
            error!("Shutdown broadcast task failed: {}", e);
        }

        for session in self.router.registry().connected() {
            session.request_disconnect();
        }

        self.shutdown.cancel();
        self.router.dispatcher().idle().await;

        // Sessions whose setup was still queued above
        for session in self.router.registry().connected() {
            session.request_disconnect();
        }

        info!("Server stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}
