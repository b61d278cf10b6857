//! Multi-client TCP Chat Relay Library
//!
//! Clients connect over TCP, log in with a display name, and exchange
//! public and private messages through the server.
//!
//! # Features
//! - Length-prefixed JSON framing (4-byte big-endian length)
//! - Login with unique display names
//! - Public broadcast messages
//! - Private messages with sender echo
//! - Join/leave notifications and user lists
//! - Date-partitioned append-only traffic logs
//! - Graceful shutdown notice
//!
//! # Architecture
//! - Each connection has a read task (decode + route) and a write task
//!   (drains the session's outbound queue)
//! - `Registry` is the lock-guarded directory of sessions
//! - `Dispatcher` is a bounded pool for connection setup and broadcast
//!   fan-out, so neither the accept loop nor a slow peer stalls others
//! - `Router` applies each message to the session state machine
//! - `MessageStore` appends chat and login events to log files
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let server = ChatServer::bind(ServerConfig::default()).await.unwrap();
//!     server.run().await;
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod framer;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use config::ServerConfig;
pub use dispatcher::{Audience, Dispatcher};
pub use error::{AppError, SendError};
pub use framer::Framer;
pub use message::{ClientMessage, ServerMessage};
pub use registry::Registry;
pub use router::Router;
pub use server::ChatServer;
pub use session::{Inbound, Session, SessionState};
pub use store::{LogCategory, MessageStore};
pub use types::SessionId;
