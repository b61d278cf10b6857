//! Server configuration

use std::path::PathBuf;

/// Default server address
pub const DEFAULT_ADDR: &str = "127.0.0.1:8080";

/// Default directory for the traffic logs
pub const DEFAULT_LOG_DIR: &str = "chat_logs";

/// Default number of concurrently running pool tasks
pub const DEFAULT_MAX_WORKERS: usize = 10;

/// Per-session outbound queue size
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Maximum frame payload size (16 MB)
pub const DEFAULT_MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Socket read size per readiness event
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Runtime settings for a `ChatServer`
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: String,
    /// Directory holding the `public_`, `private_` and `login_` logs
    pub log_dir: PathBuf,
    /// Upper bound on simultaneously executing dispatcher tasks
    pub max_workers: usize,
    /// Frames queued per session before `send` reports backlog
    pub outbound_capacity: usize,
    /// Largest accepted frame payload
    pub max_frame_len: usize,
    pub read_chunk_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_ADDR.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            max_workers: DEFAULT_MAX_WORKERS,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}
