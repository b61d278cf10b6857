//! Error types for the chat relay
//!
//! Defines application-level errors and session send errors.
//! Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Application-level errors
///
/// Covers transport errors (the session is torn down), storage errors
/// (logged, the write is skipped) and routing errors that are reported
/// back to the offending client as an `error` message.
#[derive(Debug, Error)]
pub enum AppError {
    /// IO error on a socket or listener
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A peer declared a frame longer than the configured maximum
    #[error("Frame too large: {len} bytes (max: {max})")]
    FrameTooLarge { len: usize, max: usize },

    /// Log file could not be opened or written
    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Display name already belongs to another session
    #[error("Name already in use: {0}")]
    NameTaken(String),

    /// Private message receiver is not connected
    #[error("User {0} is not online")]
    ReceiverOffline(String),

    /// Private message addressed to the sender
    #[error("Cannot send a private message to yourself")]
    SelfMessage,
}

/// Session send errors
///
/// Sending never blocks; these are returned immediately and callers
/// log them and move on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    /// Session has been closed
    #[error("Session not connected")]
    NotConnected,

    /// Outbound queue is full (slow peer)
    #[error("Outbound queue full")]
    Backlogged,

    /// The writer task has gone away
    #[error("Channel closed")]
    ChannelClosed,

    /// Message could not be serialized
    #[error("Encode failed: {0}")]
    Encode(String),
}
