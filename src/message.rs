//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization. Each message travels in
//! one frame (see `framer`).

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::AppError;

/// Client → Server message
///
/// Payloads that are not JSON objects, carry an unknown `type`, or lack a
/// required field never become a `ClientMessage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Claim a display name (`text` is the name)
    Login { text: String },
    /// Public chat message
    Message { text: String },
    /// Direct message to one user
    Private {
        text: String,
        receiver: String,
        #[serde(
            default,
            deserialize_with = "any_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<String>,
    },
}

impl ClientMessage {
    /// Decode a frame payload
    ///
    /// The `type` value is matched case-insensitively. Returns `None` for
    /// anything that is not a well-formed client message.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        let mut value: Value = serde_json::from_slice(payload).ok()?;
        let object = value.as_object_mut()?;

        if let Some(Value::String(kind)) = object.get_mut("type") {
            kind.make_ascii_lowercase();
        }

        serde_json::from_value(value).ok()
    }
}

/// Accept a timestamp of any JSON type
///
/// Strings are kept as they are, `null` counts as absent and anything else
/// is kept in its JSON text form.
fn any_timestamp<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text),
        Some(other) => Some(other.to_string()),
    })
}

/// Server → Client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Public chat message, sent to everyone including the sender
    Message {
        text: String,
        sender: String,
        timestamp: String,
    },
    /// Direct message, sent to the receiver and echoed to the sender
    Private {
        text: String,
        sender: String,
        receiver: String,
        timestamp: String,
    },
    /// A user logged in
    NewUser { username: String },
    /// A logged-in user went away
    UserDisconnected { username: String },
    /// Everyone currently logged in
    UserList { userlist: Vec<String> },
    /// Request could not be served
    Error { text: String },
    /// Server is stopping
    Shutdown { text: String },
}

impl ServerMessage {
    /// Serialize to a frame payload
    pub fn to_payload(&self) -> Result<Bytes, AppError> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Shorthand for an `error` message
    pub fn error(text: impl Into<String>) -> Self {
        ServerMessage::Error { text: text.into() }
    }
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        match &err {
            AppError::NameTaken(_) | AppError::ReceiverOffline(_) | AppError::SelfMessage => {
                ServerMessage::error(err.to_string())
            }
            // Transport and storage errors are not meant for clients
            _ => ServerMessage::error("Internal error"),
        }
    }
}
