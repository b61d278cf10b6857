//! Basic type definitions for the chat relay
//!
//! Provides the `SessionId` newtype and the timestamp formats used on the
//! wire and in the log files.

use chrono::{DateTime, Local};
use uuid::Uuid;

/// Wire timestamp format (`hh:mm:ss`)
pub const WIRE_TIME_FORMAT: &str = "%H:%M:%S";

/// Log line timestamp format (`yyyy-MM-dd hh:mm:ss`)
pub const LOG_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Log file date partition format (`yyyy-MM-dd`)
pub const LOG_DATE_FORMAT: &str = "%Y-%m-%d";

/// Unique session identifier (newtype pattern)
///
/// Wraps a UUID v4 for type-safe session identification.
/// Implements Hash and Eq for use as HashMap keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Create a new random session ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current local time formatted for outbound messages
pub fn wire_timestamp() -> String {
    wire_timestamp_at(Local::now())
}

pub fn wire_timestamp_at(now: DateTime<Local>) -> String {
    now.format(WIRE_TIME_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_session_id_unique() {
        let id1 = SessionId::new();
        let id2 = SessionId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_wire_timestamp_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(wire_timestamp_at(at), "07:05:01");
    }
}
