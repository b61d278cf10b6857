//! Directory of connected sessions
//!
//! Maps display names to logged-in sessions and keeps every live
//! connection (logged in or not) so the server can reach all of them
//! on shutdown. A single lock guards both maps.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::AppError;
use crate::session::Session;
use crate::types::SessionId;

#[derive(Debug, Default)]
struct Inner {
    /// Display name -> logged-in session
    by_name: HashMap<String, Arc<Session>>,
    /// Every live connection
    connected: HashMap<SessionId, Arc<Session>>,
}

/// Thread-safe session directory
#[derive(Debug, Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly accepted connection
    pub fn attach(&self, session: Arc<Session>) {
        self.inner.lock().connected.insert(session.id(), session);
    }

    /// Register a session under a display name
    ///
    /// Fails if the name already belongs to a different session. Called
    /// before the session changes state, so check and insert share a lock.
    pub fn add(&self, name: &str, session: Arc<Session>) -> Result<(), AppError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.by_name.get(name) {
            if existing.id() != session.id() {
                return Err(AppError::NameTaken(name.to_string()));
            }
        }

        inner.connected.insert(session.id(), session.clone());
        inner.by_name.insert(name.to_string(), session);
        Ok(())
    }

    /// Drop a session from both maps
    ///
    /// A name entry is only removed if it still points at this session.
    pub fn remove(&self, session: &Session) {
        let mut inner = self.inner.lock();
        inner.connected.remove(&session.id());
        inner.by_name.retain(|_, s| s.id() != session.id());
    }

    pub fn find_by_name(&self, name: &str) -> Option<Arc<Session>> {
        self.inner.lock().by_name.get(name).cloned()
    }

    /// Point-in-time snapshot of logged-in sessions
    pub fn all(&self) -> Vec<Arc<Session>> {
        self.inner.lock().by_name.values().cloned().collect()
    }

    /// Sorted display names of logged-in sessions
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Snapshot of every live connection
    pub fn connected(&self) -> Vec<Arc<Session>> {
        self.inner.lock().connected.values().cloned().collect()
    }

    /// Number of logged-in sessions
    pub fn len(&self) -> usize {
        self.inner.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn connection_count(&self) -> usize {
        self.inner.lock().connected.len()
    }
}
