//! Bounded worker pool
//!
//! Runs connection setup and broadcast fan-out off the accept loop and off
//! the per-session read loops. At most `max_workers` tasks execute at once;
//! the rest wait for a permit. Tasks carry no ordering guarantee relative
//! to each other.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::config::ServerConfig;
use crate::connection;
use crate::message::ServerMessage;
use crate::registry::Registry;
use crate::router::Router;
use crate::types::SessionId;

/// Count of submitted-but-unfinished tasks
#[derive(Debug, Default)]
struct Pending {
    count: AtomicUsize,
    idle: Notify,
}

/// Decrements the pending count when the task ends, even on panic
struct PendingGuard(Arc<Pending>);

impl PendingGuard {
    fn new(pending: Arc<Pending>) -> Self {
        pending.count.fetch_add(1, Ordering::SeqCst);
        Self(pending)
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Which sessions a broadcast reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Sessions that have logged in
    LoggedIn,
    /// Every live connection, logged in or not
    Everyone,
}

/// Worker pool handle
///
/// Cheap to clone; all clones share the same permits.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    permits: Arc<Semaphore>,
    max_workers: usize,
    pending: Arc<Pending>,
}

impl Dispatcher {
    pub fn new(max_workers: usize) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
            pending: Arc::new(Pending::default()),
        }
    }

    /// Tasks currently holding a permit
    pub fn active(&self) -> usize {
        self.max_workers - self.permits.available_permits()
    }

    /// Tasks submitted and not yet finished (running or queued)
    pub fn pending(&self) -> usize {
        self.pending.count.load(Ordering::SeqCst)
    }

    /// Wait until every submitted task has finished
    pub async fn idle(&self) {
        loop {
            let notified = self.pending.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Run a task on the pool
    pub fn spawn<F, T>(&self, task: F) -> JoinHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let permits = self.permits.clone();
        let guard = PendingGuard::new(self.pending.clone());

        tokio::spawn(async move {
            let _guard = guard;
            // The semaphore is never closed; run unthrottled if it ever is
            let _permit = permits.acquire_owned().await.ok();
            task.await
        })
    }

    /// Connection task: turn an accepted socket into a running session
    pub fn spawn_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        router: Arc<Router>,
        config: Arc<ServerConfig>,
    ) -> JoinHandle<()> {
        let dispatcher = self.clone();
        self.spawn(async move {
            match connection::open(stream, addr, &router, &config) {
                Ok(session) => debug!(
                    "Session {} ready for {} (active workers: {})",
                    session.id(),
                    addr,
                    dispatcher.active()
                ),
                Err(e) => error!("Failed to set up connection from {}: {}", addr, e),
            }
        })
    }

    /// Broadcast task: deliver `message` to every session in `audience` but `exclude`
    ///
    /// Recipients are snapshotted when the task runs. Resolves to the number
    /// of sessions that accepted the message.
    pub fn broadcast(
        &self,
        registry: Arc<Registry>,
        message: ServerMessage,
        audience: Audience,
        exclude: Option<SessionId>,
    ) -> JoinHandle<usize> {
        self.spawn(async move {
            let payload = match message.to_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to serialize broadcast: {}", e);
                    return 0;
                }
            };

            let recipients = match audience {
                Audience::LoggedIn => registry.all(),
                Audience::Everyone => registry.connected(),
            };

            let mut delivered = 0;
            for session in recipients {
                if Some(session.id()) == exclude {
                    continue;
                }
                match session.send_payload(payload.clone()) {
                    Ok(()) => delivered += 1,
                    Err(e) => debug!("Broadcast to {} failed: {}", session.display_name(), e),
                }
            }
            delivered
        })
    }
}
