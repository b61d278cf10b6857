//! Message routing
//!
//! Drives each session through `Connected -> Authenticated -> Closed`:
//! logins populate the registry, chat messages fan out through the
//! dispatcher, and every chat and login event is recorded in the
//! message store. Requests that do not fit the session's current state
//! are ignored; the connection stays open.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatcher::{Audience, Dispatcher};
use crate::error::AppError;
use crate::message::{ClientMessage, ServerMessage};
use crate::registry::Registry;
use crate::session::{Session, SessionState};
use crate::store::MessageStore;
use crate::types::{wire_timestamp, SessionId};

/// Routes decoded client messages
#[derive(Debug)]
pub struct Router {
    registry: Arc<Registry>,
    dispatcher: Dispatcher,
    store: Arc<MessageStore>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, dispatcher: Dispatcher, store: Arc<MessageStore>) -> Self {
        Self {
            registry,
            dispatcher,
            store,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn store(&self) -> &Arc<MessageStore> {
        &self.store
    }

    /// Track a new connection before it logs in
    pub fn attach(&self, session: Arc<Session>) {
        self.registry.attach(session);
        debug!("Connections: {}", self.registry.connection_count());
    }

    /// Process a single message from `session`
    pub fn handle(&self, session: &Arc<Session>, msg: ClientMessage) {
        match msg {
            ClientMessage::Login { text } => self.handle_login(session, text),
            ClientMessage::Message { text } => self.handle_message(session, text),
            ClientMessage::Private {
                text,
                receiver,
                timestamp,
            } => self.handle_private(session, text, receiver, timestamp),
        }
    }

    /// Fan a message out to every logged-in session except `exclude`
    pub fn broadcast(&self, msg: ServerMessage, exclude: Option<SessionId>) -> JoinHandle<usize> {
        let registry = self.registry.clone();
        self.dispatcher
            .broadcast(registry, msg, Audience::LoggedIn, exclude)
    }

    /// Fan a message out to every live connection, logged in or not
    pub fn broadcast_all(&self, msg: ServerMessage) -> JoinHandle<usize> {
        let registry = self.registry.clone();
        self.dispatcher
            .broadcast(registry, msg, Audience::Everyone, None)
    }

    /// Handle login
    fn handle_login(&self, session: &Arc<Session>, text: String) {
        let name = text.trim();
        if name.is_empty() {
            return;
        }

        if session.state() != SessionState::Connected {
            debug!(
                "Ignoring login from {} in state {:?}",
                session.id(),
                session.state()
            );
            return;
        }

        if let Err(e) = self.registry.add(name, session.clone()) {
            info!(
                "Login as '{}' refused for {}: {}",
                name,
                session.peer_address(),
                e
            );
            self.reply(session, e.into());
            return;
        }

        if !session.authenticate(name.to_string()) {
            // Closed while logging in
            self.registry.remove(session);
            return;
        }

        info!(
            "User '{}' logged in from {} (online: {})",
            name,
            session.peer_address(),
            self.registry.len()
        );

        self.broadcast(
            ServerMessage::NewUser {
                username: name.to_string(),
            },
            Some(session.id()),
        );

        self.reply(
            session,
            ServerMessage::UserList {
                userlist: self.registry.names(),
            },
        );

        if let Err(e) = self.store.record_login(name, session.peer_address(), true) {
            warn!("Failed to record login: {}", e);
        }
    }

    /// Handle public chat message
    fn handle_message(&self, session: &Arc<Session>, text: String) {
        let Some(sender) = session.username() else {
            return;
        };

        let text = text.trim();
        if text.is_empty() {
            return;
        }

        debug!("Public message from {}: {}", sender, text);

        // Everyone, including the sender
        self.broadcast(
            ServerMessage::Message {
                text: text.to_string(),
                sender: sender.clone(),
                timestamp: wire_timestamp(),
            },
            None,
        );

        if let Err(e) = self.store.record_public(&sender, text) {
            warn!("Failed to record public message: {}", e);
        }
    }

    /// Handle private message
    fn handle_private(
        &self,
        session: &Arc<Session>,
        text: String,
        receiver: String,
        timestamp: Option<String>,
    ) {
        let Some(sender) = session.username() else {
            return;
        };

        let text = text.trim();
        if text.is_empty() || receiver.is_empty() {
            return;
        }

        let Some(target) = self.registry.find_by_name(&receiver) else {
            self.reply(session, AppError::ReceiverOffline(receiver).into());
            return;
        };

        if target.id() == session.id() {
            self.reply(session, AppError::SelfMessage.into());
            return;
        }

        let msg = ServerMessage::Private {
            text: text.to_string(),
            sender: sender.clone(),
            receiver: receiver.clone(),
            timestamp: timestamp.unwrap_or_else(wire_timestamp),
        };

        self.reply(&target, msg.clone());
        // Echo so the sender renders its own message like the receiver does
        self.reply(session, msg);

        debug!("Private message {} -> {}: {}", sender, receiver, text);

        if let Err(e) = self.store.record_private(&sender, &receiver, text) {
            warn!("Failed to record private message: {}", e);
        }
    }

    /// Tear down a session; only the first call has any effect
    pub fn disconnect(&self, session: &Arc<Session>) {
        let Some(previous) = session.close() else {
            return;
        };

        self.registry.remove(session);

        match previous {
            SessionState::Authenticated(name) => {
                info!(
                    "User '{}' disconnected (online: {})",
                    name,
                    self.registry.len()
                );

                self.broadcast(
                    ServerMessage::UserDisconnected {
                        username: name.clone(),
                    },
                    None,
                );

                if let Err(e) = self
                    .store
                    .record_login(&name, session.peer_address(), false)
                {
                    warn!("Failed to record logout: {}", e);
                }
            }
            _ => info!(
                "Session {} from {} closed",
                session.id(),
                session.peer_address()
            ),
        }
    }

    /// Direct send; a failure only means the peer is going away
    fn reply(&self, session: &Session, msg: ServerMessage) {
        if let Err(e) = session.send(&msg) {
            debug!("Send to {} failed: {}", session.display_name(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    use bytes::Bytes;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    use crate::store::LogCategory;

    struct Harness {
        router: Router,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let router = Router::new(
                Arc::new(Registry::new()),
                Dispatcher::new(4),
                Arc::new(MessageStore::new(dir.path())),
            );
            Self { router, _dir: dir }
        }

        fn connect(&self) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
            let (tx, rx) = mpsc::channel(32);
            let peer = "127.0.0.1:9".to_string();
            let session = Arc::new(Session::new(SessionId::new(), peer, tx));
            self.router.attach(session.clone());
            (session, rx)
        }

        async fn login(&self, name: &str) -> (Arc<Session>, mpsc::Receiver<Bytes>) {
            let (session, mut rx) = self.connect();
            self.router.handle(
                &session,
                ClientMessage::Login {
                    text: name.to_string(),
                },
            );
            self.settle().await;
            drain(&mut rx);
            (session, rx)
        }

        async fn settle(&self) {
            self.router.dispatcher().idle().await;
        }

        fn log_lines(&self, category: LogCategory) -> Vec<String> {
            let path = self
                .router
                .store()
                .log_path(category, chrono::Local::now().date_naive());
            fs::read_to_string(path)
                .map(|s| s.lines().map(str::to_string).collect())
                .unwrap_or_default()
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<ServerMessage> {
        let mut out = Vec::new();
        while let Ok(payload) = rx.try_recv() {
            out.push(serde_json::from_slice(&payload).unwrap());
        }
        out
    }

    fn private(text: &str, receiver: &str) -> ClientMessage {
        ClientMessage::Private {
            text: text.to_string(),
            receiver: receiver.to_string(),
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn test_login_registers_and_announces() {
        let h = Harness::new();
        let (_bob, mut bob_rx) = h.login("bob").await;
        let (_carol, mut carol_rx) = h.login("carol").await;
        drain(&mut bob_rx);

        let (alice, mut alice_rx) = h.connect();
        h.router.handle(
            &alice,
            ClientMessage::Login {
                text: "alice".to_string(),
            },
        );
        h.settle().await;

        let found = h.router.registry().find_by_name("alice").unwrap();
        assert_eq!(found.id(), alice.id());

        let newuser = ServerMessage::NewUser {
            username: "alice".to_string(),
        };
        assert_eq!(drain(&mut bob_rx), vec![newuser.clone()]);
        assert_eq!(drain(&mut carol_rx), vec![newuser]);

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerMessage::UserList {
                userlist: vec!["alice".to_string(), "bob".to_string(), "carol".to_string()],
            }]
        );

        let logins = h.log_lines(LogCategory::Login);
        let expected = "LOGIN alice from 127.0.0.1:9";
        assert!(logins.iter().any(|l| l.contains(expected)));
    }

    #[tokio::test]
    async fn test_second_login_ignored() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;

        h.router.handle(
            &alice,
            ClientMessage::Login {
                text: "alias".to_string(),
            },
        );
        h.settle().await;

        assert!(h.router.registry().find_by_name("alias").is_none());
        assert_eq!(alice.username().as_deref(), Some("alice"));
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_name_gets_error() {
        let h = Harness::new();
        let (alice, _alice_rx) = h.login("alice").await;
        let (imposter, mut imposter_rx) = h.connect();

        h.router.handle(
            &imposter,
            ClientMessage::Login {
                text: "alice".to_string(),
            },
        );
        h.settle().await;

        assert_eq!(
            drain(&mut imposter_rx),
            vec![ServerMessage::error("Name already in use: alice")]
        );
        assert_eq!(imposter.state(), SessionState::Connected);
        let owner = h.router.registry().find_by_name("alice").unwrap();
        assert_eq!(owner.id(), alice.id());
    }

    #[tokio::test]
    async fn test_public_message_reaches_everyone() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;
        drain(&mut alice_rx);

        h.router.handle(
            &alice,
            ClientMessage::Message {
                text: "  hello  ".to_string(),
            },
        );
        h.settle().await;

        for rx in [&mut alice_rx, &mut bob_rx] {
            match drain(rx).as_slice() {
                [ServerMessage::Message { text, sender, .. }] => {
                    assert_eq!(text, "hello");
                    assert_eq!(sender, "alice");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }

        let public = h.log_lines(LogCategory::Public);
        assert_eq!(public.len(), 1);
        assert!(public[0].ends_with("[PUBLIC][alice] hello"));
    }

    #[tokio::test]
    async fn test_blank_message_ignored() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;
        drain(&mut alice_rx);

        for text in ["", "   ", "\t\n"] {
            h.router.handle(
                &alice,
                ClientMessage::Message {
                    text: text.to_string(),
                },
            );
        }
        h.settle().await;

        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
        assert!(h.log_lines(LogCategory::Public).is_empty());
    }

    #[tokio::test]
    async fn test_message_before_login_ignored() {
        let h = Harness::new();
        let (_bob, mut bob_rx) = h.login("bob").await;
        let (anon, mut anon_rx) = h.connect();

        h.router.handle(
            &anon,
            ClientMessage::Message {
                text: "hi".to_string(),
            },
        );
        h.router.handle(&anon, private("hi", "bob"));
        h.settle().await;

        assert!(drain(&mut bob_rx).is_empty());
        assert!(drain(&mut anon_rx).is_empty());
    }

    #[tokio::test]
    async fn test_private_to_offline_user() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_carol, mut carol_rx) = h.login("carol").await;
        drain(&mut alice_rx);

        h.router.handle(&alice, private("psst", "bob"));
        h.settle().await;

        assert_eq!(
            drain(&mut alice_rx),
            vec![ServerMessage::error("User bob is not online")]
        );
        assert!(drain(&mut carol_rx).is_empty());
        assert!(h.log_lines(LogCategory::Private).is_empty());
    }

    #[tokio::test]
    async fn test_private_to_self() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;
        drain(&mut alice_rx);

        h.router.handle(&alice, private("me", "alice"));
        h.settle().await;

        let expected = ServerMessage::error("Cannot send a private message to yourself");
        assert_eq!(drain(&mut alice_rx), vec![expected]);
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_private_delivered_and_echoed() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;
        let (_carol, mut carol_rx) = h.login("carol").await;
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        h.router.handle(
            &alice,
            ClientMessage::Private {
                text: " psst ".to_string(),
                receiver: "bob".to_string(),
                timestamp: Some("09:30:00".to_string()),
            },
        );
        h.settle().await;

        let expected = ServerMessage::Private {
            text: "psst".to_string(),
            sender: "alice".to_string(),
            receiver: "bob".to_string(),
            timestamp: "09:30:00".to_string(),
        };
        assert_eq!(drain(&mut bob_rx), vec![expected.clone()]);
        assert_eq!(drain(&mut alice_rx), vec![expected]);
        assert!(drain(&mut carol_rx).is_empty());

        let lines = h.log_lines(LogCategory::Private);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("[PRIVATE][alice->bob] psst"));
    }

    #[tokio::test]
    async fn test_private_with_numeric_timestamp_delivered() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;
        drain(&mut alice_rx);

        let payload =
            br#"{"type":"private","text":"psst","receiver":"bob","timestamp":1700000000}"#;
        let msg = ClientMessage::from_payload(payload).unwrap();
        h.router.handle(&alice, msg);
        h.settle().await;

        for rx in [&mut bob_rx, &mut alice_rx] {
            match drain(rx).as_slice() {
                [ServerMessage::Private { timestamp, .. }] => {
                    assert_eq!(timestamp, "1700000000");
                }
                other => panic!("unexpected: {:?}", other),
            }
        }
        assert_eq!(h.log_lines(LogCategory::Private).len(), 1);
    }

    #[tokio::test]
    async fn test_private_missing_fields_ignored() {
        let h = Harness::new();
        let (alice, mut alice_rx) = h.login("alice").await;

        h.router.handle(&alice, private("  ", "bob"));
        h.router.handle(&alice, private("hi", ""));
        h.settle().await;

        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_authenticated() {
        let h = Harness::new();
        let (alice, _alice_rx) = h.login("alice").await;
        let (_bob, mut bob_rx) = h.login("bob").await;

        h.router.disconnect(&alice);
        h.router.disconnect(&alice);
        h.settle().await;

        assert!(h.router.registry().find_by_name("alice").is_none());
        assert!(h
            .router
            .registry()
            .all()
            .iter()
            .all(|s| s.id() != alice.id()));
        assert_eq!(
            drain(&mut bob_rx),
            vec![ServerMessage::UserDisconnected {
                username: "alice".to_string()
            }]
        );
        assert_eq!(alice.state(), SessionState::Closed);

        let logins = h.log_lines(LogCategory::Login);
        let logouts = logins.iter().filter(|l| l.contains("LOGOUT alice")).count();
        assert_eq!(logouts, 1);
    }

    #[tokio::test]
    async fn test_disconnect_unauthenticated() {
        let h = Harness::new();
        let (_bob, mut bob_rx) = h.login("bob").await;
        let (anon, _anon_rx) = h.connect();

        h.router.disconnect(&anon);
        h.settle().await;

        assert!(drain(&mut bob_rx).is_empty());
        assert_eq!(h.router.registry().connection_count(), 1);
    }

    #[tokio::test]
    async fn test_name_free_after_disconnect() {
        let h = Harness::new();
        let (alice, _alice_rx) = h.login("alice").await;
        h.router.disconnect(&alice);

        let (again, _again_rx) = h.login("alice").await;
        let owner = h.router.registry().find_by_name("alice").unwrap();
        assert_eq!(owner.id(), again.id());
    }
}
