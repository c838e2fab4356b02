//! The session: one connection, one login context, one command façade.
//!
//! [`Session`] owns every collaborator explicitly (transport, correlator,
//! store, event bus) and is handed to the presentation layer whole; nothing
//! in this crate reaches for process-wide state.
//!
//! The connection is lazy: the first command that needs the wire dials it
//! and wires up the ingestion pipeline. Request failures (timeout, ERROR
//! response, dead socket) are logged and surface as absent results, never
//! as panics.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use charla_net::{Correlator, NetConfig, Transport};
use charla_proto::{commands, fields, Envelope};
use charla_store::{Database, LocalDraft};

use crate::events::EventBus;
use crate::ingest;

/// Per-connection collaborators. Cheap to clone; the transport is shared.
#[derive(Clone)]
pub(crate) struct ConnState {
    pub(crate) transport: Arc<Transport>,
    pub(crate) correlator: Correlator,
}

/// The client core. One instance per account session.
pub struct Session {
    config: NetConfig,
    db: Arc<Mutex<Database>>,
    bus: EventBus,
    conn: AsyncMutex<Option<ConnState>>,
    /// Logged-in user id; 0 is the provisional pre-login context.
    context: Arc<AtomicI64>,
}

impl Session {
    pub fn new(config: NetConfig, db: Database) -> Self {
        Self::with_bus(config, db, EventBus::new())
    }

    /// Build a session around an externally owned bus, so subscribers can
    /// attach before the first connection exists.
    pub fn with_bus(config: NetConfig, db: Database, bus: EventBus) -> Self {
        Self {
            config,
            db: Arc::new(Mutex::new(db)),
            bus,
            conn: AsyncMutex::new(None),
            context: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    /// Shared handle to the local store, for presentation-layer queries.
    pub fn database(&self) -> Arc<Mutex<Database>> {
        self.db.clone()
    }

    /// The logged-in user id, if login has completed.
    pub fn user_id(&self) -> Option<i64> {
        match self.context.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// The active store partition (0 before login).
    pub(crate) fn context_id(&self) -> i64 {
        self.context.load(Ordering::Acquire)
    }

    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|state| state.transport.is_connected())
    }

    /// Dial the server if there is no live connection, spawning the
    /// ingestion pipeline on the fresh transport.
    pub(crate) async fn ensure_connected(&self) -> charla_net::Result<ConnState> {
        let mut guard = self.conn.lock().await;
        if let Some(state) = guard.as_ref() {
            if state.transport.is_connected() {
                return Ok(state.clone());
            }
        }

        info!(addr = %self.config.addr(), "connecting");
        let transport = Arc::new(Transport::connect(&self.config).await?);
        let correlator = Correlator::new(transport.clone());
        ingest::spawn(
            &transport,
            self.db.clone(),
            self.bus.clone(),
            self.context.clone(),
        );

        let state = ConnState {
            transport,
            correlator,
        };
        *guard = Some(state.clone());
        Ok(state)
    }

    /// Send a request and wait for its matching response line.
    ///
    /// The watch is registered before the bytes leave, so a response
    /// arriving faster than this task resumes is never missed. `None`
    /// covers every failure: cannot connect, cannot send, timed out.
    pub(crate) async fn request(&self, env: Envelope, expected: &str) -> Option<String> {
        let state = match self.ensure_connected().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, command = %env.command, "request skipped, not connected");
                return None;
            }
        };
        let line = match env.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, command = %env.command, "unencodable request");
                return None;
            }
        };

        let waiter = state.correlator.watch(expected);
        if let Err(e) = state.transport.send_line(&line).await {
            warn!(error = %e, command = %env.command, "send failed");
            return None;
        }
        waiter.wait(self.config.request_timeout).await
    }

    /// Send a request and interpret the response as a success/failure ack.
    ///
    /// A response with no `success` field counts as success; an `ERROR`
    /// response or a timeout does not.
    pub(crate) async fn request_ack(&self, env: Envelope, expected: &str) -> bool {
        match self.request(env, expected).await {
            Some(line) => match Envelope::parse(&line) {
                Ok(resp) if resp.command == expected => resp
                    .payload
                    .as_ref()
                    .and_then(|p| fields::bool_field(p, &["success", "ok"]))
                    .unwrap_or(true),
                Ok(resp) => {
                    debug!(command = %resp.command, "ack request answered with error");
                    false
                }
                Err(e) => {
                    warn!(error = %e, "unparseable ack response");
                    false
                }
            },
            None => false,
        }
    }

    /// Fire-and-forget send. Returns whether the bytes were handed to the
    /// socket; no response is awaited.
    pub(crate) async fn send_only(&self, env: Envelope) -> bool {
        let state = match self.ensure_connected().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, command = %env.command, "send skipped, not connected");
                return false;
            }
        };
        let line = match env.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, command = %env.command, "unencodable message");
                return false;
            }
        };
        match state.transport.send_line(&line).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, command = %env.command, "send failed");
                false
            }
        }
    }

    /// Record an outgoing message optimistically, before the server
    /// confirms it. The bulk-sync reconciliation fills in the server id
    /// later.
    pub(crate) fn record_local(&self, draft: &LocalDraft) {
        let db = self.db.lock().expect("db lock");
        if let Err(e) = db.insert_local(self.context_id(), draft) {
            warn!(error = %e, "failed to record outgoing message locally");
        }
    }

    /// Switch the store partition after a successful login. Only rows
    /// written under the provisional context are adopted; a previous
    /// account's partition is never re-tagged.
    pub(crate) fn set_context(&self, user_id: i64) {
        let previous = self.context.swap(user_id, Ordering::AcqRel);
        if previous != 0 {
            return;
        }
        let db = self.db.lock().expect("db lock");
        match db.adopt_context(0, user_id) {
            Ok(moved) if moved > 0 => {
                debug!(moved, user_id, "adopted provisional messages");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "context adoption failed"),
        }
    }

    /// Drop back to the provisional context, so the next login starts
    /// fresh instead of inheriting this account's partition.
    pub(crate) fn reset_context(&self) {
        self.context.store(0, Ordering::Release);
    }

    /// Tell the server we are leaving, then tear the connection down.
    /// Idempotent; safe to call with no live connection.
    pub async fn close(&self) {
        let state = self.conn.lock().await.take();
        if let Some(state) = state {
            if state.transport.is_connected() {
                if let Ok(line) = Envelope::new(commands::CLOSE_CONN).to_line() {
                    // Best effort; the socket may already be gone.
                    let _ = state.transport.send_line(&line).await;
                }
            }
            state.transport.close().await;
        }
        self.reset_context();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use crate::events::Notification;

    /// A scripted server: for each `(expected_command, reply)` pair it
    /// reads one line, asserts the command, and writes the reply if any.
    async fn scripted_server(script: Vec<(&'static str, Option<String>)>) -> NetConfig {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            for (expected, reply) in script {
                let line = lines.next_line().await.unwrap().unwrap();
                let env = Envelope::parse(&line).unwrap();
                assert_eq!(env.command, expected, "unexpected request: {line}");
                if let Some(reply) = reply {
                    write.write_all(reply.as_bytes()).await.unwrap();
                    write.write_all(b"\n").await.unwrap();
                }
            }
            // Hold the socket open so the client side does not see EOF
            // while assertions run.
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        NetConfig {
            port,
            request_timeout: Duration::from_secs(5),
            ..NetConfig::default()
        }
    }

    fn test_session(config: NetConfig) -> (Session, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (Session::new(config, db), dir)
    }

    #[tokio::test]
    async fn test_login_success_sets_context() {
        let config = scripted_server(vec![(
            commands::LOGIN,
            Some(
                json!({
                    "command": "LOGIN",
                    "payload": {"success": true, "userId": 42, "message": "Login exitoso"}
                })
                .to_string(),
            ),
        )])
        .await;
        let (session, _dir) = test_session(config);

        let outcome = session.login("ana@example.com", "secret").await;
        assert!(outcome.success);
        assert_eq!(outcome.user_id, Some(42));
        assert_eq!(session.user_id(), Some(42));
        assert!(session.is_connected().await);
    }

    #[tokio::test]
    async fn test_login_request_wire_bytes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetConfig {
            port: listener.local_addr().unwrap().port(),
            request_timeout: Duration::from_millis(200),
            ..NetConfig::default()
        };
        let (session, _dir) = test_session(config);

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(stream).lines();
            lines.next_line().await.unwrap().unwrap()
        });

        // No reply is scripted; the call times out and reports failure.
        assert!(!session.login("ana@example.com", "secret").await.success);

        assert_eq!(
            server.await.unwrap(),
            r#"{"command":"LOGIN","payload":{"email":"ana@example.com","contrasenia":"secret"}}"#
        );
    }

    #[tokio::test]
    async fn test_login_error_response_is_a_clean_failure() {
        let config = scripted_server(vec![(
            commands::LOGIN,
            Some(
                json!({
                    "command": "ERROR",
                    "payload": {"message": "credenciales invalidas"}
                })
                .to_string(),
            ),
        )])
        .await;
        let (session, _dir) = test_session(config);

        let outcome = session.login("ana@example.com", "wrong").await;
        assert!(!outcome.success);
        assert_eq!(session.user_id(), None);
    }

    #[tokio::test]
    async fn test_request_timeout_yields_none() {
        // Server reads the request and never answers.
        let mut config = scripted_server(vec![(commands::PING, None)]).await;
        config.request_timeout = Duration::from_millis(100);
        let (session, _dir) = test_session(config);

        assert!(!session.ping().await);
    }

    #[tokio::test]
    async fn test_send_user_text_records_local_copy() {
        let config = scripted_server(vec![
            (
                commands::LOGIN,
                Some(
                    json!({
                        "command": "LOGIN",
                        "payload": {"success": true, "userId": 7}
                    })
                    .to_string(),
                ),
            ),
            (commands::SEND_USER, None),
        ])
        .await;
        let (session, _dir) = test_session(config);

        assert!(session.login("a@b.c", "pw").await.success);
        assert!(session.send_user_text(9, "hola").await);

        let db = session.database();
        let rows = db
            .lock()
            .unwrap()
            .get_private_conversation(7, 9, 50, 0)
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content.as_deref(), Some("hola"));
        assert_eq!(rows[0].server_id, None);
    }

    #[tokio::test]
    async fn test_relogin_keeps_each_users_history_partitioned() {
        let login_reply = |user_id: i64| {
            Some(
                json!({
                    "command": "LOGIN",
                    "payload": {"success": true, "userId": user_id}
                })
                .to_string(),
            )
        };
        let config = scripted_server(vec![
            (commands::LOGIN, login_reply(5)),
            (commands::SEND_USER, None),
            (commands::LOGIN, login_reply(7)),
        ])
        .await;
        let (session, _dir) = test_session(config);

        // First account logs in and sends a message.
        assert!(session.login("five@example.com", "pw").await.success);
        assert!(session.send_user_text(9, "mine").await);

        // Second account logs in on the same session.
        assert!(session.login("seven@example.com", "pw").await.success);
        assert_eq!(session.user_id(), Some(7));

        // The first account's history stays in its own partition.
        let db = session.database();
        let db = db.lock().unwrap();
        assert_eq!(db.get_private_conversation(5, 9, 50, 0).unwrap().len(), 1);
        assert!(db.get_private_conversation(7, 9, 50, 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_returns_to_provisional_context() {
        let config = scripted_server(vec![
            (
                commands::LOGIN,
                Some(
                    json!({
                        "command": "LOGIN",
                        "payload": {"success": true, "userId": 5}
                    })
                    .to_string(),
                ),
            ),
            (commands::LOGOUT, None),
        ])
        .await;
        let (session, _dir) = test_session(config);

        assert!(session.login("a@b.c", "pw").await.success);
        assert!(session.logout().await);
        assert_eq!(session.user_id(), None);
    }

    #[tokio::test]
    async fn test_list_users_parses_contacts() {
        let config = scripted_server(vec![(
            commands::LIST_USERS,
            Some(
                json!({
                    "command": "LIST_USERS",
                    "payload": {"users": [
                        {"id": 1, "username": "ana"},
                        {"id": 2, "username": "luis", "online": true},
                        {"garbage": true}
                    ]}
                })
                .to_string(),
            ),
        )])
        .await;
        let (session, _dir) = test_session(config);

        let users = session.list_users().await;
        assert_eq!(users.len(), 2);
        assert_eq!(users[0].username, "ana");
        assert_eq!(users[1].online, Some(true));
    }

    #[tokio::test]
    async fn test_list_on_error_response_is_empty() {
        let config = scripted_server(vec![(
            commands::LIST_CHANNELS,
            Some(
                json!({"command": "ERROR", "payload": {"message": "no autorizado"}}).to_string(),
            ),
        )])
        .await;
        let (session, _dir) = test_session(config);

        assert!(session.list_channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_ack_helper_reads_success_flag() {
        let config = scripted_server(vec![
            (
                commands::ACCEPT,
                Some(
                    json!({"command": "ACCEPT", "payload": {"success": true}}).to_string(),
                ),
            ),
            (
                commands::REJECT,
                Some(
                    json!({"command": "REJECT", "payload": {"success": false}}).to_string(),
                ),
            ),
        ])
        .await;
        let (session, _dir) = test_session(config);

        assert!(session.accept_invitation(5).await);
        assert!(!session.reject_invitation(6).await);
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_notifies() {
        let mut config = scripted_server(vec![(commands::PING, None)]).await;
        config.request_timeout = Duration::from_millis(100);
        let (session, _dir) = test_session(config);
        let (_sub, mut events) = session.bus().subscribe();

        // Establish the connection.
        session.ping().await;
        assert!(session.is_connected().await);

        session.close().await;
        session.close().await;
        assert!(!session.is_connected().await);

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(Notification::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_cannot_connect_yields_absent_results() {
        // Nothing is listening on this port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = NetConfig {
            port: listener.local_addr().unwrap().port(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(200),
            ..NetConfig::default()
        };
        drop(listener);
        let (session, _dir) = test_session(config);

        assert!(!session.login("a@b.c", "pw").await.success);
        assert!(session.list_users().await.is_empty());
        assert!(!session.is_connected().await);
    }
}
