//! Account lifecycle: login, register, logout, ping.

use serde_json::json;
use tracing::{info, warn};

use charla_proto::{commands, Envelope, LoginOutcome};

use crate::session::Session;

impl Session {
    /// Authenticate against the server.
    ///
    /// On success the session adopts the user's store partition, so
    /// history written before login (or under a previous account) is
    /// migrated or left behind as appropriate.
    pub async fn login(&self, email: &str, password: &str) -> LoginOutcome {
        let env = Envelope::with_payload(
            commands::LOGIN,
            json!({"email": email, "contrasenia": password}),
        );
        let Some(line) = self.request(env, commands::LOGIN).await else {
            return LoginOutcome::absent();
        };
        let outcome = match Envelope::parse(&line) {
            Ok(resp) => LoginOutcome::from_envelope(&resp, &line),
            Err(e) => {
                warn!(error = %e, "unparseable login response");
                return LoginOutcome::absent();
            }
        };
        if outcome.success {
            if let Some(user_id) = outcome.user_id {
                info!(user_id, "logged in");
                self.set_context(user_id);
            } else {
                warn!("login succeeded without a user id; keeping provisional context");
            }
        }
        outcome
    }

    /// Create an account. Does not log in; callers follow up with
    /// [`Session::login`].
    pub async fn register(&self, username: &str, email: &str, password: &str) -> LoginOutcome {
        let env = Envelope::with_payload(
            commands::REGISTER,
            json!({"username": username, "email": email, "contrasenia": password}),
        );
        let Some(line) = self.request(env, commands::REGISTER).await else {
            return LoginOutcome::absent();
        };
        match Envelope::parse(&line) {
            Ok(resp) => LoginOutcome::from_envelope(&resp, &line),
            Err(e) => {
                warn!(error = %e, "unparseable register response");
                LoginOutcome::absent()
            }
        }
    }

    /// Announce logout and drop back to the provisional context.
    /// Fire-and-forget; local history stays put.
    pub async fn logout(&self) -> bool {
        let sent = self.send_only(Envelope::new(commands::LOGOUT)).await;
        self.reset_context();
        sent
    }

    /// Liveness probe; `true` when the server echoes within the request
    /// timeout.
    pub async fn ping(&self) -> bool {
        self.request(Envelope::new(commands::PING), commands::PING)
            .await
            .is_some()
    }
}
