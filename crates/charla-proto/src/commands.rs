//! Top-level command names and push-event discriminators.
//!
//! The command vocabulary is open-ended: the server may emit names this
//! client does not know, and unknown commands are simply ignored by the
//! ingestion pipeline (they may still satisfy a correlator waiter).

// -- Requests --------------------------------------------------------------

pub const LOGIN: &str = "LOGIN";
pub const REGISTER: &str = "REGISTER";
pub const SEND_USER: &str = "SEND_USER";
pub const SEND_CHANNEL: &str = "SEND_CHANNEL";
pub const UPLOAD_AUDIO: &str = "UPLOAD_AUDIO";
pub const CREATE_CHANNEL: &str = "CREATE_CHANNEL";
pub const INVITE: &str = "INVITE";
pub const ACCEPT: &str = "ACCEPT";
pub const REJECT: &str = "REJECT";
pub const LIST_USERS: &str = "LIST_USERS";
pub const LIST_CHANNELS: &str = "LIST_CHANNELS";
pub const LIST_CONNECTED: &str = "LIST_CONNECTED";
pub const LIST_RECEIVED_INVITATIONS: &str = "LIST_RECEIVED_INVITATIONS";
pub const LIST_SENT_INVITATIONS: &str = "LIST_SENT_INVITATIONS";
pub const PING: &str = "PING";
pub const BROADCAST: &str = "BROADCAST";
pub const LOGOUT: &str = "LOGOUT";
pub const CLOSE_CONN: &str = "CLOSE_CONN";

// -- Server-side responses / pushes ----------------------------------------

/// Reserved error response; matches any pending waiter.
pub const ERROR: &str = "ERROR";

/// Generic push wrapper; the payload carries a `tipo` discriminator.
pub const EVENT: &str = "EVENT";

/// Bulk history sync (`totalMensajes`, `ultimaSincronizacion`, `mensajes`).
pub const MESSAGE_SYNC: &str = "MESSAGE_SYNC";

// -- `tipo` values inside EVENT payloads -----------------------------------
//
// Each is also accepted as a dedicated top-level command, for servers that
// predate the EVENT wrapper.

pub const NEW_MESSAGE: &str = "NEW_MESSAGE";
pub const NEW_CHANNEL_MESSAGE: &str = "NEW_CHANNEL_MESSAGE";
pub const KICKED: &str = "KICKED";
pub const SERVER_SHUTDOWN: &str = "SERVER_SHUTDOWN";
