//! Typed value objects parsed out of response payloads.
//!
//! Every struct derives `Serialize` / `Deserialize` so it can be handed
//! directly to a presentation layer. For the core's purposes these carry no
//! identity beyond their server-assigned id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands;
use crate::envelope::Envelope;
use crate::fields;

// ---------------------------------------------------------------------------
// MessageKind
// ---------------------------------------------------------------------------

/// Kind of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Audio,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Audio => "AUDIO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TEXT" => Some(Self::Text),
            "AUDIO" => Some(Self::Audio),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Contact / Channel / Invitation
// ---------------------------------------------------------------------------

/// A user as reported by the listing verbs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub username: String,
    pub email: Option<String>,
    pub online: Option<bool>,
}

impl Contact {
    /// Parse one list item; `None` when the id is missing.
    pub fn from_value(v: &Value) -> Option<Self> {
        Some(Self {
            id: fields::i64_field(v, &["id", "userId"])?,
            username: fields::str_field(v, &["username", "nombre", "name"])
                .unwrap_or_default(),
            email: fields::str_field(v, &["email"]),
            online: fields::bool_field(v, &["online", "connected", "conectado"]),
        })
    }
}

/// A channel as reported by the listing verbs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: i64,
    pub name: String,
    pub is_private: Option<bool>,
    pub members: Vec<i64>,
}

impl ChannelInfo {
    pub fn from_value(v: &Value) -> Option<Self> {
        let members = fields::get(v, &["members", "miembros"])
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|m| match m {
                        Value::Number(n) => n.as_i64(),
                        Value::Object(_) => fields::i64_field(m, &["id", "userId"]),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            id: fields::i64_field(v, &["id", "channelId"])?,
            name: fields::str_field(v, &["name", "nombre"]).unwrap_or_default(),
            is_private: fields::bool_field(v, &["isPrivate", "private", "privado"]),
            members,
        })
    }
}

/// A pending channel invitation (sent or received).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invitation {
    pub id: i64,
    pub channel_id: Option<i64>,
    pub channel_name: Option<String>,
    pub sender_id: Option<i64>,
    pub sender_name: Option<String>,
}

impl Invitation {
    pub fn from_value(v: &Value) -> Option<Self> {
        Some(Self {
            id: fields::i64_field(v, &["id", "invitationId"])?,
            channel_id: fields::i64_field(v, &["channelId"]),
            channel_name: fields::str_field(v, &["channelName", "channel"]),
            sender_id: fields::i64_field(v, &["senderId", "fromId"]),
            sender_name: fields::str_field(v, &["senderName", "from"]),
        })
    }
}

// ---------------------------------------------------------------------------
// LoginOutcome
// ---------------------------------------------------------------------------

/// Result of a LOGIN (or REGISTER) exchange.
///
/// The raw line is kept so presentation can surface whatever the server
/// actually said.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginOutcome {
    pub success: bool,
    pub message: Option<String>,
    pub user_id: Option<i64>,
    pub raw: String,
}

impl LoginOutcome {
    /// Classify a response envelope.
    ///
    /// Success requires the expected (non-ERROR) command plus either a
    /// `success:true` field or a recognized success message text; message
    /// text is an accepted alternate signal because older servers omit the
    /// boolean (protocol-version tolerance).
    pub fn from_envelope(env: &Envelope, raw: &str) -> Self {
        let payload = env.payload.as_ref();
        let message = payload.and_then(|p| fields::str_field(p, &["message", "mensaje"]));
        let user_id = payload.and_then(|p| fields::i64_field(p, &["id", "userId"]));

        let success = env.command != commands::ERROR
            && (payload
                .and_then(|p| fields::bool_field(p, &["success"]))
                .unwrap_or(false)
                || message.as_deref().is_some_and(is_success_text));

        Self {
            success,
            message,
            user_id,
            raw: raw.to_string(),
        }
    }

    /// An absent response (timeout / transport closed).
    pub fn absent() -> Self {
        Self {
            success: false,
            message: None,
            user_id: None,
            raw: String::new(),
        }
    }
}

fn is_success_text(msg: &str) -> bool {
    let lower = msg.to_lowercase();
    lower.contains("exitoso") || lower.contains("success")
}
