//! Domain model structs persisted in the local database.
//!
//! Every struct derives `Serialize` so it can be handed directly to a
//! presentation layer.

use chrono::{DateTime, Utc};
use serde::Serialize;

use charla_proto::MessageKind;

/// A single stored chat message.
///
/// Exactly one of `recipient_id` / `channel_id` is expected to be set
/// (private vs. channel message). `server_id` is present once the server
/// has confirmed the message; until then the row is a local optimistic
/// record awaiting reconciliation.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StoredMessage {
    /// Local rowid.
    pub id: i64,
    /// The user context (login) this row belongs to.
    pub context_id: i64,
    /// Server-assigned id; the dedup key when present.
    pub server_id: Option<i64>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub kind: MessageKind,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub recipient_id: Option<i64>,
    pub recipient_name: Option<String>,
    pub channel_id: Option<i64>,
    pub content: Option<String>,
    pub audio_path: Option<String>,
    pub transcript: Option<String>,
    pub mime_type: Option<String>,
    pub duration_ms: Option<i64>,
    /// When the row was first written locally.
    pub created_at: DateTime<Utc>,
}

/// An outbound message recorded optimistically at send time, before any
/// server confirmation exists.
#[derive(Debug, Clone, Default)]
pub struct LocalDraft {
    pub kind: Option<MessageKind>,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    pub recipient_id: Option<i64>,
    pub recipient_name: Option<String>,
    pub channel_id: Option<i64>,
    pub content: Option<String>,
    pub audio_path: Option<String>,
    pub transcript: Option<String>,
    pub mime_type: Option<String>,
    pub duration_ms: Option<i64>,
}

impl LocalDraft {
    /// A text message to another user.
    pub fn text_to_user(sender_id: i64, recipient_id: i64, content: impl Into<String>) -> Self {
        Self {
            kind: Some(MessageKind::Text),
            sender_id,
            recipient_id: Some(recipient_id),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A text message to a channel.
    pub fn text_to_channel(sender_id: i64, channel_id: i64, content: impl Into<String>) -> Self {
        Self {
            kind: Some(MessageKind::Text),
            sender_id,
            channel_id: Some(channel_id),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// Effective kind: explicit, else inferred from the presence of an
    /// audio payload.
    pub fn effective_kind(&self) -> MessageKind {
        self.kind.unwrap_or(if self.audio_path.is_some() {
            MessageKind::Audio
        } else {
            MessageKind::Text
        })
    }
}
