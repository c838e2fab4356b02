//! Push-event classification and message extraction.
//!
//! The ingestion pipeline feeds every inbound envelope through
//! [`Push::classify`]; anything that is not a recognized push shape comes
//! back as `None` and is left for other listeners (typically a correlator
//! waiter).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands;
use crate::envelope::Envelope;
use crate::fields;
use crate::types::MessageKind;

/// A server-confirmed message carried by a push or sync event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IncomingMessage {
    /// Server-assigned id; the dedup key when present.
    pub server_id: Option<i64>,
    pub server_timestamp: Option<DateTime<Utc>>,
    pub kind: MessageKind,
    pub sender_id: i64,
    pub sender_name: Option<String>,
    /// Set for private messages. Exactly one of `recipient_id` /
    /// `channel_id` is expected; both present is tolerated.
    pub recipient_id: Option<i64>,
    pub recipient_name: Option<String>,
    /// Set for channel messages.
    pub channel_id: Option<i64>,
    pub content: Option<String>,
    pub audio_path: Option<String>,
    pub transcript: Option<String>,
    pub mime_type: Option<String>,
    pub duration_ms: Option<i64>,
}

impl IncomingMessage {
    /// Extract a message from an event payload (already unwrapped).
    ///
    /// Returns `None` when the sender is missing or neither a recipient nor
    /// a channel is named -- such an event cannot be routed anywhere.
    pub fn from_value(v: &Value) -> Option<Self> {
        let sender_id = fields::i64_field(v, &["senderId", "emisorId", "from"])?;
        let recipient_id = fields::i64_field(v, &["recipientId", "receiverId", "destinatarioId"]);
        let channel_id = fields::i64_field(v, &["channelId", "canalId"]);
        if recipient_id.is_none() && channel_id.is_none() {
            return None;
        }

        let content = fields::str_field(v, &["content", "contenido", "text"]);
        let audio_path = fields::str_field(v, &["audioPath", "audioUrl", "path"]);

        let kind = fields::str_field(v, &["messageType", "kind"])
            .and_then(|s| MessageKind::parse(&s))
            .unwrap_or(if audio_path.is_some() {
                MessageKind::Audio
            } else {
                MessageKind::Text
            });

        Some(Self {
            server_id: fields::i64_field(v, &["id", "messageId", "mensajeId"]),
            server_timestamp: fields::timestamp_field(v, &["timestamp", "fecha", "sentAt"]),
            kind,
            sender_id,
            sender_name: fields::str_field(v, &["senderName", "emisor"]),
            recipient_id,
            recipient_name: fields::str_field(v, &["recipientName", "destinatario"]),
            channel_id,
            content,
            audio_path,
            transcript: fields::str_field(v, &["transcript", "transcripcion"]),
            mime_type: fields::str_field(v, &["mime", "mimeType"]),
            duration_ms: fields::i64_field(v, &["duration", "durationMs", "duracion"]),
        })
    }
}

/// A bulk history sync (`MESSAGE_SYNC`).
#[derive(Debug, Clone, Default)]
pub struct SyncBatch {
    /// Server-reported total (`totalMensajes`), when present.
    pub total: Option<i64>,
    /// Server-reported last sync point (`ultimaSincronizacion`).
    pub last_sync: Option<DateTime<Utc>>,
    pub messages: Vec<IncomingMessage>,
    /// Items that did not extract; logged, never fatal.
    pub skipped: usize,
}

impl SyncBatch {
    pub fn from_payload(payload: Option<&Value>) -> Self {
        let mut batch = Self::default();
        let Some(payload) = payload else {
            return batch;
        };

        batch.total = fields::i64_field(payload, &["totalMensajes", "total"]);
        batch.last_sync =
            fields::timestamp_field(payload, &["ultimaSincronizacion", "lastSync"]);

        for item in fields::payload_items(Some(payload), &["mensajes", "messages"]) {
            match IncomingMessage::from_value(fields::unwrap_inner(&item)) {
                Some(msg) => batch.messages.push(msg),
                None => {
                    tracing::debug!("skipping sync item with no routable message");
                    batch.skipped += 1;
                }
            }
        }
        batch
    }
}

/// A classified inbound push.
#[derive(Debug, Clone)]
pub enum Push {
    /// One new private or channel message.
    Message(IncomingMessage),
    /// Bulk history sync.
    Sync(SyncBatch),
    /// This session was kicked; terminal.
    Kicked { reason: Option<String> },
    /// The server is going away; terminal.
    ServerShutdown,
}

impl Push {
    /// Classify an envelope: bulk sync first, then single
    /// message events (dedicated command or `EVENT` + `tipo`), then the two
    /// terminal notifications. Everything else is not a push.
    pub fn classify(env: &Envelope) -> Option<Self> {
        let (event_type, payload): (&str, Option<&Value>) = match env.command.as_str() {
            commands::MESSAGE_SYNC => {
                return Some(Push::Sync(SyncBatch::from_payload(env.payload.as_ref())));
            }
            commands::EVENT => {
                let payload = env.payload.as_ref()?;
                let tipo = fields::str_field(payload, &["tipo", "type"])?;
                return Self::from_event_type(&tipo, Some(payload));
            }
            other => (other, env.payload.as_ref()),
        };
        Self::from_event_type(event_type, payload)
    }

    fn from_event_type(event_type: &str, payload: Option<&Value>) -> Option<Self> {
        match event_type {
            commands::NEW_MESSAGE | commands::NEW_CHANNEL_MESSAGE => {
                let payload = payload?;
                let msg = IncomingMessage::from_value(fields::unwrap_inner(payload))?;
                Some(Push::Message(msg))
            }
            commands::KICKED => Some(Push::Kicked {
                reason: payload.and_then(|p| fields::str_field(p, &["reason", "message"])),
            }),
            commands::SERVER_SHUTDOWN => Some(Push::ServerShutdown),
            _ => None,
        }
    }
}
