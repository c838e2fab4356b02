//! Outgoing messages: private, channel, audio, broadcast.
//!
//! Sends are fire-and-forget on the wire; the server confirms through a
//! push or the next bulk sync. Each send records an optimistic local copy
//! so the conversation renders immediately, and the dedup layer later
//! reconciles that pending row with the server-confirmed one.

use serde_json::{json, Map, Value};

use charla_proto::{commands, Envelope, MessageKind};
use charla_store::LocalDraft;

use crate::session::Session;

/// Metadata for an audio message; the file itself is uploaded by path.
#[derive(Debug, Clone, Default)]
pub struct AudioUpload {
    pub audio_path: String,
    pub transcript: Option<String>,
    pub mime_type: Option<String>,
    pub duration_ms: Option<i64>,
}

impl Session {
    /// Send a text message to a user.
    pub async fn send_user_text(&self, recipient_id: i64, content: &str) -> bool {
        let env = Envelope::with_payload(
            commands::SEND_USER,
            json!({
                "recipientId": recipient_id,
                "content": content,
                "messageType": MessageKind::Text.as_str(),
            }),
        );
        let sent = self.send_only(env).await;
        if sent {
            self.record_local(&LocalDraft::text_to_user(
                self.context_id(),
                recipient_id,
                content,
            ));
        }
        sent
    }

    /// Send a text message to a channel.
    pub async fn send_channel_text(&self, channel_id: i64, content: &str) -> bool {
        let env = Envelope::with_payload(
            commands::SEND_CHANNEL,
            json!({
                "channelId": channel_id,
                "content": content,
                "messageType": MessageKind::Text.as_str(),
            }),
        );
        let sent = self.send_only(env).await;
        if sent {
            self.record_local(&LocalDraft::text_to_channel(
                self.context_id(),
                channel_id,
                content,
            ));
        }
        sent
    }

    /// Send an audio message to a user.
    pub async fn send_user_audio(&self, recipient_id: i64, audio: &AudioUpload) -> bool {
        let mut payload = audio_payload(audio);
        payload.insert("recipientId".into(), json!(recipient_id));
        let sent = self
            .send_only(Envelope::with_payload(
                commands::UPLOAD_AUDIO,
                Value::Object(payload),
            ))
            .await;
        if sent {
            self.record_local(&audio_draft(self.context_id(), Some(recipient_id), None, audio));
        }
        sent
    }

    /// Send an audio message to a channel.
    pub async fn send_channel_audio(&self, channel_id: i64, audio: &AudioUpload) -> bool {
        let mut payload = audio_payload(audio);
        payload.insert("channelId".into(), json!(channel_id));
        let sent = self
            .send_only(Envelope::with_payload(
                commands::UPLOAD_AUDIO,
                Value::Object(payload),
            ))
            .await;
        if sent {
            self.record_local(&audio_draft(self.context_id(), None, Some(channel_id), audio));
        }
        sent
    }

    /// Server-wide broadcast. Not recorded locally; it comes back as a
    /// push like everyone else's copy.
    pub async fn broadcast(&self, content: &str) -> bool {
        self.send_only(Envelope::with_payload(
            commands::BROADCAST,
            json!({"content": content}),
        ))
        .await
    }
}

fn audio_payload(audio: &AudioUpload) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("audioPath".into(), json!(audio.audio_path));
    payload.insert("messageType".into(), json!(MessageKind::Audio.as_str()));
    if let Some(transcript) = &audio.transcript {
        payload.insert("transcript".into(), json!(transcript));
    }
    if let Some(mime) = &audio.mime_type {
        payload.insert("mime".into(), json!(mime));
    }
    if let Some(duration) = audio.duration_ms {
        payload.insert("duration".into(), json!(duration));
    }
    payload
}

fn audio_draft(
    sender_id: i64,
    recipient_id: Option<i64>,
    channel_id: Option<i64>,
    audio: &AudioUpload,
) -> LocalDraft {
    LocalDraft {
        kind: Some(MessageKind::Audio),
        sender_id,
        recipient_id,
        channel_id,
        audio_path: Some(audio.audio_path.clone()),
        transcript: audio.transcript.clone(),
        mime_type: audio.mime_type.clone(),
        duration_ms: audio.duration_ms,
        ..LocalDraft::default()
    }
}
