//! Channel management and invitations.

use serde_json::json;

use charla_proto::{commands, Envelope};

use crate::session::Session;

impl Session {
    /// Create a channel. `members` are invited immediately by the server.
    pub async fn create_channel(&self, name: &str, is_private: bool, members: &[i64]) -> bool {
        self.request_ack(
            Envelope::with_payload(
                commands::CREATE_CHANNEL,
                json!({
                    "name": name,
                    "isPrivate": is_private,
                    "members": members,
                }),
            ),
            commands::CREATE_CHANNEL,
        )
        .await
    }

    /// Invite a user to a channel.
    pub async fn invite(&self, channel_id: i64, user_id: i64) -> bool {
        self.request_ack(
            Envelope::with_payload(
                commands::INVITE,
                json!({"channelId": channel_id, "userId": user_id}),
            ),
            commands::INVITE,
        )
        .await
    }

    /// Accept a pending invitation.
    pub async fn accept_invitation(&self, invitation_id: i64) -> bool {
        self.request_ack(
            Envelope::with_payload(commands::ACCEPT, json!({"invitationId": invitation_id})),
            commands::ACCEPT,
        )
        .await
    }

    /// Reject a pending invitation.
    pub async fn reject_invitation(&self, invitation_id: i64) -> bool {
        self.request_ack(
            Envelope::with_payload(commands::REJECT, json!({"invitationId": invitation_id})),
            commands::REJECT,
        )
        .await
    }
}
