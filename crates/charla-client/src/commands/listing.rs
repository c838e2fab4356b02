//! Directory queries: users, channels, invitations.
//!
//! Every listing degrades to an empty vector on timeout, `ERROR` response
//! or malformed payload; items that fail to extract individually are
//! dropped, not fatal.

use serde_json::Value;
use tracing::debug;

use charla_proto::{commands, fields, ChannelInfo, Contact, Envelope, Invitation};

use crate::session::Session;

impl Session {
    /// All registered users.
    pub async fn list_users(&self) -> Vec<Contact> {
        self.list_items(commands::LIST_USERS, &["users", "usuarios"])
            .await
            .iter()
            .filter_map(Contact::from_value)
            .collect()
    }

    /// Currently connected users.
    pub async fn list_connected(&self) -> Vec<Contact> {
        self.list_items(commands::LIST_CONNECTED, &["users", "usuarios", "connected"])
            .await
            .iter()
            .filter_map(Contact::from_value)
            .collect()
    }

    /// Channels visible to this user.
    pub async fn list_channels(&self) -> Vec<ChannelInfo> {
        self.list_items(commands::LIST_CHANNELS, &["channels", "canales"])
            .await
            .iter()
            .filter_map(ChannelInfo::from_value)
            .collect()
    }

    /// Invitations sent to this user.
    pub async fn list_received_invitations(&self) -> Vec<Invitation> {
        self.list_items(
            commands::LIST_RECEIVED_INVITATIONS,
            &["invitations", "invitaciones"],
        )
        .await
        .iter()
        .filter_map(Invitation::from_value)
        .collect()
    }

    /// Invitations this user sent.
    pub async fn list_sent_invitations(&self) -> Vec<Invitation> {
        self.list_items(
            commands::LIST_SENT_INVITATIONS,
            &["invitations", "invitaciones"],
        )
        .await
        .iter()
        .filter_map(Invitation::from_value)
        .collect()
    }

    /// Issue a listing request and return the raw item array.
    async fn list_items(&self, command: &str, keys: &[&str]) -> Vec<Value> {
        match self.request(Envelope::new(command), command).await {
            Some(line) => match Envelope::parse(&line) {
                Ok(resp) if resp.command == command => {
                    fields::payload_items(resp.payload.as_ref(), keys)
                }
                Ok(resp) => {
                    debug!(command = %resp.command, "listing answered with error");
                    Vec::new()
                }
                Err(_) => Vec::new(),
            },
            None => Vec::new(),
        }
    }
}
