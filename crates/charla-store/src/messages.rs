//! CRUD operations for [`StoredMessage`] rows.
//!
//! The merge/upsert path for server-confirmed messages lives in
//! [`crate::dedup`]; this module covers optimistic local inserts, history
//! queries, and context migration.

use chrono::{DateTime, Utc};
use rusqlite::params;

use charla_proto::MessageKind;

use crate::database::Database;
use crate::error::Result;
use crate::models::{LocalDraft, StoredMessage};

pub(crate) const MESSAGE_COLS: &str = "id, context_id, server_id, server_timestamp, kind, \
     sender_id, sender_name, recipient_id, recipient_name, channel_id, \
     content, audio_path, transcript, mime_type, duration_ms, created_at";

impl Database {
    /// Record an outbound message optimistically, before any server
    /// confirmation exists. Returns the local rowid.
    pub fn insert_local(&self, ctx: i64, draft: &LocalDraft) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO messages (context_id, kind, sender_id, sender_name,
                 recipient_id, recipient_name, channel_id, content,
                 audio_path, transcript, mime_type, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                ctx,
                draft.effective_kind().as_str(),
                draft.sender_id,
                draft.sender_name,
                draft.recipient_id,
                draft.recipient_name,
                draft.channel_id,
                draft.content,
                draft.audio_path,
                draft.transcript,
                draft.mime_type,
                draft.duration_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Messages exchanged with one peer (either direction), oldest first.
    pub fn get_private_conversation(
        &self,
        ctx: i64,
        peer_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS}
             FROM messages
             WHERE context_id = ?1
               AND channel_id IS NULL
               AND (sender_id = ?2 OR recipient_id = ?2)
             ORDER BY COALESCE(server_timestamp, created_at) ASC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(params![ctx, peer_id, limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Messages of one channel, oldest first.
    pub fn get_channel_messages(
        &self,
        ctx: i64,
        channel_id: i64,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StoredMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS}
             FROM messages
             WHERE context_id = ?1 AND channel_id = ?2
             ORDER BY COALESCE(server_timestamp, created_at) ASC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(params![ctx, channel_id, limit, offset], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Most recent stored display name for a sender, if any. Used as the
    /// authoritative fallback behind the in-memory name cache.
    pub fn last_known_sender_name(&self, ctx: i64, sender_id: i64) -> Result<Option<String>> {
        let mut stmt = self.conn().prepare(
            "SELECT sender_name FROM messages
             WHERE context_id = ?1 AND sender_id = ?2 AND sender_name IS NOT NULL
             ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![ctx, sender_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Migrate rows recorded under a provisional context forward into a
    /// real login context. Rows of other contexts are never touched, and a
    /// row whose `server_id` already exists in the target context stays
    /// behind (logged) rather than violating the dedup key.
    ///
    /// Returns the number of rows migrated.
    pub fn adopt_context(&self, from: i64, to: i64) -> Result<usize> {
        if from == to {
            return Ok(0);
        }

        let migrated = self.conn().execute(
            "UPDATE messages SET context_id = ?2
             WHERE context_id = ?1
               AND (server_id IS NULL OR NOT EXISTS (
                    SELECT 1 FROM messages existing
                    WHERE existing.context_id = ?2
                      AND existing.server_id = messages.server_id))",
            params![from, to],
        )?;

        let left_behind: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE context_id = ?1",
            params![from],
            |row| row.get(0),
        )?;
        if left_behind > 0 {
            tracing::warn!(
                from,
                to,
                left_behind,
                "context adoption left rows behind due to server-id collisions"
            );
        }

        Ok(migrated)
    }
}

/// Map a `rusqlite::Row` to a [`StoredMessage`].
pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let kind_str: String = row.get(4)?;
    let kind = MessageKind::parse(&kind_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message kind: {kind_str}").into(),
        )
    })?;

    let server_ts: Option<String> = row.get(3)?;
    let server_timestamp = server_ts
        .map(|s| parse_rfc3339(&s, 3))
        .transpose()?;

    let created_str: String = row.get(15)?;
    let created_at = parse_rfc3339(&created_str, 15)?;

    Ok(StoredMessage {
        id: row.get(0)?,
        context_id: row.get(1)?,
        server_id: row.get(2)?,
        server_timestamp,
        kind,
        sender_id: row.get(5)?,
        sender_name: row.get(6)?,
        recipient_id: row.get(7)?,
        recipient_name: row.get(8)?,
        channel_id: row.get(9)?,
        content: row.get(10)?,
        audio_path: row.get(11)?,
        transcript: row.get(12)?,
        mime_type: row.get(13)?,
        duration_ms: row.get(14)?,
        created_at,
    })
}

fn parse_rfc3339(s: &str, col: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, Box::new(e))
        })
}
