//! Deduplicating merge of server-confirmed messages.
//!
//! The same real-world message reaches the store through two independent
//! channels: an optimistic local row written when the user hit "send", and
//! a later server-confirmed echo (push event or bulk sync) carrying a
//! server id and timestamp. [`Database::merge_incoming`] reconciles the two
//! into exactly one row, in this order:
//!
//! 1. a row already carrying the incoming server id: no-op when the fields
//!    agree; when they disagree the server id has been reused for a
//!    different message -- log the anomaly and continue as if no server id
//!    were known;
//! 2. a pending local row (no server id) with matching sender, route, kind
//!    and body: confirm it in place, filling only still-empty fields;
//! 3. an exact duplicate row (same sender, route, kind, body, timestamp):
//!    no-op, guards against redundant delivery;
//! 4. otherwise insert a new row.
//!
//! Audio bodies are compared by a normalized file reference (query string
//! and directory prefix stripped, case-insensitive), since local and server
//! paths differ by base URL.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::params;
use tracing::warn;

use charla_proto::{IncomingMessage, MessageKind};

use crate::database::Database;
use crate::error::Result;
use crate::messages::{row_to_message, MESSAGE_COLS};
use crate::models::StoredMessage;

/// What one merge application did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// This server id is already stored with agreeing fields.
    AlreadyApplied,
    /// A pending local row was confirmed in place.
    Reconciled { id: i64 },
    /// An identical row (by sender, route, kind, body, timestamp) already
    /// exists; redundant delivery.
    Duplicate,
    /// A new row was inserted.
    Inserted { id: i64 },
    /// A new row was inserted *without* the incoming server id because that
    /// id is already bound to a different message (server anomaly).
    InsertedAnomalous { id: i64 },
}

impl MergeOutcome {
    /// Rowid of the row this merge created or changed, if any.
    pub fn changed_row(&self) -> Option<i64> {
        match self {
            Self::Reconciled { id } | Self::Inserted { id } | Self::InsertedAnomalous { id } => {
                Some(*id)
            }
            Self::AlreadyApplied | Self::Duplicate => None,
        }
    }
}

/// Result of a bulk-sync merge.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Rows created or confirmed.
    pub applied: usize,
    /// Items that were already present (idempotent re-delivery).
    pub unchanged: usize,
    /// Items that failed to persist (logged, skipped).
    pub failed: usize,
    /// Distinct channels named by the batch, regardless of per-item outcome.
    pub touched_channels: BTreeSet<i64>,
    /// Distinct private-conversation peers named by the batch.
    pub touched_peers: BTreeSet<i64>,
}

impl Database {
    /// Merge one server-confirmed message into the context's history.
    /// Safe to re-apply: a second application of the same message is a
    /// no-op.
    pub fn merge_incoming(&self, ctx: i64, msg: &IncomingMessage) -> Result<MergeOutcome> {
        let mut effective_server_id = msg.server_id;

        if let Some(server_id) = msg.server_id {
            if let Some(existing) = self.find_by_server_id(ctx, server_id)? {
                if rows_agree(&existing, msg) {
                    return Ok(MergeOutcome::AlreadyApplied);
                }
                warn!(
                    ctx,
                    server_id,
                    existing_row = existing.id,
                    "server id reused for a different message; storing without it"
                );
                effective_server_id = None;
            }
        }

        if let Some(pending) = self.find_pending(ctx, msg)? {
            self.confirm_pending(pending.id, effective_server_id, msg)?;
            return Ok(MergeOutcome::Reconciled { id: pending.id });
        }

        if self.exact_duplicate_exists(ctx, msg)? {
            return Ok(MergeOutcome::Duplicate);
        }

        let id = self.insert_confirmed(ctx, effective_server_id, msg)?;
        if effective_server_id == msg.server_id {
            Ok(MergeOutcome::Inserted { id })
        } else {
            Ok(MergeOutcome::InsertedAnomalous { id })
        }
    }

    /// Apply a bulk sync inside one transaction, continuing past per-item
    /// failures. The touched channel/peer sets cover every item, whether or
    /// not it changed anything -- notification policy for bulk syncs is
    /// per distinct id, not per row.
    pub fn merge_batch(&self, ctx: i64, items: &[IncomingMessage]) -> Result<BatchReport> {
        let tx = self.conn().unchecked_transaction()?;
        let mut report = BatchReport::default();

        for msg in items {
            if let Some(channel_id) = msg.channel_id {
                report.touched_channels.insert(channel_id);
            } else if let Some(peer) = other_party(ctx, msg) {
                report.touched_peers.insert(peer);
            }

            match self.merge_incoming(ctx, msg) {
                Ok(outcome) => {
                    if outcome.changed_row().is_some() {
                        report.applied += 1;
                    } else {
                        report.unchanged += 1;
                    }
                }
                Err(e) => {
                    warn!(ctx, error = %e, "failed to merge one sync item; continuing");
                    report.failed += 1;
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn find_by_server_id(&self, ctx: i64, server_id: i64) -> Result<Option<StoredMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE context_id = ?1 AND server_id = ?2"
        ))?;
        let mut rows = stmt.query_map(params![ctx, server_id], row_to_message)?;
        rows.next().transpose().map_err(Into::into)
    }

    /// First pending (unconfirmed) row matching sender, route, kind and
    /// body. Body comparison happens here rather than in SQL because audio
    /// paths need normalization.
    fn find_pending(&self, ctx: i64, msg: &IncomingMessage) -> Result<Option<StoredMessage>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE context_id = ?1
               AND server_id IS NULL
               AND sender_id = ?2
               AND kind = ?3
               AND ((?4 IS NOT NULL AND channel_id = ?4)
                 OR (?4 IS NULL AND channel_id IS NULL AND recipient_id = ?5))
             ORDER BY id ASC"
        ))?;

        let rows = stmt.query_map(
            params![
                ctx,
                msg.sender_id,
                msg.kind.as_str(),
                msg.channel_id,
                msg.recipient_id
            ],
            row_to_message,
        )?;

        for row in rows {
            let row = row?;
            if bodies_match(&row, msg) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }

    /// Confirm a pending row: attach server id/timestamp and fill any
    /// still-empty fields. Fields that already hold a value are kept.
    fn confirm_pending(
        &self,
        row_id: i64,
        server_id: Option<i64>,
        msg: &IncomingMessage,
    ) -> Result<()> {
        self.conn().execute(
            "UPDATE messages SET
                 server_id        = COALESCE(server_id, ?2),
                 server_timestamp = COALESCE(server_timestamp, ?3),
                 sender_name      = COALESCE(sender_name, ?4),
                 recipient_name   = COALESCE(recipient_name, ?5),
                 content          = COALESCE(content, ?6),
                 audio_path       = COALESCE(audio_path, ?7),
                 transcript       = COALESCE(transcript, ?8),
                 mime_type        = COALESCE(mime_type, ?9),
                 duration_ms      = COALESCE(duration_ms, ?10)
             WHERE id = ?1",
            params![
                row_id,
                server_id,
                msg.server_timestamp.map(|t| t.to_rfc3339()),
                msg.sender_name,
                msg.recipient_name,
                msg.content,
                msg.audio_path,
                msg.transcript,
                msg.mime_type,
                msg.duration_ms,
            ],
        )?;
        Ok(())
    }

    fn exact_duplicate_exists(&self, ctx: i64, msg: &IncomingMessage) -> Result<bool> {
        let ts = msg.server_timestamp.map(|t| t.to_rfc3339());
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM messages
             WHERE context_id = ?1
               AND sender_id = ?2
               AND kind = ?3
               AND ((?4 IS NOT NULL AND channel_id = ?4)
                 OR (?4 IS NULL AND channel_id IS NULL AND recipient_id = ?5))
               AND ((?6 IS NULL AND server_timestamp IS NULL)
                 OR server_timestamp = ?6)"
        ))?;

        let rows = stmt.query_map(
            params![
                ctx,
                msg.sender_id,
                msg.kind.as_str(),
                msg.channel_id,
                msg.recipient_id,
                ts
            ],
            row_to_message,
        )?;

        for row in rows {
            if bodies_match(&row?, msg) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn insert_confirmed(
        &self,
        ctx: i64,
        server_id: Option<i64>,
        msg: &IncomingMessage,
    ) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO messages (context_id, server_id, server_timestamp, kind,
                 sender_id, sender_name, recipient_id, recipient_name, channel_id,
                 content, audio_path, transcript, mime_type, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                ctx,
                server_id,
                msg.server_timestamp.map(|t| t.to_rfc3339()),
                msg.kind.as_str(),
                msg.sender_id,
                msg.sender_name,
                msg.recipient_id,
                msg.recipient_name,
                msg.channel_id,
                msg.content,
                msg.audio_path,
                msg.transcript,
                msg.mime_type,
                msg.duration_ms,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }
}

/// The private-conversation peer an item belongs to, seen from `ctx`.
fn other_party(ctx: i64, msg: &IncomingMessage) -> Option<i64> {
    if msg.sender_id == ctx {
        msg.recipient_id
    } else {
        Some(msg.sender_id)
    }
}

/// Whether a stored row and an incoming message describe the same logical
/// message (used for the already-applied check).
fn rows_agree(row: &StoredMessage, msg: &IncomingMessage) -> bool {
    row.sender_id == msg.sender_id
        && row.recipient_id == msg.recipient_id
        && row.channel_id == msg.channel_id
        && row.kind == msg.kind
        && bodies_match(row, msg)
}

fn bodies_match(row: &StoredMessage, msg: &IncomingMessage) -> bool {
    match msg.kind {
        MessageKind::Text => row.content == msg.content,
        MessageKind::Audio => match (&row.audio_path, &msg.audio_path) {
            (Some(a), Some(b)) => normalize_audio_path(a) == normalize_audio_path(b),
            (None, None) => true,
            _ => false,
        },
    }
}

/// Compare audio file references by their bare file name: strip the query
/// string and any directory prefix, case-insensitively. Local and server
/// paths for the same file differ by base URL.
pub(crate) fn normalize_audio_path(path: &str) -> String {
    let without_query = path.split('?').next().unwrap_or(path);
    let file_name = without_query
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(without_query);
    file_name.to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{DateTime, TimeZone, Utc};

    use crate::models::LocalDraft;

    const CTX: i64 = 1;

    fn open_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (dir, db)
    }

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
    }

    fn text_msg(
        server_id: Option<i64>,
        sender: i64,
        recipient: Option<i64>,
        channel: Option<i64>,
        content: &str,
    ) -> IncomingMessage {
        IncomingMessage {
            server_id,
            server_timestamp: Some(ts()),
            kind: MessageKind::Text,
            sender_id: sender,
            sender_name: None,
            recipient_id: recipient,
            recipient_name: None,
            channel_id: channel,
            content: Some(content.to_string()),
            audio_path: None,
            transcript: None,
            mime_type: None,
            duration_ms: None,
        }
    }

    fn count_rows(db: &Database) -> i64 {
        db.conn()
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_same_server_id_twice_is_idempotent() {
        let (_dir, db) = open_db();
        let msg = text_msg(Some(42), 2, Some(CTX), None, "hola");

        let first = db.merge_incoming(CTX, &msg).unwrap();
        assert!(matches!(first, MergeOutcome::Inserted { .. }));

        let second = db.merge_incoming(CTX, &msg).unwrap();
        assert_eq!(second, MergeOutcome::AlreadyApplied);
        assert_eq!(count_rows(&db), 1);

        // Byte-identical after the second application.
        let rows = db.get_private_conversation(CTX, 2, 50, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].server_id, Some(42));
        assert_eq!(rows[0].content.as_deref(), Some("hola"));
    }

    #[test]
    fn test_local_echo_reconciles_to_one_row() {
        let (_dir, db) = open_db();

        // User hit "send": optimistic local row, no server id yet.
        let local_id = db
            .insert_local(CTX, &LocalDraft::text_to_user(CTX, 9, "hi"))
            .unwrap();

        // Server echo for the same logical message.
        let echo = text_msg(Some(42), CTX, Some(9), None, "hi");
        let outcome = db.merge_incoming(CTX, &echo).unwrap();
        assert_eq!(outcome, MergeOutcome::Reconciled { id: local_id });

        let rows = db.get_private_conversation(CTX, 9, 50, 0).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].server_id, Some(42));
        assert_eq!(rows[0].server_timestamp, Some(ts()));
    }

    #[test]
    fn test_server_id_reuse_inserts_anomalous_row() {
        let (_dir, db) = open_db();

        db.merge_incoming(CTX, &text_msg(Some(7), 1, Some(2), None, "a"))
            .unwrap();

        // Same server id, logically different message.
        let outcome = db
            .merge_incoming(CTX, &text_msg(Some(7), 1, Some(3), None, "b"))
            .unwrap();
        assert!(matches!(outcome, MergeOutcome::InsertedAnomalous { .. }));
        assert_eq!(count_rows(&db), 2);

        let second = db.get_private_conversation(CTX, 3, 50, 0).unwrap();
        assert_eq!(second.len(), 1);
        assert!(second[0].server_id.is_none());
        assert_eq!(second[0].content.as_deref(), Some("b"));
    }

    #[test]
    fn test_redundant_delivery_without_server_id() {
        let (_dir, db) = open_db();
        let msg = text_msg(None, 2, Some(CTX), None, "again");

        assert!(matches!(
            db.merge_incoming(CTX, &msg).unwrap(),
            MergeOutcome::Inserted { .. }
        ));
        assert_eq!(db.merge_incoming(CTX, &msg).unwrap(), MergeOutcome::Duplicate);
        assert_eq!(count_rows(&db), 1);
    }

    #[test]
    fn test_audio_paths_normalized_for_reconciliation() {
        let (_dir, db) = open_db();

        let draft = LocalDraft {
            kind: Some(MessageKind::Audio),
            sender_id: CTX,
            recipient_id: Some(4),
            audio_path: Some(r"C:\recordings\Voice1.WAV".to_string()),
            ..LocalDraft::default()
        };
        let local_id = db.insert_local(CTX, &draft).unwrap();

        let echo = IncomingMessage {
            server_id: Some(11),
            server_timestamp: Some(ts()),
            kind: MessageKind::Audio,
            sender_id: CTX,
            sender_name: None,
            recipient_id: Some(4),
            recipient_name: None,
            channel_id: None,
            content: None,
            audio_path: Some("https://files.example/uploads/voice1.wav?token=abc".to_string()),
            transcript: Some("hola".to_string()),
            mime_type: Some("audio/wav".to_string()),
            duration_ms: Some(1200),
        };

        let outcome = db.merge_incoming(CTX, &echo).unwrap();
        assert_eq!(outcome, MergeOutcome::Reconciled { id: local_id });

        let rows = db.get_private_conversation(CTX, 4, 50, 0).unwrap();
        assert_eq!(rows.len(), 1);
        // Existing value kept, empty fields filled in.
        assert_eq!(
            rows[0].audio_path.as_deref(),
            Some(r"C:\recordings\Voice1.WAV")
        );
        assert_eq!(rows[0].transcript.as_deref(), Some("hola"));
        assert_eq!(rows[0].duration_ms, Some(1200));
    }

    #[test]
    fn test_confirm_fills_without_overwriting() {
        let (_dir, db) = open_db();

        let mut draft = LocalDraft::text_to_user(CTX, 2, "hi");
        draft.sender_name = Some("Me".to_string());
        db.insert_local(CTX, &draft).unwrap();

        let mut echo = text_msg(Some(5), CTX, Some(2), None, "hi");
        echo.sender_name = Some("Someone Else".to_string());
        db.merge_incoming(CTX, &echo).unwrap();

        let rows = db.get_private_conversation(CTX, 2, 50, 0).unwrap();
        assert_eq!(rows[0].sender_name.as_deref(), Some("Me"));
        assert_eq!(rows[0].server_id, Some(5));
    }

    #[test]
    fn test_batch_inserts_only_new_rows_and_reports_touched() {
        let (_dir, db) = open_db();

        // Two rows already stored.
        db.merge_incoming(CTX, &text_msg(Some(1), 2, Some(CTX), None, "a"))
            .unwrap();
        db.merge_incoming(CTX, &text_msg(Some(2), 2, Some(CTX), None, "b"))
            .unwrap();

        let items = vec![
            text_msg(Some(1), 2, Some(CTX), None, "a"), // duplicate
            text_msg(Some(2), 2, Some(CTX), None, "b"), // duplicate
            text_msg(Some(3), 2, Some(CTX), None, "c"),
            text_msg(Some(4), CTX, None, Some(8), "d"),
        ];

        let report = db.merge_batch(CTX, &items).unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(report.unchanged, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(count_rows(&db), 4);

        // Distinct touched ids, independent of per-item outcome.
        assert_eq!(report.touched_peers.into_iter().collect::<Vec<_>>(), vec![2]);
        assert_eq!(
            report.touched_channels.into_iter().collect::<Vec<_>>(),
            vec![8]
        );
    }

    #[test]
    fn test_normalize_audio_path() {
        assert_eq!(normalize_audio_path("/a/b/Sound.WAV?sig=1"), "sound.wav");
        assert_eq!(normalize_audio_path(r"C:\x\Sound.wav"), "sound.wav");
        assert_eq!(
            normalize_audio_path("https://h/p/q/sound.wav"),
            "sound.wav"
        );
        assert_eq!(normalize_audio_path("sound.wav"), "sound.wav");
    }
}
