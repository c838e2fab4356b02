//! # charla-store
//!
//! Local message storage for the charla client, backed by SQLite.
//!
//! Rows are partitioned by a per-login user context, and every write path
//! funnels through the deduplicating merge in [`dedup`], which reconciles
//! optimistic local sends with their server-confirmed echoes. The merge is
//! idempotent: re-applying a server-confirmed message is a no-op.

pub mod database;
pub mod dedup;
pub mod messages;
pub mod migrations;
pub mod models;

mod error;

pub use database::Database;
pub use dedup::{BatchReport, MergeOutcome};
pub use error::StoreError;
pub use models::*;
