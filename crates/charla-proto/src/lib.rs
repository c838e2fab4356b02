//! # charla-proto
//!
//! Wire vocabulary for the charla line protocol: one JSON object per line,
//! shaped `{"command":"UPPER_SNAKE_NAME","payload":<object|array|null>}`.
//!
//! The crate owns the envelope codec, the command name constants, tolerant
//! field access over `serde_json::Value`, and the typed entities parsed out
//! of responses and push events. It never touches the network.

pub mod commands;
pub mod envelope;
pub mod events;
pub mod fields;
pub mod types;

mod error;

pub use envelope::Envelope;
pub use error::{ProtoError, Result};
pub use events::{IncomingMessage, Push, SyncBatch};
pub use types::{ChannelInfo, Contact, Invitation, LoginOutcome, MessageKind};
