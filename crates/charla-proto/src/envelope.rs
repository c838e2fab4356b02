//! The wire envelope: one JSON object per line.
//!
//! Every outbound action and every inbound event is a single newline-free
//! JSON object with a `command` name and an optional `payload`. Payload
//! objects keep their key order (serde_json `preserve_order`), so an
//! envelope survives a decode/encode round trip byte-for-byte.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtoError, Result};

/// A single protocol event: `{"command":"NAME","payload":...}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    /// Upper-snake command name. Never empty.
    pub command: String,
    /// Flat field map, array, or `null` depending on the verb.
    #[serde(default)]
    pub payload: Option<Value>,
}

impl Envelope {
    /// Create an envelope with no payload (`payload: null` on the wire).
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            payload: None,
        }
    }

    /// Create an envelope carrying the given payload value.
    pub fn with_payload(command: impl Into<String>, payload: Value) -> Self {
        Self {
            command: command.into(),
            payload: Some(payload),
        }
    }

    /// Encode to a single wire line (without the terminating newline; the
    /// transport appends exactly one).
    pub fn to_line(&self) -> Result<String> {
        if self.command.is_empty() {
            return Err(ProtoError::EmptyCommand);
        }
        let line = serde_json::to_string(self)?;
        // serde_json escapes control characters inside strings, so a raw
        // newline here means the envelope itself is broken.
        if line.contains('\n') {
            return Err(ProtoError::EmbeddedNewline);
        }
        Ok(line)
    }

    /// Decode one inbound line.
    pub fn parse(line: &str) -> Result<Self> {
        let env: Envelope = serde_json::from_str(line.trim_end())?;
        if env.command.is_empty() {
            return Err(ProtoError::EmptyCommand);
        }
        Ok(env)
    }

    /// Command name of a line, without decoding the whole payload tree.
    ///
    /// Returns `None` for lines that are not valid envelopes; callers that
    /// only route by command (the correlator) use this.
    pub fn peek_command(line: &str) -> Option<String> {
        Envelope::parse(line).ok().map(|e| e.command)
    }
}
