use thiserror::Error;

/// Errors produced while encoding or decoding protocol lines.
#[derive(Error, Debug)]
pub enum ProtoError {
    /// The line is not a valid JSON object.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The envelope carries an empty command name.
    #[error("Envelope command must not be empty")]
    EmptyCommand,

    /// The encoded line would contain an embedded newline.
    #[error("Envelope must encode to a single line")]
    EmbeddedNewline,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ProtoError>;
