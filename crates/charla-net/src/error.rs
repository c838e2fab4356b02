use std::time::Duration;

use thiserror::Error;

/// Errors produced by the connection layer.
///
/// Response timeouts are deliberately *not* here: an absent response is a
/// defined outcome (`Option::None`) every caller must handle, not an error.
#[derive(Error, Debug)]
pub enum NetError {
    /// Could not establish the connection.
    #[error("Failed to connect: {0}")]
    Connect(std::io::Error),

    /// The connect attempt did not complete within the configured bound.
    #[error("Connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A send was attempted on a closed (or never opened) transport.
    #[error("Not connected")]
    NotConnected,

    /// I/O failure on an established connection.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The caller tried to send a multi-line payload.
    #[error("A wire line must not contain embedded newlines")]
    InvalidLine,
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NetError>;
