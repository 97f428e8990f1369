//! Error types for the network client.

use std::time::Duration;

use crate::envelope::EnvelopeError;
use crate::framing::FrameError;

/// Failures of the underlying byte transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Socket-level I/O failure (DNS, connect, read, write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket handshake or protocol failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// The connect attempt did not finish in time.
    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    /// The connect attempt was abandoned by a local disconnect.
    #[error("connect cancelled")]
    Cancelled,
}

/// Main error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The address is not of the form `host:port`.
    #[error("invalid address {0:?}, expected host:port")]
    InvalidAddress(String),

    /// No connection is open to send on.
    #[error("not connected")]
    NotConnected,

    /// Framing failure (oversized frame).
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Envelope encoding failure.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Transport failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The HTTP fallback has no base URL configured.
    #[error("HTTP fallback is not configured")]
    HttpNotConfigured,

    /// The HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using [`NetError`].
pub type Result<T> = std::result::Result<T, NetError>;
