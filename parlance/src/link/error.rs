//! Link error types for the translation session
//!
//! Variants are grouped by how the caller reacts. Authentication failures
//! are fatal and connection failures are retried with backoff. Expiry
//! drives a reconnect; send rejections are only counted.

use thiserror::Error;

/// Translation link errors
#[derive(Error, Debug)]
pub enum LinkError {
    /// Credentials rejected (HTTP 401/403)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Could not establish the session
    #[error("Failed to connect to translation service: {0}")]
    Connection(String),

    /// Connect or setup handshake took too long
    #[error("Connection timeout after {0}ms")]
    Timeout(u64),

    /// The session ended underneath us
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// One reconnect cycle used up its attempts
    #[error("Failed to reconnect after {0} attempts")]
    RetriesExhausted(u32),

    /// The link gave up for good; create a new one
    #[error("Link is permanently failed after exhausting its retry budget")]
    Exhausted,

    /// Operation needs a connected session
    #[error("Not connected to translation service")]
    NotConnected,

    /// The remote announced the end of the session or the ceiling passed
    #[error("Session expired, reconnection required")]
    SessionExpired,

    /// Expiry is near and auto-reconnect is disabled
    #[error("Session timeout approaching and auto-reconnect disabled")]
    SessionExpiring,

    /// An audio chunk could not be delivered
    #[error("Failed to send audio chunk: {0}")]
    SendRejected(String),

    /// Malformed server message or bad request
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Invalid link configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Failed to serialize or parse a message
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LinkError {
    /// Fatal for reconnection: retrying cannot help
    pub fn is_authentication(&self) -> bool {
        matches!(self, LinkError::Authentication(_))
    }

    /// Connection-level failure absorbed by backoff
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            LinkError::Connection(_)
                | LinkError::Timeout(_)
                | LinkError::ConnectionLost(_)
                | LinkError::RetriesExhausted(_)
                | LinkError::Exhausted
                | LinkError::NotConnected
                | LinkError::WebSocket(_)
        )
    }

    /// The session ceiling was hit or is close
    pub fn is_session_expired(&self) -> bool {
        matches!(self, LinkError::SessionExpired | LinkError::SessionExpiring)
    }

    /// A single chunk failed; the link itself may still be usable
    pub fn is_transfer_error(&self) -> bool {
        matches!(self, LinkError::SendRejected(_))
    }

    /// Whether the link can never connect again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LinkError::Exhausted | LinkError::RetriesExhausted(_) | LinkError::Authentication(_)
        )
    }
}

/// Result type for link operations
pub type LinkResult<T> = Result<T, LinkError>;

impl From<tokio_tungstenite::tungstenite::http::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::http::Error) -> Self {
        LinkError::InvalidConfig(err.to_string())
    }
}
