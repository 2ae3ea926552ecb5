//! Error types returned by the notification client.

use crate::codec::CodecError;

/// Failures opening or driving the underlying transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid endpoint {url}: {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Errors surfaced by [`NotificationClient`](crate::client::NotificationClient).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport failed before the connection opened.
    #[error("connect failed: {0}")]
    Handshake(#[from] TransportError),

    /// `disconnect()` was called while this connect attempt was in flight.
    #[error("connect attempt cancelled by disconnect")]
    Cancelled,

    /// A command was sent while the connection was not open.
    #[error("not connected")]
    NotConnected,

    /// The outbound buffer is full; the command was dropped.
    #[error("outbound buffer full, command dropped")]
    Backpressure,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
