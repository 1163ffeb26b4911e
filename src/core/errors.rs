use thiserror::Error;

/// Failures while exchanging credentials for a stream listen key.
///
/// The authorizer never retries internally; the session controller owns the
/// retry decision.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("listen key rejected: status {status}: {body}")]
    ServerRejected { status: u16, body: String },

    #[error("listen key transport failure: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("WebSocket connection timeout")]
    ConnectTimeout,

    #[error("WebSocket connection failed: {0}")]
    ConnectFailed(String),

    #[error("WebSocket not connected")]
    NotConnected,

    #[error("failed to send WebSocket message: {0}")]
    Send(String),

    #[error("WebSocket closed: code {code:?}, reason {reason:?}")]
    Closed {
        code: Option<u16>,
        reason: Option<String>,
    },
}

/// Malformed inbound payload. Recorded and swallowed by the read loop.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("invalid JSON frame: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid UTF-8 in binary frame: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("malformed account update: {0}")]
    AccountUpdate(String),
}

/// Top-level error surface for the binary and `start()`.
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::core::config::ConfigError),

    #[error("authorization error: {0}")]
    Auth(#[from] AuthError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("record sink error: {0}")]
    Sink(#[from] crate::sink::SinkError),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
