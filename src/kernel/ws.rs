use crate::core::errors::TransportError;
use std::time::Duration;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::instrument;

pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

#[derive(Debug, Clone)]
pub struct WsConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
        }
    }
}

/// Open a WebSocket connection with a bounded connect timeout.
#[instrument(skip(config), fields(url = %url))]
pub async fn connect(url: &str, config: &WsConfig) -> Result<WsStream, TransportError> {
    let connect_timeout = Duration::from_millis(config.connect_timeout_ms);

    let (ws_stream, _) = tokio::time::timeout(connect_timeout, connect_async(url))
        .await
        .map_err(|_| TransportError::ConnectTimeout)?
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

    Ok(ws_stream)
}
