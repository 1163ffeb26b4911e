use crate::core::config::Credentials;
use crate::core::errors::AuthError;
use crate::kernel::signer;
use crate::sink::RecordSink;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

const LISTEN_KEY_ENDPOINT: &str = "/api/v3/userDataStream";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct ListenKeyResponse {
    #[serde(rename = "listenKey")]
    listen_key: Option<String>,
}

/// Exchanges the signed credentials for a short-lived stream listen key.
///
/// One blocking-style call per invocation; never retries internally. The
/// session controller owns the retry policy.
#[derive(Clone)]
pub struct StreamAuthorizer {
    client: Client,
    base_url: String,
    api_key: Secret<String>,
    api_secret: Secret<String>,
    sink: Arc<RecordSink>,
}

impl std::fmt::Debug for StreamAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAuthorizer")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl StreamAuthorizer {
    pub fn new(
        base_url: String,
        credentials: &Credentials,
        sink: Arc<RecordSink>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: credentials.api_key.clone(),
            api_secret: credentials.api_secret.clone(),
            sink,
        })
    }

    /// Acquire a listen key for the private account stream.
    ///
    /// Every outcome is recorded to the connection log; the key itself is
    /// never written anywhere, only its length.
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    pub async fn acquire_listen_key(&self, session_id: i64) -> Result<String, AuthError> {
        let timestamp = signer::timestamp_ms();
        let params = [("timestamp", timestamp.to_string())];
        let signature = signer::sign(self.api_secret.expose_secret(), &params);

        let url = format!(
            "{}{}?timestamp={}&signature={}",
            self.base_url, LISTEN_KEY_ENDPOINT, timestamp, signature
        );

        let response = self
            .client
            .post(&url)
            .header("X-MEXC-APIKEY", self.api_key.expose_secret())
            .send()
            .await
            .map_err(|e| self.transport_failure(session_id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body = truncate(&body, 200);
            self.record_event(
                session_id,
                "listenkey_error",
                json!({ "status": status.as_u16(), "response": body }),
            );
            return Err(AuthError::ServerRejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ListenKeyResponse = response
            .json()
            .await
            .map_err(|e| self.transport_failure(session_id, e.to_string()))?;

        match parsed.listen_key {
            Some(listen_key) => {
                self.record_event(
                    session_id,
                    "listenkey_success",
                    json!({ "length": listen_key.len() }),
                );
                Ok(listen_key)
            }
            None => Err(self.transport_failure(
                session_id,
                "response body missing listenKey field".to_string(),
            )),
        }
    }

    fn transport_failure(&self, session_id: i64, message: String) -> AuthError {
        self.record_event(session_id, "listenkey_exception", json!({ "error": message }));
        AuthError::Transport(message)
    }

    fn record_event(&self, session_id: i64, event_type: &str, details: serde_json::Value) {
        if let Err(e) = self.sink.append_connection(session_id, event_type, details) {
            warn!("connection log write failed: {e}");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
