use crate::core::errors::ParseError;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

/// Channel identifier of the private account feed.
pub const PRIVATE_CHANNEL: &str = "spot@private.account.v3.api";

/// Id used for the one subscription request this client ever sends.
pub const SUBSCRIPTION_ID: i64 = 1;

/// Closed set of inbound message kinds on the private stream.
///
/// Every frame is classified into exactly one variant before any further
/// handling; the shape checks mirror the keys the server actually sends
/// (`id` for request acks, `c` for channel-tagged pushes, `ping` for
/// heartbeats, `code` for notices).
#[derive(Debug, Clone)]
pub enum Inbound {
    SubscriptionAck {
        id: i64,
        msg: String,
    },
    AccountUpdate {
        channel: String,
        data: Value,
        event_time: Option<i64>,
    },
    Heartbeat {
        ping: i64,
    },
    ServerNotice {
        code: i64,
        msg: String,
    },
    Unrecognized,
}

/// Parse one raw text frame into JSON.
pub fn parse_frame(text: &str) -> Result<Value, ParseError> {
    Ok(serde_json::from_str(text)?)
}

/// Classify a parsed frame into the closed [`Inbound`] set.
///
/// Heartbeats are checked before notices so a ping is never delayed behind
/// notice handling.
#[must_use]
pub fn classify_frame(value: &Value) -> Inbound {
    if let Some(id) = value.get("id").and_then(Value::as_i64) {
        let msg = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Inbound::SubscriptionAck { id, msg };
    }

    if let Some(channel) = value.get("c").and_then(Value::as_str) {
        return Inbound::AccountUpdate {
            channel: channel.to_string(),
            data: value.get("d").cloned().unwrap_or(Value::Null),
            event_time: value.get("t").and_then(Value::as_i64),
        };
    }

    if let Some(ping) = value.get("ping").and_then(Value::as_i64) {
        return Inbound::Heartbeat { ping };
    }

    if let Some(code) = value.get("code").and_then(Value::as_i64) {
        let msg = value
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return Inbound::ServerNotice { code, msg };
    }

    Inbound::Unrecognized
}

/// Encode the private-account subscription request.
#[must_use]
pub fn subscription_request() -> Message {
    let subscription = json!({
        "method": "SUBSCRIPTION",
        "params": [PRIVATE_CHANNEL],
        "id": SUBSCRIPTION_ID
    });
    Message::Text(subscription.to_string())
}

/// Encode the heartbeat reply for an inbound `{"ping": n}`.
#[must_use]
pub fn pong(n: i64) -> Message {
    Message::Text(json!({ "pong": n }).to_string())
}
