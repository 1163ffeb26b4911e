use crate::core::config::Credentials;
use crate::core::errors::RecorderError;
use crate::events::{classify, BalanceChangeRecord};
use crate::kernel::codec::{self, Inbound};
use crate::kernel::rest::StreamAuthorizer;
use crate::kernel::ws::{self, WsConfig};
use crate::sink::{RecordSink, TradeRecord};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub rest_base_url: String,
    pub ws_base_url: String,
    /// Forced subscription request fires this long after connect, whether or
    /// not the server has prompted for one.
    pub subscribe_delay: Duration,
    /// `start()` polls the subscribed flag at this interval...
    pub subscribe_poll_interval: Duration,
    /// ...for at most this many iterations before handing control back.
    pub subscribe_poll_limit: u32,
    pub ws: WsConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.mexc.com".to_string(),
            ws_base_url: "wss://wbs.mexc.com/ws".to_string(),
            subscribe_delay: Duration::from_secs(3),
            subscribe_poll_interval: Duration::from_secs(1),
            subscribe_poll_limit: 20,
            ws: WsConfig::default(),
        }
    }
}

/// Result of processing one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Continue,
    /// The server invalidated our listen key; re-enter authorization without
    /// waiting for the transport to close.
    Reconnect,
}

/// How a connection attempt ended.
#[derive(Debug)]
enum CloseKind {
    Peer(Option<(u16, String)>),
    Stopped,
    Reauth,
    Error(String),
}

/// Session state shared across the control surface, the read loop, and the
/// delayed-subscription timer.
struct Shared {
    session_id: AtomicI64,
    running: AtomicBool,
    subscribed: AtomicBool,
    event_count: AtomicU64,
    trade_count: AtomicU64,
    /// Connection-attempt token. A delayed-subscription timer captured under
    /// an older token must not send on the current transport.
    attempt: AtomicU64,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            session_id: AtomicI64::new(0),
            running: AtomicBool::new(false),
            subscribed: AtomicBool::new(false),
            event_count: AtomicU64::new(0),
            trade_count: AtomicU64::new(0),
            attempt: AtomicU64::new(0),
            outbound: Mutex::new(None),
        }
    }

    fn session_id(&self) -> i64 {
        self.session_id.load(Ordering::SeqCst)
    }
}

/// Owns the connection lifecycle state machine: authorization, connect,
/// subscription, steady-state dispatch, and reconnect.
pub struct SessionController {
    config: SessionConfig,
    authorizer: StreamAuthorizer,
    sink: Arc<RecordSink>,
    shared: Arc<Shared>,
}

impl SessionController {
    pub fn new(
        config: SessionConfig,
        credentials: &Credentials,
        sink: Arc<RecordSink>,
    ) -> Result<Self, RecorderError> {
        let authorizer =
            StreamAuthorizer::new(config.rest_base_url.clone(), credentials, sink.clone())?;

        Ok(Self {
            config,
            authorizer,
            sink,
            shared: Arc::new(Shared::new()),
        })
    }

    pub fn session_id(&self) -> i64 {
        self.shared.session_id()
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.subscribed.load(Ordering::SeqCst)
    }

    pub fn event_count(&self) -> u64 {
        self.shared.event_count.load(Ordering::SeqCst)
    }

    pub fn trade_count(&self) -> u64 {
        self.shared.trade_count.load(Ordering::SeqCst)
    }

    /// Start the session: acquire a listen key, launch the connection loop in
    /// the background, then wait (bounded) for the subscription to be
    /// acknowledged.
    ///
    /// A subscription-wait timeout is reported but not fatal; the connection
    /// loop keeps running. Listen-key failure at this stage is returned to
    /// the caller, who decides whether to call `start()` again.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), RecorderError> {
        let session_id = epoch_secs();
        self.shared.session_id.store(session_id, Ordering::SeqCst);
        self.shared.event_count.store(0, Ordering::SeqCst);
        self.shared.trade_count.store(0, Ordering::SeqCst);
        self.shared.subscribed.store(false, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        info!(session_id, "session starting");
        self.record_connection(
            "session_start",
            json!({ "session_id": session_id, "mode": "account_stream_recorder" }),
        );

        let listen_key = self
            .authorizer
            .acquire_listen_key(session_id)
            .await
            .map_err(|e| {
                error!("failed to acquire listen key: {e}");
                e
            })?;
        info!("listen key acquired");

        let config = self.config.clone();
        let authorizer = self.authorizer.clone();
        let sink = self.sink.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            run_loop(config, authorizer, sink, shared, listen_key).await;
        });

        for i in 0..self.config.subscribe_poll_limit {
            sleep(self.config.subscribe_poll_interval).await;

            let subscribed = self.is_subscribed();
            let status = if subscribed { "ACTIVE" } else { "WAITING" };
            info!(
                "{:2}/{}: {} | events: {}",
                i + 1,
                self.config.subscribe_poll_limit,
                status,
                self.event_count()
            );

            if subscribed {
                break;
            }
        }

        if self.is_subscribed() {
            info!("recorder ready: private account events are being captured");
        } else {
            warn!("subscription not confirmed in time; continuing in background");
        }

        Ok(())
    }

    /// Stop the session. Idempotent: the running flag is swapped exactly
    /// once, so a second call records nothing.
    pub fn stop(&self) {
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self
            .shared
            .outbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take()
        {
            let _ = tx.send(Message::Close(None));
        }

        let session_id = self.session_id();
        let duration = epoch_secs().saturating_sub(session_id);
        let trades = self.trade_count();
        let events = self.event_count();

        self.record_connection(
            "session_end",
            json!({
                "duration_seconds": duration,
                "total_trades": trades,
                "total_events": events,
            }),
        );
        info!(duration, trades, events, "session stopped");
    }

    /// Process one inbound text frame: record it to the raw log, advance the
    /// state machine, and send any replies (pong, subscription request) on
    /// `outbound` within this same call.
    pub fn handle_frame(
        &self,
        text: &str,
        outbound: &mpsc::UnboundedSender<Message>,
    ) -> DispatchOutcome {
        dispatch_frame(&self.shared, &self.sink, outbound, text)
    }

    fn record_connection(&self, event_type: &str, details: Value) {
        record_connection(&self.sink, self.session_id(), event_type, details);
    }
}

/// Reconnect loop: one iteration per connection attempt, re-authorizing with
/// a fresh listen key each time the transport closes while running.
async fn run_loop(
    config: SessionConfig,
    authorizer: StreamAuthorizer,
    sink: Arc<RecordSink>,
    shared: Arc<Shared>,
    initial_key: String,
) {
    let mut pending_key = Some(initial_key);
    let mut reconnect_delay = Duration::from_secs(1);

    while shared.running.load(Ordering::SeqCst) {
        let listen_key = match pending_key.take() {
            Some(key) => key,
            None => match authorizer.acquire_listen_key(shared.session_id()).await {
                Ok(key) => key,
                Err(e) => {
                    warn!("listen key re-acquisition failed: {e}");
                    sleep(reconnect_delay).await;
                    reconnect_delay = std::cmp::min(reconnect_delay * 2, Duration::from_secs(60));
                    continue;
                }
            },
        };

        match run_connection(&config, &sink, &shared, &listen_key).await {
            Ok(()) => reconnect_delay = Duration::from_secs(1),
            Err(e) => {
                warn!("connection attempt failed: {e}");
                sleep(reconnect_delay).await;
                reconnect_delay = std::cmp::min(reconnect_delay * 2, Duration::from_secs(60));
            }
        }

        shared.subscribed.store(false, Ordering::SeqCst);

        if shared.running.load(Ordering::SeqCst) {
            record_connection(&sink, shared.session_id(), "reconnect", json!({}));
            info!("reconnecting");
        }
    }
}

/// One connection attempt: connect, arm the delayed subscription, then
/// dispatch inbound frames until the transport closes.
async fn run_connection(
    config: &SessionConfig,
    sink: &Arc<RecordSink>,
    shared: &Arc<Shared>,
    listen_key: &str,
) -> Result<(), crate::core::errors::TransportError> {
    let session_id = shared.session_id();
    if !shared.running.load(Ordering::SeqCst) {
        return Ok(());
    }

    let attempt = shared.attempt.fetch_add(1, Ordering::SeqCst) + 1;
    let url = format!("{}?listenKey={}", config.ws_base_url, listen_key);

    let ws_stream = match ws::connect(&url, &config.ws).await {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            record_connection(sink, session_id, "ws_error", json!({ "error": e.to_string() }));
            return Err(e);
        }
    };

    info!(attempt, "WebSocket connected");
    record_connection(sink, session_id, "ws_opened", json!({ "attempt": attempt }));

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *shared
        .outbound
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(tx.clone());

    // stop() may have raced the connect; it consults the outbound slot, so
    // re-check the flag now that the slot is populated.
    if !shared.running.load(Ordering::SeqCst) {
        let _ = write.send(Message::Close(None)).await;
        *shared
            .outbound
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
        record_connection(sink, session_id, "ws_closed", json!({ "reason": "stopped" }));
        return Ok(());
    }

    // Forced subscription after a fixed delay: some servers accept the
    // connection but never prompt for one. The attempt token invalidates the
    // timer if the connection has already been replaced.
    {
        let shared = shared.clone();
        let sink = sink.clone();
        let tx = tx.clone();
        let delay = config.subscribe_delay;
        tokio::spawn(async move {
            sleep(delay).await;
            if shared.running.load(Ordering::SeqCst)
                && shared.attempt.load(Ordering::SeqCst) == attempt
            {
                send_subscription(&sink, shared.session_id(), &tx);
            }
        });
    }

    let close = loop {
        tokio::select! {
            outbound = rx.recv() => {
                match outbound {
                    Some(msg) => {
                        let stopping = matches!(msg, Message::Close(_));
                        if let Err(e) = write.send(msg).await {
                            break CloseKind::Error(e.to_string());
                        }
                        if stopping {
                            break CloseKind::Stopped;
                        }
                    }
                    // All senders dropped; cannot happen while tx is held here.
                    None => break CloseKind::Stopped,
                }
            }
            inbound = read.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if dispatch_frame(shared, sink, &tx, &text) == DispatchOutcome::Reconnect {
                            break CloseKind::Reauth;
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match String::from_utf8(data) {
                            Ok(text) => {
                                if dispatch_frame(shared, sink, &tx, &text)
                                    == DispatchOutcome::Reconnect
                                {
                                    break CloseKind::Reauth;
                                }
                            }
                            Err(e) => warn!("discarding non-UTF-8 binary frame: {e}"),
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = write.send(Message::Pong(payload)).await {
                            break CloseKind::Error(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break CloseKind::Peer(frame.map(|f| (f.code.into(), f.reason.to_string())));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break CloseKind::Error(e.to_string()),
                    None => break CloseKind::Peer(None),
                }
            }
        }
    };

    *shared
        .outbound
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = None;
    shared.subscribed.store(false, Ordering::SeqCst);

    let details = match &close {
        CloseKind::Peer(Some((code, reason))) => json!({ "code": code, "reason": reason }),
        CloseKind::Peer(None) => json!({ "code": Value::Null, "reason": Value::Null }),
        CloseKind::Stopped => json!({ "reason": "stopped" }),
        CloseKind::Reauth => json!({ "reason": "listen key invalidated" }),
        CloseKind::Error(e) => json!({ "reason": "error", "error": e }),
    };
    warn!(?close, "WebSocket closed");
    record_connection(sink, session_id, "ws_closed", details);

    Ok(())
}

/// Dispatch one inbound text frame. Raw logging always happens first; replies
/// (pong, subscription request) are sent within this same call.
fn dispatch_frame(
    shared: &Shared,
    sink: &RecordSink,
    outbound: &mpsc::UnboundedSender<Message>,
    text: &str,
) -> DispatchOutcome {
    let session_id = shared.session_id();

    let value = match codec::parse_frame(text) {
        Ok(value) => value,
        Err(e) => {
            warn!("discarding malformed frame: {e}");
            record_connection(sink, session_id, "parse_error", json!({ "error": e.to_string() }));
            return DispatchOutcome::Continue;
        }
    };

    let event_id = shared.event_count.fetch_add(1, Ordering::SeqCst);
    if let Err(e) = sink.append_raw(session_id, event_id, &value) {
        warn!("raw log write failed: {e}");
    }
    debug!(event_id, "inbound frame");

    match codec::classify_frame(&value) {
        Inbound::SubscriptionAck { id, msg } => {
            if id == codec::SUBSCRIPTION_ID && msg.contains(codec::PRIVATE_CHANNEL) {
                // Only the unsubscribed -> subscribed edge is recorded.
                if !shared.subscribed.swap(true, Ordering::SeqCst) {
                    info!("private account subscription active");
                    record_connection(sink, session_id, "subscription_confirmed", value);
                }
            }
        }
        Inbound::AccountUpdate {
            channel,
            data,
            event_time,
        } => {
            if channel == codec::PRIVATE_CHANNEL {
                match serde_json::from_value::<BalanceChangeRecord>(data) {
                    Ok(record) => {
                        let kind = classify(&record);
                        let trade_id = shared.trade_count.fetch_add(1, Ordering::SeqCst);
                        let trade =
                            TradeRecord::new(session_id, trade_id, &record, &kind, event_time, value);
                        info!(
                            trade_id,
                            asset = %trade.asset,
                            operation = %trade.operation,
                            event = %trade.event_type,
                            free_delta = %trade.free_delta,
                            locked_delta = %trade.locked_delta,
                            "trade event"
                        );
                        if let Err(e) = sink.append_trade(&trade) {
                            warn!("trade log write failed: {e}");
                        }
                    }
                    Err(e) => {
                        warn!("malformed account update: {e}");
                        record_connection(
                            sink,
                            session_id,
                            "parse_error",
                            json!({ "error": e.to_string() }),
                        );
                    }
                }
            }
        }
        Inbound::Heartbeat { ping } => {
            // Reply in this same dispatch step; a deferred pong risks a
            // heartbeat-timeout disconnect.
            if outbound.send(codec::pong(ping)).is_err() {
                warn!("pong not sent: connection gone");
            }
            debug!(ping, "ping -> pong");
        }
        Inbound::ServerNotice { code, msg } => match msg.as_str() {
            "method is empty." => {
                info!("server requests subscription");
                send_subscription(sink, session_id, outbound);
            }
            "Wrong listen key" => {
                warn!("listen key invalidated by server; forcing reconnect");
                return DispatchOutcome::Reconnect;
            }
            "PONG" => debug!("PONG"),
            _ => info!(code, msg = %msg, "server notice"),
        },
        Inbound::Unrecognized => {}
    }

    DispatchOutcome::Continue
}

fn send_subscription(sink: &RecordSink, session_id: i64, outbound: &mpsc::UnboundedSender<Message>) {
    let request = codec::subscription_request();
    let details = match &request {
        Message::Text(text) => serde_json::from_str(text).unwrap_or(Value::Null),
        _ => Value::Null,
    };

    if outbound.send(request).is_err() {
        warn!("subscription request not sent: connection gone");
        return;
    }

    info!("subscription request sent");
    record_connection(sink, session_id, "subscription_sent", details);
}

fn record_connection(sink: &RecordSink, session_id: i64, event_type: &str, details: Value) {
    if let Err(e) = sink.append_connection(session_id, event_type, details) {
        warn!("connection log write failed: {e}");
    }
}

fn epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
