use mexc_stream_recorder::{
    Credentials, DispatchOutcome, RecordSink, SessionConfig, SessionController,
};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

const PRIVATE_CHANNEL: &str = "spot@private.account.v3.api";

/// Controller wired to a temp-dir sink and unroutable endpoints. Nothing in
/// these tests touches the network except the deliberate start() failure.
fn test_controller(tag: &str) -> (SessionController, Arc<RecordSink>) {
    let dir = std::env::temp_dir().join(format!("mexc-rec-it-{tag}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let sink = Arc::new(RecordSink::new(&dir).unwrap());

    let credentials = Credentials::new("test_api_key".to_string(), "test_api_secret".to_string());
    let config = SessionConfig {
        // Discard port: connections are refused immediately.
        rest_base_url: "http://127.0.0.1:9".to_string(),
        ws_base_url: "ws://127.0.0.1:9".to_string(),
        subscribe_poll_interval: Duration::from_millis(10),
        subscribe_poll_limit: 2,
        ..SessionConfig::default()
    };

    let controller = SessionController::new(config, &credentials, sink.clone()).unwrap();
    (controller, sink)
}

fn read_lines(path: &Path) -> Vec<Value> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect(),
        Err(_) => Vec::new(),
    }
}

fn lines_of_type<'a>(lines: &'a [Value], event_type: &str) -> Vec<&'a Value> {
    lines
        .iter()
        .filter(|l| l["event_type"] == event_type)
        .collect()
}

#[test]
fn order_placed_then_canceled_get_sequential_trade_ids() {
    let (controller, sink) = test_controller("place-cancel");
    let (tx, _rx) = mpsc::unbounded_channel();

    let placed = format!(
        r#"{{"d":{{"a":"USDT","o":"ENTRUST_PLACE","f":"100","fd":"0","l":"0","ld":"50"}},"c":"{PRIVATE_CHANNEL}"}}"#
    );
    let canceled = format!(
        r#"{{"d":{{"a":"USDT","o":"ENTRUST","f":"100","fd":"50","l":"0","ld":"-50"}},"c":"{PRIVATE_CHANNEL}"}}"#
    );

    assert_eq!(controller.handle_frame(&placed, &tx), DispatchOutcome::Continue);
    assert_eq!(controller.handle_frame(&canceled, &tx), DispatchOutcome::Continue);

    let trades = read_lines(sink.trades_log_path());
    assert_eq!(trades.len(), 2);
    assert_eq!(trades[0]["event_type"], "ORDER_PLACED");
    assert_eq!(trades[0]["trade_id"], 0);
    assert_eq!(trades[0]["asset"], "USDT");
    assert_eq!(trades[1]["event_type"], "ORDER_CANCELED");
    assert_eq!(trades[1]["trade_id"], 1);

    // Both frames also land verbatim in the raw event log.
    let raw = read_lines(sink.events_log_path());
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0]["event_id"], 0);
    assert_eq!(raw[1]["event_id"], 1);
    assert_eq!(raw[0]["raw_data"]["c"], PRIVATE_CHANNEL);
}

#[test]
fn trade_sequence_is_strictly_increasing_and_gap_free() {
    let (controller, sink) = test_controller("sequence");
    let (tx, _rx) = mpsc::unbounded_channel();

    for _ in 0..10 {
        let frame = format!(
            r#"{{"d":{{"a":"MX","o":"ENTRUST","f":"0","fd":"0","l":"0","ld":"-1"}},"c":"{PRIVATE_CHANNEL}"}}"#
        );
        controller.handle_frame(&frame, &tx);
    }

    let trades = read_lines(sink.trades_log_path());
    assert_eq!(trades.len(), 10);
    for (i, trade) in trades.iter().enumerate() {
        assert_eq!(trade["trade_id"], i as u64);
        assert_eq!(trade["event_type"], "ORDER_FILLED");
    }
    assert_eq!(controller.trade_count(), 10);
    assert_eq!(controller.event_count(), 10);
}

#[test]
fn subscription_ack_sets_flag_and_records_confirmation_once() {
    let (controller, sink) = test_controller("ack");
    let (tx, _rx) = mpsc::unbounded_channel();
    assert!(!controller.is_subscribed());

    let ack = format!(r#"{{"id":1,"msg":"{PRIVATE_CHANNEL}"}}"#);
    controller.handle_frame(&ack, &tx);
    assert!(controller.is_subscribed());

    // A repeated ack does not produce a second confirmation record.
    controller.handle_frame(&ack, &tx);

    let connection = read_lines(sink.connection_log_path());
    assert_eq!(lines_of_type(&connection, "subscription_confirmed").len(), 1);
}

#[test]
fn unrelated_ack_does_not_subscribe() {
    let (controller, _sink) = test_controller("ack-other");
    let (tx, _rx) = mpsc::unbounded_channel();

    controller.handle_frame(r#"{"id":1,"msg":"some@other.channel"}"#, &tx);
    assert!(!controller.is_subscribed());
}

#[test]
fn ping_is_answered_with_pong_in_the_same_dispatch() {
    let (controller, _sink) = test_controller("ping");
    let (tx, mut rx) = mpsc::unbounded_channel();

    controller.handle_frame(r#"{"ping": 42}"#, &tx);

    let Message::Text(reply) = rx.try_recv().expect("pong must be queued before dispatch returns")
    else {
        panic!("expected a text frame");
    };
    assert_eq!(reply, r#"{"pong":42}"#);
}

#[test]
fn wrong_listen_key_notice_forces_reconnect() {
    let (controller, _sink) = test_controller("wrong-key");
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = controller.handle_frame(r#"{"code":0,"msg":"Wrong listen key"}"#, &tx);
    assert_eq!(outcome, DispatchOutcome::Reconnect);
}

#[test]
fn method_is_empty_notice_triggers_immediate_subscription() {
    let (controller, sink) = test_controller("method-empty");
    let (tx, mut rx) = mpsc::unbounded_channel();

    controller.handle_frame(r#"{"code":0,"msg":"method is empty."}"#, &tx);

    let Message::Text(request) = rx.try_recv().expect("subscription request must be queued") else {
        panic!("expected a text frame");
    };
    let request: Value = serde_json::from_str(&request).unwrap();
    assert_eq!(request["method"], "SUBSCRIPTION");
    assert_eq!(request["params"][0], PRIVATE_CHANNEL);

    let connection = read_lines(sink.connection_log_path());
    assert_eq!(lines_of_type(&connection, "subscription_sent").len(), 1);
}

#[test]
fn malformed_frames_are_recorded_and_swallowed() {
    let (controller, sink) = test_controller("malformed");
    let (tx, _rx) = mpsc::unbounded_channel();

    let outcome = controller.handle_frame("definitely not json", &tx);
    assert_eq!(outcome, DispatchOutcome::Continue);

    // The fault is on the connection log; the raw log is untouched and the
    // next valid frame still gets sequence 0.
    let connection = read_lines(sink.connection_log_path());
    assert_eq!(lines_of_type(&connection, "parse_error").len(), 1);

    controller.handle_frame(r#"{"ping": 1}"#, &tx);
    let raw = read_lines(sink.events_log_path());
    assert_eq!(raw.len(), 1);
    assert_eq!(raw[0]["event_id"], 0);
}

#[test]
fn non_trade_channels_are_raw_logged_but_not_classified() {
    let (controller, sink) = test_controller("other-channel");
    let (tx, _rx) = mpsc::unbounded_channel();

    controller.handle_frame(r#"{"c":"spot@public.deals.v3.api","d":{"x":1}}"#, &tx);

    assert_eq!(read_lines(sink.events_log_path()).len(), 1);
    assert!(read_lines(sink.trades_log_path()).is_empty());
}

#[tokio::test]
async fn stop_is_idempotent_and_writes_one_session_end() {
    let (controller, sink) = test_controller("stop");

    // Nothing listens on the configured endpoint, so authorization fails and
    // start() reports the failure without retrying.
    let result = controller.start().await;
    assert!(result.is_err());

    controller.stop();
    controller.stop();

    let connection = read_lines(sink.connection_log_path());
    assert_eq!(lines_of_type(&connection, "session_start").len(), 1);
    assert_eq!(lines_of_type(&connection, "listenkey_exception").len(), 1);
    let session_end = lines_of_type(&connection, "session_end");
    assert_eq!(session_end.len(), 1);
    assert_eq!(session_end[0]["details"]["total_trades"], 0);
    assert!(!controller.is_running());
}

/// Full reconnect path against local stand-ins for the exchange: an HTTP
/// listener issuing listen keys and a WebSocket listener that invalidates the
/// first key, then acknowledges the subscription on the second connection.
#[tokio::test]
async fn invalidated_listen_key_reenters_authorization_once() {
    use futures_util::{SinkExt, StreamExt};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http_addr = http_listener.local_addr().unwrap();
    let key_requests = Arc::new(AtomicUsize::new(0));
    let key_requests_srv = key_requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = http_listener.accept().await else {
                break;
            };
            key_requests_srv.fetch_add(1, Ordering::SeqCst);
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf).await;
            let body = r#"{"listenKey":"local-test-key"}"#;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ws_addr = ws_listener.local_addr().unwrap();
    tokio::spawn(async move {
        // First connection: invalidate the listen key immediately, then wait
        // for the recorder to drop the transport.
        let (stream, _) = ws_listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(
            r#"{"code":0,"msg":"Wrong listen key"}"#.to_string(),
        ))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}

        // Second connection: acknowledge the subscription and stay open.
        let (stream, _) = ws_listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(format!(
            r#"{{"id":1,"msg":"{PRIVATE_CHANNEL}"}}"#
        )))
        .await
        .unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let dir = std::env::temp_dir().join(format!("mexc-rec-it-reauth-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    let sink = Arc::new(RecordSink::new(&dir).unwrap());
    let credentials = Credentials::new("test_api_key".to_string(), "test_api_secret".to_string());
    let config = SessionConfig {
        rest_base_url: format!("http://{http_addr}"),
        ws_base_url: format!("ws://{ws_addr}/ws"),
        subscribe_delay: Duration::from_millis(100),
        subscribe_poll_interval: Duration::from_millis(50),
        subscribe_poll_limit: 100,
        ..SessionConfig::default()
    };
    let controller = SessionController::new(config, &credentials, sink.clone()).unwrap();

    controller.start().await.unwrap();
    assert!(controller.is_subscribed());

    // Exactly one re-entry into authorization: the initial key acquisition
    // plus one re-acquisition after the invalidation notice.
    assert_eq!(key_requests.load(Ordering::SeqCst), 2);

    let connection = read_lines(sink.connection_log_path());
    assert_eq!(lines_of_type(&connection, "listenkey_success").len(), 2);
    assert_eq!(lines_of_type(&connection, "reconnect").len(), 1);
    let closed = lines_of_type(&connection, "ws_closed");
    assert!(closed
        .iter()
        .any(|l| l["details"]["reason"] == "listen key invalidated"));

    controller.stop();
}

#[test]
fn stop_before_start_is_a_no_op() {
    let (controller, sink) = test_controller("stop-cold");
    controller.stop();
    assert!(read_lines(sink.connection_log_path()).is_empty());
}
