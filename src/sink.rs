use crate::events::{BalanceChangeRecord, EventKind};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

const CONNECTION_LOG: &str = "connection.jsonl";
const EVENTS_LOG: &str = "events.jsonl";
const TRADES_LOG: &str = "trades.jsonl";

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("log write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One line of the connection log: a lifecycle transition or fault.
#[derive(Debug, Serialize)]
pub struct ConnectionRecord {
    pub session_id: i64,
    pub timestamp: u64,
    pub event_type: String,
    pub details: Value,
}

/// One line of the raw event log: an inbound frame recorded verbatim.
#[derive(Debug, Serialize)]
pub struct RawRecord {
    pub session_id: i64,
    pub timestamp: u64,
    pub event_id: u64,
    pub raw_data: Value,
}

/// One line of the trade log: a classified balance-change event.
#[derive(Debug, Serialize)]
pub struct TradeRecord {
    pub session_id: i64,
    pub timestamp: i64,
    pub datetime: String,
    pub trade_id: u64,
    pub asset: String,
    pub operation: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub free_delta: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked_balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked_delta: Decimal,
    pub change_time: Option<i64>,
    pub change_id: Option<String>,
    pub event_type: String,
    pub raw: Value,
}

impl TradeRecord {
    /// Build a trade-log line. `trade_id` is assigned by the session
    /// controller in arrival order; the sink never generates identifiers.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn new(
        session_id: i64,
        trade_id: u64,
        record: &BalanceChangeRecord,
        kind: &EventKind,
        event_time: Option<i64>,
        raw: Value,
    ) -> Self {
        Self {
            session_id,
            timestamp: event_time.unwrap_or_else(|| now_ms() as i64),
            datetime: chrono::Local::now().to_rfc3339(),
            trade_id,
            asset: record.asset.clone(),
            operation: record.operation.clone(),
            free_balance: record.free_balance,
            free_delta: record.free_delta,
            locked_balance: record.locked_balance,
            locked_delta: record.locked_delta,
            change_time: record.change_time,
            change_id: record.change_id.clone(),
            event_type: kind.label(),
            raw,
        }
    }
}

/// Append-only writer for the three session logs.
///
/// Each append serializes one record to a single JSONL line under a per-log
/// mutex, so interleaved appends from concurrent tasks never corrupt a line.
/// A failed write is an error return, not a session fault; callers report it
/// and continue.
pub struct RecordSink {
    connection_path: PathBuf,
    events_path: PathBuf,
    trades_path: PathBuf,
    connection_lock: Mutex<()>,
    events_lock: Mutex<()>,
    trades_lock: Mutex<()>,
}

impl std::fmt::Debug for RecordSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSink")
            .field("connection_path", &self.connection_path)
            .field("events_path", &self.events_path)
            .field("trades_path", &self.trades_path)
            .finish_non_exhaustive()
    }
}

impl RecordSink {
    /// Create a sink rooted at `dir`, creating the directory if absent.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SinkError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        Ok(Self {
            connection_path: dir.join(CONNECTION_LOG),
            events_path: dir.join(EVENTS_LOG),
            trades_path: dir.join(TRADES_LOG),
            connection_lock: Mutex::new(()),
            events_lock: Mutex::new(()),
            trades_lock: Mutex::new(()),
        })
    }

    pub fn connection_log_path(&self) -> &Path {
        &self.connection_path
    }

    pub fn events_log_path(&self) -> &Path {
        &self.events_path
    }

    pub fn trades_log_path(&self) -> &Path {
        &self.trades_path
    }

    pub fn append_connection(
        &self,
        session_id: i64,
        event_type: &str,
        details: Value,
    ) -> Result<(), SinkError> {
        let record = ConnectionRecord {
            session_id,
            timestamp: now_ms(),
            event_type: event_type.to_string(),
            details,
        };
        self.append_line(&self.connection_path, &self.connection_lock, &record)
    }

    pub fn append_raw(&self, session_id: i64, event_id: u64, raw: &Value) -> Result<(), SinkError> {
        let record = RawRecord {
            session_id,
            timestamp: now_ms(),
            event_id,
            raw_data: raw.clone(),
        };
        self.append_line(&self.events_path, &self.events_lock, &record)
    }

    pub fn append_trade(&self, record: &TradeRecord) -> Result<(), SinkError> {
        self.append_line(&self.trades_path, &self.trades_lock, record)
    }

    fn append_line<T: Serialize>(
        &self,
        path: &Path,
        lock: &Mutex<()>,
        record: &T,
    ) -> Result<(), SinkError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation)]
fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
