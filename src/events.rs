use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One balance-change notification from the private account feed, taken
/// verbatim from the `d` payload. Never mutated after construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceChangeRecord {
    #[serde(rename = "a", default)]
    pub asset: String,

    #[serde(rename = "o", default)]
    pub operation: String,

    #[serde(rename = "f", default, with = "rust_decimal::serde::str")]
    pub free_balance: Decimal,

    #[serde(rename = "fd", default, with = "rust_decimal::serde::str")]
    pub free_delta: Decimal,

    #[serde(rename = "l", default, with = "rust_decimal::serde::str")]
    pub locked_balance: Decimal,

    #[serde(rename = "ld", default, with = "rust_decimal::serde::str")]
    pub locked_delta: Decimal,

    #[serde(rename = "c", default)]
    pub change_time: Option<i64>,

    #[serde(rename = "cd", default)]
    pub change_id: Option<String>,
}

/// Semantic event derived from a balance change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    OrderPlaced,
    OrderCanceled,
    OrderFilled,
    TradeSettled,
    OrderModified,
    OrderUnknown,
    UnknownOperation(String),
}

impl EventKind {
    /// Stable label written to the trade log.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Self::OrderPlaced => "ORDER_PLACED".to_string(),
            Self::OrderCanceled => "ORDER_CANCELED".to_string(),
            Self::OrderFilled => "ORDER_FILLED".to_string(),
            Self::TradeSettled => "TRADE_SETTLED".to_string(),
            Self::OrderModified => "ORDER_MODIFIED".to_string(),
            Self::OrderUnknown => "ORDER_UNKNOWN".to_string(),
            Self::UnknownOperation(op) => format!("UNKNOWN_{op}"),
        }
    }
}

/// Map a balance change to its semantic event kind.
///
/// The exchange exposes no explicit order-lifecycle tag; the sign/zero
/// pattern of the free/locked deltas is the only observable signal. This
/// table encodes observed exchange behavior, not a documented contract.
/// Do not "fix" apparent asymmetries (there is deliberately no case for
/// fd < 0 with ld > 0); unlisted ENTRUST combinations fall through to
/// `OrderModified`, and an exchange protocol change requires re-validating
/// the whole table.
#[must_use]
pub fn classify(record: &BalanceChangeRecord) -> EventKind {
    let fd = record.free_delta;
    let ld = record.locked_delta;

    match record.operation.as_str() {
        "ENTRUST_PLACE" => {
            if ld > Decimal::ZERO {
                EventKind::OrderPlaced
            } else {
                EventKind::OrderUnknown
            }
        }
        "ENTRUST" => {
            if ld < Decimal::ZERO && fd > Decimal::ZERO {
                EventKind::OrderCanceled
            } else if ld < Decimal::ZERO && fd == Decimal::ZERO {
                EventKind::OrderFilled
            } else if ld == Decimal::ZERO && fd > Decimal::ZERO {
                EventKind::TradeSettled
            } else {
                EventKind::OrderModified
            }
        }
        op => EventKind::UnknownOperation(op.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(operation: &str, fd: &str, ld: &str) -> BalanceChangeRecord {
        BalanceChangeRecord {
            asset: "USDT".to_string(),
            operation: operation.to_string(),
            free_balance: Decimal::ZERO,
            free_delta: fd.parse().unwrap(),
            locked_balance: Decimal::ZERO,
            locked_delta: ld.parse().unwrap(),
            change_time: None,
            change_id: None,
        }
    }

    #[test]
    fn place_with_positive_locked_delta_is_order_placed() {
        assert_eq!(classify(&record("ENTRUST_PLACE", "0", "50")), EventKind::OrderPlaced);
    }

    #[test]
    fn place_without_positive_locked_delta_is_unknown() {
        assert_eq!(classify(&record("ENTRUST_PLACE", "0", "0")), EventKind::OrderUnknown);
        assert_eq!(classify(&record("ENTRUST_PLACE", "10", "-5")), EventKind::OrderUnknown);
    }

    #[test]
    fn entrust_release_with_refund_is_canceled() {
        assert_eq!(classify(&record("ENTRUST", "50", "-50")), EventKind::OrderCanceled);
    }

    #[test]
    fn entrust_release_without_refund_is_filled() {
        assert_eq!(classify(&record("ENTRUST", "0", "-50")), EventKind::OrderFilled);
    }

    #[test]
    fn entrust_credit_without_release_is_settled() {
        assert_eq!(classify(&record("ENTRUST", "25", "0")), EventKind::TradeSettled);
    }

    #[test]
    fn entrust_fallback_is_modified() {
        // No listed case covers fd < 0 with ld > 0; observed fallback.
        assert_eq!(classify(&record("ENTRUST", "-10", "10")), EventKind::OrderModified);
        assert_eq!(classify(&record("ENTRUST", "0", "0")), EventKind::OrderModified);
        assert_eq!(classify(&record("ENTRUST", "-1", "-1")), EventKind::OrderModified);
    }

    #[test]
    fn unlisted_operations_are_tagged_not_panicked() {
        assert_eq!(
            classify(&record("WITHDRAW", "0", "0")),
            EventKind::UnknownOperation("WITHDRAW".to_string())
        );
        assert_eq!(classify(&record("", "0", "0")).label(), "UNKNOWN_");
    }

    #[test]
    fn labels_match_log_format() {
        assert_eq!(EventKind::OrderPlaced.label(), "ORDER_PLACED");
        assert_eq!(
            EventKind::UnknownOperation("AIRDROP".to_string()).label(),
            "UNKNOWN_AIRDROP"
        );
    }

    #[test]
    fn record_parses_from_exchange_payload() {
        let record: BalanceChangeRecord = serde_json::from_str(
            r#"{"a":"USDT","o":"ENTRUST_PLACE","f":"100","fd":"0","l":"0","ld":"50"}"#,
        )
        .unwrap();
        assert_eq!(record.asset, "USDT");
        assert_eq!(record.locked_delta, Decimal::from(50));
        assert_eq!(classify(&record), EventKind::OrderPlaced);
    }

    #[test]
    fn missing_numeric_fields_default_to_zero() {
        let record: BalanceChangeRecord =
            serde_json::from_str(r#"{"a":"MX","o":"ENTRUST"}"#).unwrap();
        assert_eq!(record.free_delta, Decimal::ZERO);
        assert_eq!(classify(&record), EventKind::OrderModified);
    }
}
