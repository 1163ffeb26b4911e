pub mod core;
pub mod events;
pub mod kernel;
pub mod session;
pub mod signals;
pub mod sink;

pub use core::config::Credentials;
pub use core::errors::{AuthError, ParseError, RecorderError, TransportError};
pub use events::{classify, BalanceChangeRecord, EventKind};
pub use session::{DispatchOutcome, SessionConfig, SessionController};
pub use signals::shutdown_signal;
pub use sink::{RecordSink, TradeRecord};
