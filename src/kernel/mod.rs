//! Transport kernel: request signing, listen-key authorization, WebSocket
//! connect, and the inbound frame codec.
//!
//! The kernel contains no session logic. The controller in
//! [`crate::session`] drives these pieces through the lifecycle state
//! machine.

pub mod codec;
pub mod rest;
pub mod signer;
pub mod ws;

pub use codec::{Inbound, PRIVATE_CHANNEL};
pub use rest::StreamAuthorizer;
pub use ws::{WsConfig, WsStream};
