//! Transport layer exposing the session manager to remote clients.
//!
//! Provides:
//! - Wire protocol (JSON + base64)
//! - Message dispatch onto a `SessionManager`
//! - WebSocket transport (feature: websocket)

pub mod dispatch;
pub mod protocol;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use dispatch::dispatch;
pub use protocol::{ClientMessage, ServerMessage};
