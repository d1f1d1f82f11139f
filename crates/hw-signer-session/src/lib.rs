//! Session orchestration and preference storage for hardware signers.
//!
//! Provides:
//! - `SessionManager` - Connect, resolve, derive and sign
//! - `SessionStore` - Per-family session slots
//! - Preference store implementations (memory, JSON file)

pub mod manager;
pub mod storage;
pub mod store;

pub use manager::{DisconnectWarning, ManagerError, SessionManager};
pub use store::SessionStore;
