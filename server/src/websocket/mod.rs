//! WebSocket support for real-time sync.
//!
//! Stations connect here to hear about events other stations push, without
//! waiting for their next pull.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
