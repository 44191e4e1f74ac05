//! Request handlers for sync operations.

mod bootstrap;
mod pull;
mod push;
mod websocket;

pub use bootstrap::*;
pub use pull::*;
pub use push::*;
pub use websocket::*;
