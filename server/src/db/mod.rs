//! Database module for SQLite persistence.

mod events;
mod pool;
mod records;

pub use events::*;
pub use pool::*;
pub use records::*;
