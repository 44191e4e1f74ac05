//! Error types for the Greenroom sync engine.

use crate::Scope;
use thiserror::Error;

/// All possible errors from the sync engine.
///
/// The first five variants form the protocol-facing taxonomy: callers are
/// expected to branch on them (`stale` means pull-then-retry, `auth` means
/// re-authenticate, `unsupported` means disable sync entirely). The rest are
/// local causes surfaced from storage and serialization.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failed before a response was received.
    #[error("network error: {0}")]
    Network(String),

    /// The request was aborted after the configured deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Non-2xx HTTP response that is neither staleness nor an auth failure.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// 401/403 - the caller must refresh credentials; never retried here.
    #[error("authentication failed (http {status})")]
    Auth { status: u16 },

    /// The server's truth is ahead of what the client last saw.
    /// The dequeued batch has been re-queued; pull before retrying flush.
    #[error("stale sync state for scope '{scope}': pull before retrying flush")]
    Stale { scope: Scope },

    /// Local persistent storage is unavailable in this environment.
    #[error("local storage unavailable: {0}")]
    Unsupported(String),

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// JSON (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A persisted row could not be interpreted.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl SyncError {
    /// Whether a single sync call may retry this failure internally
    /// (with backoff, up to the bounded attempt count).
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Http { status, .. } => {
                matches!(status, 408 | 429) || *status >= 500
            }
            _ => false,
        }
    }

    /// Whether this is an authentication/authorization failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth { .. })
    }

    /// Whether this is a server-detected sequence conflict.
    pub fn is_stale(&self) -> bool {
        matches!(self, SyncError::Stale { .. })
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;
