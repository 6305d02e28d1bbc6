//! RateLimitStore trait definition

use std::time::Duration;

use async_trait::async_trait;

/// Reply position of the key under test
pub const KEY_INDEX: usize = 0;

/// Reply position of the elapsed milliseconds of the current window
pub const ELAPSED_INDEX: usize = 1;

/// Reply position of the remaining budget; `<= 0` means throttled
pub const REMAINING_INDEX: usize = 2;

/// Length of a well-formed window reply
pub const REPLY_LEN: usize = 3;

/// One element of a store reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyValue {
    Text(String),
    Int(i64),
}

impl ReplyValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::Int(_) => None,
        }
    }
}

/// Build a well-formed `[key, elapsed_ms, remaining]` reply
pub fn window_reply(key: &str, elapsed_ms: i64, remaining: i64) -> Vec<ReplyValue> {
    vec![
        ReplyValue::Text(key.to_string()),
        ReplyValue::Int(elapsed_ms),
        ReplyValue::Int(remaining),
    ]
}

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Round trip exceeded its deadline
    #[error("store round trip timed out after {0:?}")]
    Timeout(Duration),
}

/// Shared store holding fixed rate-limit windows
///
/// Implementations must evaluate [`eval_window`](Self::eval_window) as a
/// single atomic operation: concurrent callers on any process sharing the
/// store must agree on the window count.
#[async_trait]
pub trait RateLimitStore: Send + Sync + 'static {
    /// Start a new window if the current one expired, otherwise count one
    /// more hit, and return `[key, elapsed_ms, remaining]`.
    ///
    /// The stored count is capped at `limit + 1` so a burst of throttled
    /// calls cannot push the counter without bound.
    async fn eval_window(
        &self,
        key: &str,
        interval: Duration,
        limit: i64,
    ) -> Result<Vec<ReplyValue>, StoreError>;

    /// Remove expired windows, returning how many were removed
    async fn purge_expired(&self) -> Result<u64, StoreError> {
        Ok(0)
    }
}
