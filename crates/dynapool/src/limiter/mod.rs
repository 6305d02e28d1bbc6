//! Cluster-wide alert rate limiting
//!
//! This module provides:
//! - [`RateLimitStore`] - Shared store with one atomic window operation
//! - [`InMemoryRateLimitStore`] - Single-process store
//! - [`PostgresRateLimitStore`] - Store shared through PostgreSQL
//! - [`RateLimiter`] - Fail-open limiter with a bounded round trip

mod memory;
mod postgres;
mod rate_limiter;
mod store;

pub use memory::InMemoryRateLimitStore;
pub use postgres::{PostgresRateLimitStore, WINDOW_TABLE};
pub use rate_limiter::{RateLimitDecision, RateLimiter, RateLimiterConfig};
pub use store::{
    window_reply, RateLimitStore, ReplyValue, StoreError, ELAPSED_INDEX, KEY_INDEX,
    REMAINING_INDEX, REPLY_LEN,
};
