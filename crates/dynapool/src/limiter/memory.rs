//! In-memory rate-limit store
//!
//! Single-process store for tests and deployments without a shared
//! database. Each key's window is updated under its map shard lock, which
//! gives the same atomicity the shared stores provide across processes.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::store::{window_reply, RateLimitStore, ReplyValue, StoreError};

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    expires: Instant,
    hits: i64,
}

impl Window {
    fn open(now: Instant, interval: Duration) -> Self {
        Self {
            started: now,
            expires: now + interval,
            hits: 1,
        }
    }
}

/// Rate-limit windows held in process memory
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: DashMap<String, Window>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked windows, expired ones included
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn eval_window(
        &self,
        key: &str,
        interval: Duration,
        limit: i64,
    ) -> Result<Vec<ReplyValue>, StoreError> {
        let now = Instant::now();

        let window = match self.windows.entry(key.to_string()) {
            Entry::Vacant(slot) => *slot.insert(Window::open(now, interval)),
            Entry::Occupied(mut slot) => {
                let window = slot.get_mut();
                if window.expires <= now {
                    *window = Window::open(now, interval);
                } else {
                    window.hits = window.hits.min(limit).saturating_add(1);
                }
                *window
            }
        };

        let elapsed_ms = i64::try_from(now.duration_since(window.started).as_millis())
            .unwrap_or(i64::MAX);
        let remaining = limit.saturating_sub(window.hits).saturating_add(1);
        Ok(window_reply(key, elapsed_ms, remaining))
    }

    async fn purge_expired(&self) -> Result<u64, StoreError> {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| window.expires > now);
        let purged = before.saturating_sub(self.windows.len()) as u64;
        if purged > 0 {
            debug!(purged, "Purged expired rate-limit windows");
        }
        Ok(purged)
    }
}
