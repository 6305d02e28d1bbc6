//! Fixed-window rate limiter over a shared store
//!
//! The limiter never blocks an alert because the store misbehaved: a failed
//! or timed out round trip returns an empty reply, and callers treat an empty
//! or malformed reply as "allowed".

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::store::{
    window_reply, RateLimitStore, ReplyValue, StoreError, ELAPSED_INDEX, KEY_INDEX,
    REMAINING_INDEX, REPLY_LEN,
};

/// Rate limiter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Namespace prepended to every key in the store
    pub key_prefix: String,

    /// Deadline for one store round trip
    #[serde(with = "duration_millis")]
    pub timeout: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            key_prefix: "dynapool:notify:".to_string(),
            timeout: Duration::from_millis(500),
        }
    }
}

impl RateLimiterConfig {
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Interpretation of one limiter reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Budget left in the current window
    Allowed { remaining: i64 },

    /// Window budget spent
    Throttled { elapsed: Duration },

    /// No usable reply; the alert goes through
    FailedOpen,
}

impl RateLimitDecision {
    /// Interpret a `[key, elapsed_ms, remaining]` reply.
    ///
    /// Empty and malformed replies both fail open.
    pub fn from_reply(reply: &[ReplyValue]) -> Self {
        if reply.len() < REPLY_LEN {
            return Self::FailedOpen;
        }
        match (reply[ELAPSED_INDEX].as_int(), reply[REMAINING_INDEX].as_int()) {
            (Some(_), Some(remaining)) if remaining > 0 => Self::Allowed { remaining },
            (Some(elapsed_ms), Some(_)) => Self::Throttled {
                elapsed: Duration::from_millis(elapsed_ms.max(0) as u64),
            },
            _ => Self::FailedOpen,
        }
    }

    pub fn is_allowed(&self) -> bool {
        !matches!(self, Self::Throttled { .. })
    }
}

/// Cluster-wide fixed-window rate limiter
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    config: RateLimiterConfig,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, config: RateLimiterConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Key as stored, namespace included
    pub fn store_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Count one hit for `key` and return `[key, elapsed_ms, remaining]`.
    ///
    /// Returns an empty reply when the store fails or times out. A
    /// non-positive `limit` is answered locally with zero remaining.
    #[instrument(skip(self), fields(store_key = tracing::field::Empty))]
    pub async fn is_allowed(&self, key: &str, interval: Duration, limit: i64) -> Vec<ReplyValue> {
        let store_key = self.store_key(key);
        tracing::Span::current().record("store_key", store_key.as_str());

        if limit <= 0 {
            debug!(limit, "Non-positive limit, throttling without a store round trip");
            return window_reply(&store_key, 0, 0);
        }

        let round_trip = self.store.eval_window(&store_key, interval, limit);
        match tokio::time::timeout(self.config.timeout, round_trip).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!(error = %e, "Rate-limit store unavailable, allowing");
                Vec::new()
            }
            Err(_) => {
                let e = StoreError::Timeout(self.config.timeout);
                warn!(error = %e, "Rate-limit store timed out, allowing");
                Vec::new()
            }
        }
    }

    /// [`is_allowed`](Self::is_allowed) interpreted into a decision
    pub async fn check(&self, key: &str, interval: Duration, limit: i64) -> RateLimitDecision {
        let reply = self.is_allowed(key, interval, limit).await;
        let decision = RateLimitDecision::from_reply(&reply);

        if decision == RateLimitDecision::FailedOpen && !reply.is_empty() {
            warn!(
                key,
                reply = ?reply,
                "Malformed rate-limit reply, allowing"
            );
        } else if let Some(ReplyValue::Text(replied)) = reply.get(KEY_INDEX) {
            debug!(key = %replied, ?decision, "Rate-limit decision");
        }

        decision
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Serde support for Duration as milliseconds
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
