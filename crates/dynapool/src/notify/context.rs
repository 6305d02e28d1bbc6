//! Notification items and per-alert context

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::adapter::PoolSnapshot;

/// Kind of alert a pool can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NotifyKind {
    /// Pool parameters were changed
    Change,

    /// Active workers as a share of the maximum pool size
    Liveness,

    /// Queue fill as a share of queue capacity
    QueueFull,

    /// Tasks rejected since the previous check
    RejectCount,
}

impl NotifyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Change => "change",
            Self::Liveness => "liveness",
            Self::QueueFull => "queue-full",
            Self::RejectCount => "reject-count",
        }
    }

    /// Whether the metric is compared to a threshold before alerting
    pub fn has_threshold(&self) -> bool {
        !matches!(self, Self::Change)
    }
}

impl std::fmt::Display for NotifyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Alert configuration for one kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyItem {
    pub kind: NotifyKind,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Metric value at or above which the alert fires
    #[serde(default)]
    pub threshold: f64,

    /// Rate-limit window
    #[serde(with = "duration_secs", default = "default_interval")]
    pub interval: Duration,

    /// Alerts allowed per window across the whole cluster
    #[serde(default = "default_cluster_limit")]
    pub cluster_limit: i64,
}

fn default_enabled() -> bool {
    true
}

fn default_interval() -> Duration {
    Duration::from_secs(120)
}

fn default_cluster_limit() -> i64 {
    1
}

impl NotifyItem {
    /// Item with the stock threshold for `kind`
    pub fn new(kind: NotifyKind) -> Self {
        let threshold = match kind {
            NotifyKind::Change => 0.0,
            NotifyKind::Liveness | NotifyKind::QueueFull => 70.0,
            NotifyKind::RejectCount => 1.0,
        };
        Self {
            kind,
            enabled: true,
            threshold,
            interval: default_interval(),
            cluster_limit: default_cluster_limit(),
        }
    }

    /// One item per kind with stock settings
    pub fn defaults() -> Vec<NotifyItem> {
        [
            NotifyKind::Change,
            NotifyKind::Liveness,
            NotifyKind::QueueFull,
            NotifyKind::RejectCount,
        ]
        .into_iter()
        .map(Self::new)
        .collect()
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_cluster_limit(mut self, limit: i64) -> Self {
        self.cluster_limit = limit;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// One candidate alert on its way through the filter chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyContext {
    pub id: Uuid,
    pub pool_name: String,
    pub item: NotifyItem,

    /// Metric value that triggered the alert
    pub value: f64,

    /// Pool statistics at trigger time
    pub snapshot: Option<PoolSnapshot>,

    /// Free-form description, e.g. the fields a reconfiguration changed
    pub detail: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl NotifyContext {
    pub fn new(pool_name: impl Into<String>, item: NotifyItem, value: f64) -> Self {
        Self {
            id: Uuid::now_v7(),
            pool_name: pool_name.into(),
            item,
            value,
            snapshot: None,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_snapshot(mut self, snapshot: PoolSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> NotifyKind {
        self.item.kind
    }

    /// Rate-limit identity: `pool:kind`
    pub fn limit_key(&self) -> String {
        format!("{}:{}", self.pool_name, self.item.kind)
    }
}

/// Serde support for Duration as whole seconds
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
