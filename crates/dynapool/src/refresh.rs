//! Runtime reconfiguration of registered pools
//!
//! [`Refresher::apply`] validates a [`PoolProperties`] change against the
//! pool's current state before touching it, then applies bounds, queue
//! capacity, reject policy, keep-alive and core timeout in that order. A
//! failure after the bounds were changed restores the previous bounds.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::adapter::{validate_bounds, AdapterError, PoolAdapter, RejectPolicy};
use crate::notify::{NotifyChain, NotifyContext, NotifyItem, NotifyKind};
use crate::registry::{PoolRegistry, RegistryError};

/// Desired pool settings; `None` leaves a setting unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolProperties {
    pub core_pool_size: Option<i64>,
    pub maximum_pool_size: Option<i64>,
    pub queue_capacity: Option<i64>,
    pub reject_policy: Option<RejectPolicy>,
    pub keep_alive_secs: Option<u64>,
    pub allow_core_thread_timeout: Option<bool>,
}

impl PoolProperties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_core_pool_size(mut self, core: i64) -> Self {
        self.core_pool_size = Some(core);
        self
    }

    pub fn with_maximum_pool_size(mut self, max: i64) -> Self {
        self.maximum_pool_size = Some(max);
        self
    }

    pub fn with_queue_capacity(mut self, capacity: i64) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = Some(policy);
        self
    }

    pub fn with_keep_alive_secs(mut self, secs: u64) -> Self {
        self.keep_alive_secs = Some(secs);
        self
    }

    pub fn with_core_thread_timeout(mut self, allow: bool) -> Self {
        self.allow_core_thread_timeout = Some(allow);
        self
    }
}

/// One setting that changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    pub field: &'static str,
    pub old: String,
    pub new: String,
}

/// Settings changed by one refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    pub pool: String,
    pub changes: Vec<FieldChange>,
}

impl RefreshReport {
    fn new(pool: &str) -> Self {
        Self {
            pool: pool.to_string(),
            changes: Vec::new(),
        }
    }

    fn record(&mut self, field: &'static str, old: impl fmt::Display, new: impl fmt::Display) {
        self.changes.push(FieldChange {
            field,
            old: old.to_string(),
            new: new.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Change for `field`, if any
    pub fn change(&self, field: &str) -> Option<&FieldChange> {
        self.changes.iter().find(|c| c.field == field)
    }

    /// `field: old -> new` pairs joined by commas
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(|c| format!("{}: {} -> {}", c.field, c.old, c.new))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Refresh errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),
}

/// Applies [`PoolProperties`] to registered pools
pub struct Refresher {
    registry: Arc<PoolRegistry>,
    chain: Option<Arc<NotifyChain>>,
    change_item: NotifyItem,
}

impl Refresher {
    pub fn new(registry: Arc<PoolRegistry>) -> Self {
        Self {
            registry,
            chain: None,
            change_item: NotifyItem::new(NotifyKind::Change),
        }
    }

    /// Fire `change` notifications through `chain` after successful refreshes
    pub fn with_chain(mut self, chain: Arc<NotifyChain>) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Notify item used for change notifications
    pub fn with_change_item(mut self, item: NotifyItem) -> Self {
        self.change_item = item;
        self
    }

    /// Apply `props` to the pool registered as `name`.
    ///
    /// Either every requested change the pool supports is applied, or the
    /// pool is left as it was and an error is returned.
    #[instrument(skip(self, props))]
    pub fn apply(&self, name: &str, props: &PoolProperties) -> Result<RefreshReport, RefreshError> {
        let adapter = self.registry.get(name)?;
        let (core, max) = adapter.bounds();
        let new_core = props.core_pool_size.unwrap_or(core);
        let new_max = props.maximum_pool_size.unwrap_or(max);

        validate_bounds(new_core, new_max)?;
        if let Some(capacity) = props.queue_capacity {
            if capacity < 0 {
                return Err(AdapterError::InvalidConfig(format!(
                    "queue capacity must not be negative, got {capacity}"
                ))
                .into());
            }
        }

        let mut report = RefreshReport::new(name);

        if (new_core, new_max) != (core, max) {
            adapter.resize(new_core, new_max)?;
            let (actual_core, actual_max) = adapter.bounds();
            if actual_core != core {
                report.record("core_pool_size", core, actual_core);
            } else if new_core != core {
                warn!(pool = name, "Core pool size is not adjustable for this pool");
            }
            if actual_max != max {
                report.record("maximum_pool_size", max, actual_max);
            } else if new_max != max {
                warn!(pool = name, "Maximum pool size is not adjustable for this pool");
            }
        }

        if let Err(e) = apply_queue_capacity(adapter.as_ref(), props, &mut report) {
            if let Err(rollback) = adapter.resize(core, max) {
                warn!(pool = name, error = %rollback, "Failed to restore pool bounds");
            }
            return Err(e.into());
        }

        apply_settings(adapter.as_ref(), props, &mut report);

        if report.is_empty() {
            debug!(pool = name, "Refresh changed nothing");
        } else {
            info!(pool = name, changes = %report.summary(), "Pool refreshed");
        }
        Ok(report)
    }

    /// [`apply`](Self::apply), then fire a `change` notification if anything changed.
    ///
    /// Notification failures are logged and do not fail the refresh.
    pub async fn refresh(
        &self,
        name: &str,
        props: &PoolProperties,
    ) -> Result<RefreshReport, RefreshError> {
        let report = self.apply(name, props)?;

        if let (false, Some(chain)) = (report.is_empty(), &self.chain) {
            let mut ctx = NotifyContext::new(name, self.change_item.clone(), 0.0)
                .with_detail(report.summary());
            if let Some(adapter) = self.registry.lookup(name) {
                ctx = ctx.with_snapshot(adapter.snapshot());
            }
            if let Err(e) = chain.fire(&ctx).await {
                warn!(pool = name, error = %e, "Change notification failed");
            }
        }

        Ok(report)
    }

    /// Refresh several pools; one pool's failure does not stop the others
    pub async fn refresh_all(
        &self,
        pools: &BTreeMap<String, PoolProperties>,
    ) -> Vec<(String, Result<RefreshReport, RefreshError>)> {
        let mut results = Vec::with_capacity(pools.len());
        for (name, props) in pools {
            results.push((name.clone(), self.refresh(name, props).await));
        }
        results
    }
}

impl fmt::Debug for Refresher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Refresher")
            .field("registry", &self.registry)
            .field("notifies", &self.chain.is_some())
            .finish()
    }
}

fn apply_queue_capacity(
    adapter: &dyn PoolAdapter,
    props: &PoolProperties,
    report: &mut RefreshReport,
) -> Result<(), AdapterError> {
    let Some(capacity) = props.queue_capacity else {
        return Ok(());
    };
    let old = adapter.queue_capacity();
    if capacity == old {
        return Ok(());
    }

    adapter.on_refresh_queue_capacity(capacity)?;
    if adapter.queue_capacity() == capacity {
        report.record("queue_capacity", old, capacity);
    } else {
        warn!(pool = adapter.name(), "Queue capacity is not adjustable for this pool");
    }
    Ok(())
}

fn apply_settings(adapter: &dyn PoolAdapter, props: &PoolProperties, report: &mut RefreshReport) {
    if let Some(policy) = props.reject_policy {
        let old = adapter.reject_policy();
        if old != Some(policy) {
            adapter.set_reject_policy(policy);
            match old {
                Some(old) if adapter.reject_policy() == Some(policy) => {
                    report.record("reject_policy", old, policy);
                }
                _ => warn!(pool = adapter.name(), "Reject policy is not adjustable for this pool"),
            }
        }
    }

    if let Some(secs) = props.keep_alive_secs {
        let keep_alive = Duration::from_secs(secs);
        let old = adapter.keep_alive();
        if old != Some(keep_alive) {
            adapter.set_keep_alive(keep_alive);
            match old {
                Some(old) if adapter.keep_alive() == Some(keep_alive) => {
                    report.record("keep_alive_secs", old.as_secs(), secs);
                }
                _ => warn!(pool = adapter.name(), "Keep-alive is not adjustable for this pool"),
            }
        }
    }

    if let Some(allow) = props.allow_core_thread_timeout {
        let old = adapter.allows_core_thread_timeout();
        if old != allow {
            adapter.allow_core_thread_timeout(allow);
            if adapter.allows_core_thread_timeout() == allow {
                report.record("allow_core_thread_timeout", old, allow);
            } else {
                warn!(pool = adapter.name(), "Core thread timeout is not adjustable for this pool");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{
        BoundedExecutor, BoundedExecutorAdapter, DynamicPool, DynamicPoolAdapter, DynamicPoolConfig,
    };
    use crate::notify::{ChannelDelivery, NotifyChain};
    use tokio::sync::Semaphore;

    fn register_dynamic(registry: &PoolRegistry, name: &str, config: DynamicPoolConfig) -> Arc<DynamicPool> {
        let pool = Arc::new(DynamicPool::new(name, config).unwrap());
        registry
            .register(name, Arc::new(DynamicPoolAdapter::new(Arc::clone(&pool))))
            .unwrap();
        pool
    }

    #[tokio::test]
    async fn test_apply_changes_every_setting() {
        let registry = Arc::new(PoolRegistry::new());
        let pool = register_dynamic(&registry, "io-pool", DynamicPoolConfig::new(2, 4));
        let refresher = Refresher::new(Arc::clone(&registry));

        let report = refresher
            .apply(
                "io-pool",
                &PoolProperties::new()
                    .with_core_pool_size(8)
                    .with_maximum_pool_size(16)
                    .with_queue_capacity(64)
                    .with_reject_policy(RejectPolicy::CallerRuns)
                    .with_keep_alive_secs(30)
                    .with_core_thread_timeout(true),
            )
            .unwrap();

        assert_eq!(pool.bounds(), (8, 16));
        assert_eq!(pool.queue_capacity(), 64);
        assert_eq!(pool.reject_policy(), RejectPolicy::CallerRuns);
        assert_eq!(pool.keep_alive(), Duration::from_secs(30));
        assert!(pool.allows_core_thread_timeout());

        assert_eq!(report.changes.len(), 6);
        let core = report.change("core_pool_size").unwrap();
        assert_eq!((core.old.as_str(), core.new.as_str()), ("2", "8"));
        assert!(report.summary().contains("reject_policy: abort -> caller_runs"));
    }

    #[tokio::test]
    async fn test_unchanged_values_are_not_reported() {
        let registry = Arc::new(PoolRegistry::new());
        register_dynamic(&registry, "io-pool", DynamicPoolConfig::new(2, 4));
        let refresher = Refresher::new(Arc::clone(&registry));

        let report = refresher
            .apply(
                "io-pool",
                &PoolProperties::new()
                    .with_core_pool_size(2)
                    .with_reject_policy(RejectPolicy::Abort),
            )
            .unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_bounds_leave_pool_untouched() {
        let registry = Arc::new(PoolRegistry::new());
        let pool = register_dynamic(&registry, "io-pool", DynamicPoolConfig::new(2, 4));
        let refresher = Refresher::new(Arc::clone(&registry));

        let result = refresher.apply(
            "io-pool",
            &PoolProperties::new()
                .with_core_pool_size(10)
                .with_reject_policy(RejectPolicy::Discard),
        );

        assert!(matches!(
            result,
            Err(RefreshError::Adapter(AdapterError::InvalidConfig(_)))
        ));
        assert_eq!(pool.bounds(), (2, 4));
        assert_eq!(pool.reject_policy(), RejectPolicy::Abort);

        assert!(refresher
            .apply("io-pool", &PoolProperties::new().with_queue_capacity(-1))
            .is_err());
    }

    #[tokio::test]
    async fn test_failed_queue_change_rolls_back_bounds() {
        let registry = Arc::new(PoolRegistry::new());
        let pool = register_dynamic(
            &registry,
            "io-pool",
            DynamicPoolConfig::new(1, 1).with_queue_capacity(8),
        );
        let refresher = Refresher::new(Arc::clone(&registry));
        let gate = Arc::new(Semaphore::new(0));

        for _ in 0..4 {
            let gate = Arc::clone(&gate);
            pool.spawn(async move { gate.acquire().await.unwrap().forget() })
                .unwrap();
        }
        assert_eq!(pool.queue_len(), 3);

        let result = refresher.apply(
            "io-pool",
            &PoolProperties::new()
                .with_maximum_pool_size(6)
                .with_queue_capacity(1),
        );

        assert!(matches!(
            result,
            Err(RefreshError::Adapter(AdapterError::InvalidConfig(_)))
        ));
        assert_eq!(pool.bounds(), (1, 1));
        assert_eq!(pool.queue_capacity(), 8);
        gate.add_permits(4);
    }

    #[tokio::test]
    async fn test_unknown_pool() {
        let refresher = Refresher::new(Arc::new(PoolRegistry::new()));
        assert!(matches!(
            refresher.apply("missing", &PoolProperties::new()),
            Err(RefreshError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_unsupported_settings_are_skipped() {
        let registry = Arc::new(PoolRegistry::new());
        let executor = Arc::new(BoundedExecutor::new("bounded", 4).unwrap());
        registry
            .register("bounded", Arc::new(BoundedExecutorAdapter::new(Arc::clone(&executor))))
            .unwrap();
        let refresher = Refresher::new(Arc::clone(&registry));

        let report = refresher
            .apply(
                "bounded",
                &PoolProperties::new()
                    .with_maximum_pool_size(6)
                    .with_core_pool_size(6)
                    .with_reject_policy(RejectPolicy::Discard)
                    .with_keep_alive_secs(5),
            )
            .unwrap();

        assert_eq!(executor.limit(), 6);
        assert!(report.change("maximum_pool_size").is_some());
        assert!(report.change("reject_policy").is_none());
        assert!(report.change("keep_alive_secs").is_none());
    }

    #[tokio::test]
    async fn test_ignored_core_change_is_not_reported() {
        let registry = Arc::new(PoolRegistry::new());
        let executor = Arc::new(BoundedExecutor::new("bounded", 4).unwrap());
        registry
            .register("bounded", Arc::new(BoundedExecutorAdapter::new(Arc::clone(&executor))))
            .unwrap();
        let (delivery, mut rx) = ChannelDelivery::new();
        let chain = Arc::new(NotifyChain::new(Vec::new(), Arc::new(delivery)));
        let refresher = Refresher::new(Arc::clone(&registry)).with_chain(chain);

        let report = refresher
            .refresh("bounded", &PoolProperties::new().with_core_pool_size(2))
            .await
            .unwrap();

        assert!(report.is_empty());
        assert_eq!(registry.get("bounded").unwrap().core_pool_size(), 4);
        assert_eq!(executor.limit(), 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_fires_change_notification() {
        let registry = Arc::new(PoolRegistry::new());
        register_dynamic(&registry, "io-pool", DynamicPoolConfig::new(2, 4));
        let (delivery, mut rx) = ChannelDelivery::new();
        let chain = Arc::new(NotifyChain::new(Vec::new(), Arc::new(delivery)));
        let refresher = Refresher::new(Arc::clone(&registry)).with_chain(chain);

        refresher
            .refresh("io-pool", &PoolProperties::new().with_core_pool_size(3))
            .await
            .unwrap();
        let ctx = rx.try_recv().unwrap();
        assert_eq!(ctx.kind(), NotifyKind::Change);
        assert_eq!(ctx.detail.as_deref(), Some("core_pool_size: 2 -> 3"));
        assert!(ctx.snapshot.is_some());

        // No change, no notification
        refresher
            .refresh("io-pool", &PoolProperties::new().with_core_pool_size(3))
            .await
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refresh_all_reports_each_pool() {
        let registry = Arc::new(PoolRegistry::new());
        register_dynamic(&registry, "a", DynamicPoolConfig::new(1, 2));
        let refresher = Refresher::new(Arc::clone(&registry));

        let pools: BTreeMap<String, PoolProperties> = serde_json::from_str(
            r#"{
                "a": {"core_pool_size": 2},
                "b": {"core_pool_size": 2}
            }"#,
        )
        .unwrap();
        let results = refresher.refresh_all(&pools).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(RefreshError::Registry(_))));
    }
}
