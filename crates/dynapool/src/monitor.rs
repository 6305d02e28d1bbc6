//! Periodic pool health checks
//!
//! [`PoolMonitor`] samples every registered pool on a timer and fires one
//! notification per enabled alert item through the filter chain. The chain
//! decides what is actually delivered.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::adapter::PoolSnapshot;
use crate::limiter::RateLimitStore;
use crate::notify::{ChainOutcome, NotifyChain, NotifyContext, NotifyItem, NotifyKind};
use crate::registry::PoolRegistry;

/// Monitor configuration
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between ticks
    pub interval: Duration,

    /// Upper bound of the random delay before the first tick
    pub initial_jitter: Duration,

    /// Time between purges of expired rate-limit windows
    pub purge_interval: Duration,

    /// Alert items applied to every pool
    pub notify_items: Vec<NotifyItem>,

    /// Per-pool items replacing the global item of the same kind
    pub pool_notify_items: HashMap<String, Vec<NotifyItem>>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            initial_jitter: Duration::from_millis(500),
            purge_interval: Duration::from_secs(60),
            notify_items: NotifyItem::defaults(),
            pool_notify_items: HashMap::new(),
        }
    }
}

impl MonitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_initial_jitter(mut self, jitter: Duration) -> Self {
        self.initial_jitter = jitter;
        self
    }

    pub fn with_purge_interval(mut self, interval: Duration) -> Self {
        self.purge_interval = interval;
        self
    }

    pub fn with_notify_items(mut self, items: Vec<NotifyItem>) -> Self {
        self.notify_items = items;
        self
    }

    pub fn with_pool_notify_items(mut self, pool: impl Into<String>, items: Vec<NotifyItem>) -> Self {
        self.pool_notify_items.insert(pool.into(), items);
        self
    }

    /// Effective items for `pool`
    pub fn items_for(&self, pool: &str) -> Vec<NotifyItem> {
        let mut items = self.notify_items.clone();
        if let Some(overrides) = self.pool_notify_items.get(pool) {
            for item in overrides {
                match items.iter_mut().find(|i| i.kind == item.kind) {
                    Some(slot) => *slot = item.clone(),
                    None => items.push(item.clone()),
                }
            }
        }
        items
    }

    /// The global item for `kind`, or its stock settings
    pub fn item(&self, kind: NotifyKind) -> NotifyItem {
        self.notify_items
            .iter()
            .find(|i| i.kind == kind)
            .cloned()
            .unwrap_or_else(|| NotifyItem::new(kind))
    }
}

/// Counts from one monitor tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// Notifications fired through the chain
    pub evaluated: usize,
    pub delivered: usize,
    pub vetoed: usize,
    pub failed: usize,
}

/// Monitor errors
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("monitor is already running")]
    AlreadyRunning,
}

/// Samples registered pools and raises alerts through the chain
pub struct PoolMonitor {
    registry: Arc<PoolRegistry>,
    chain: Arc<NotifyChain>,
    config: MonitorConfig,
    store: Option<Arc<dyn RateLimitStore>>,
    last_rejects: Mutex<HashMap<String, i64>>,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tick_handle: Mutex<Option<JoinHandle<()>>>,
    purge_handle: Mutex<Option<JoinHandle<()>>>,
}

impl PoolMonitor {
    pub fn new(registry: Arc<PoolRegistry>, chain: Arc<NotifyChain>, config: MonitorConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            registry,
            chain,
            config,
            store: None,
            last_rejects: Mutex::new(HashMap::new()),
            running: AtomicBool::new(false),
            shutdown_tx,
            tick_handle: Mutex::new(None),
            purge_handle: Mutex::new(None),
        }
    }

    /// Purge expired windows of `store` while running
    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Sample every registered pool once
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> TickReport {
        let mut report = TickReport::default();
        let mut seen = HashSet::new();

        for adapter in self.registry.list_all() {
            let snapshot = adapter.snapshot();
            seen.insert(snapshot.pool_name.clone());
            if snapshot.is_shutdown {
                continue;
            }
            let reject_delta = self.reject_delta(&snapshot);

            for item in self.config.items_for(&snapshot.pool_name) {
                if !item.enabled {
                    continue;
                }
                let value = match item.kind {
                    NotifyKind::Liveness => snapshot.active_percent(),
                    NotifyKind::QueueFull => snapshot.queue_percent(),
                    NotifyKind::RejectCount => reject_delta.map(|d| d as f64),
                    NotifyKind::Change => None,
                };
                let Some(value) = value else {
                    continue;
                };

                report.evaluated += 1;
                let ctx = NotifyContext::new(snapshot.pool_name.as_str(), item, value)
                    .with_snapshot(snapshot.clone());
                match self.chain.fire(&ctx).await {
                    Ok(ChainOutcome::Delivered) => report.delivered += 1,
                    Ok(ChainOutcome::Vetoed) => report.vetoed += 1,
                    Err(_) => report.failed += 1,
                }
            }
        }

        self.last_rejects.lock().retain(|name, _| seen.contains(name));

        if report.evaluated > 0 {
            debug!(
                evaluated = report.evaluated,
                delivered = report.delivered,
                vetoed = report.vetoed,
                failed = report.failed,
                "Monitor tick"
            );
        }
        report
    }

    /// Rejections since the previous tick; `None` if the pool cannot count them.
    ///
    /// A count below the previous one means the pool was replaced, so the
    /// whole count is new.
    fn reject_delta(&self, snapshot: &PoolSnapshot) -> Option<i64> {
        if snapshot.reject_count < 0 {
            return None;
        }
        let previous = self
            .last_rejects
            .lock()
            .insert(snapshot.pool_name.clone(), snapshot.reject_count)
            .unwrap_or(0);
        if snapshot.reject_count < previous {
            return Some(snapshot.reject_count);
        }
        Some(snapshot.reject_count - previous)
    }

    /// Start the tick loop, and the purge loop when a store is attached
    pub fn start(self: &Arc<Self>) -> Result<(), MonitorError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(MonitorError::AlreadyRunning);
        }
        self.shutdown_tx.send_replace(false);

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            pools = self.registry.len(),
            "Starting pool monitor"
        );

        self.start_tick_loop();
        if self.store.is_some() {
            self.start_purge_loop();
        }
        Ok(())
    }

    /// Stop the loops and wait for them to exit
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping pool monitor");
        self.shutdown_tx.send_replace(true);

        let handles = [self.tick_handle.lock().take(), self.purge_handle.lock().take()];
        for handle in handles.into_iter().flatten() {
            if let Err(e) = handle.await {
                warn!("Monitor loop ended abnormally: {}", e);
            }
        }
    }

    fn start_tick_loop(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let interval = self.config.interval;
        let delay = jitter(self.config.initial_jitter);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => {
                    debug!("Monitor loop: shutdown before first tick");
                    return;
                }
            }

            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        monitor.run_once().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Monitor loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Monitor loop exited");
        });

        *self.tick_handle.lock() = Some(handle);
    }

    fn start_purge_loop(&self) {
        let Some(store) = self.store.clone() else {
            return;
        };
        let interval = self.config.purge_interval;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match store.purge_expired().await {
                            Ok(purged) => {
                                if purged > 0 {
                                    info!(count = purged, "Purged expired rate-limit windows");
                                }
                            }
                            Err(e) => {
                                error!("Rate-limit window purge failed: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Purge loop: shutdown requested");
                        break;
                    }
                }
            }

            debug!("Purge loop exited");
        });

        *self.purge_handle.lock() = Some(handle);
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

impl std::fmt::Debug for PoolMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolMonitor")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}
