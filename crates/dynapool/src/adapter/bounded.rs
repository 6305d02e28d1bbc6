//! Semaphore-bounded executor
//!
//! A lighter pool without a worker concept: every task is spawned on the
//! runtime and waits for one of `limit` permits. Only a single bound exists,
//! so its adapter reports it as both core and maximum size.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::executor::{validate_bounds, AdapterError, BoxTask, PoolAdapter};

/// Permits owed after a shrink that could not take them back immediately
#[derive(Debug)]
struct Limits {
    limit: usize,
    debt: usize,
}

/// Runs at most `limit` tasks at once; excess tasks wait for a permit
pub struct BoundedExecutor {
    name: String,
    semaphore: Arc<Semaphore>,
    limits: Arc<Mutex<Limits>>,
    active: Arc<AtomicUsize>,
    waiting: Arc<AtomicUsize>,
    runtime: Handle,
}

impl BoundedExecutor {
    /// Create an executor on the current tokio runtime
    pub fn new(name: impl Into<String>, limit: usize) -> Result<Self, AdapterError> {
        let name = name.into();
        let runtime = Handle::try_current().map_err(|_| AdapterError::NoRuntime {
            pool: name.clone(),
        })?;
        validate_bounds(0, i64::try_from(limit).unwrap_or(i64::MAX))?;

        info!(pool = %name, limit, "Creating bounded executor");

        Ok(Self {
            name,
            semaphore: Arc::new(Semaphore::new(limit)),
            limits: Arc::new(Mutex::new(Limits { limit, debt: 0 })),
            active: Arc::new(AtomicUsize::new(0)),
            waiting: Arc::new(AtomicUsize::new(0)),
            runtime,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current concurrency limit
    pub fn limit(&self) -> usize {
        self.limits.lock().limit
    }

    /// Change the concurrency limit.
    ///
    /// Shrinking takes back idle permits at once; permits held by running
    /// tasks are retired as those tasks finish.
    pub fn set_limit(&self, limit: usize) -> Result<(), AdapterError> {
        validate_bounds(0, i64::try_from(limit).unwrap_or(i64::MAX))?;

        let mut limits = self.limits.lock();
        let previous = limits.limit;
        if limit > previous {
            let grow = limit - previous;
            let cancelled = grow.min(limits.debt);
            limits.debt -= cancelled;
            self.semaphore.add_permits(grow - cancelled);
        } else {
            let shrink = previous - limit;
            let forgotten = self.semaphore.forget_permits(shrink);
            limits.debt += shrink - forgotten;
        }
        limits.limit = limit;

        debug!(pool = %self.name, previous, limit, debt = limits.debt, "Executor limit changed");
        Ok(())
    }

    /// Tasks holding a permit
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a permit
    pub fn waiting_count(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn spawn<F>(&self, future: F) -> Result<(), AdapterError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.execute(Box::pin(future))
    }

    /// Spawn a task that runs once a permit is free
    pub fn execute(&self, task: BoxTask) -> Result<(), AdapterError> {
        if self.semaphore.is_closed() {
            return Err(AdapterError::Shutdown {
                pool: self.name.clone(),
            });
        }

        let semaphore = Arc::clone(&self.semaphore);
        let limits = Arc::clone(&self.limits);
        let active = Arc::clone(&self.active);
        let waiting = Arc::clone(&self.waiting);
        let name = self.name.clone();

        waiting.fetch_add(1, Ordering::SeqCst);
        self.runtime.spawn(async move {
            let acquired = semaphore.acquire_owned().await;
            waiting.fetch_sub(1, Ordering::SeqCst);

            let permit = match acquired {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(pool = %name, "Executor closed before task could start");
                    return;
                }
            };

            active.fetch_add(1, Ordering::SeqCst);
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                warn!(pool = %name, "Task panicked");
            }
            active.fetch_sub(1, Ordering::SeqCst);
            release(&limits, permit);
        });

        Ok(())
    }

    /// Stop accepting work; tasks still waiting for a permit are dropped
    pub fn shutdown(&self) {
        if !self.semaphore.is_closed() {
            info!(pool = %self.name, "Shutting down bounded executor");
            self.semaphore.close();
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.semaphore.is_closed()
    }

    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.active_count() == 0 && self.waiting_count() == 0
    }
}

fn release(limits: &Mutex<Limits>, permit: OwnedSemaphorePermit) {
    let mut limits = limits.lock();
    if limits.debt > 0 {
        limits.debt -= 1;
        permit.forget();
    }
}

impl std::fmt::Debug for BoundedExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedExecutor")
            .field("name", &self.name)
            .field("limits", &*self.limits.lock())
            .field("active", &self.active_count())
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

/// [`PoolAdapter`] over a [`BoundedExecutor`]
///
/// Core and maximum size both map to the permit limit. Core changes are
/// accepted only when they do not exceed that limit, and change nothing.
#[derive(Debug, Clone)]
pub struct BoundedExecutorAdapter {
    executor: Arc<BoundedExecutor>,
}

impl BoundedExecutorAdapter {
    pub fn new(executor: Arc<BoundedExecutor>) -> Self {
        Self { executor }
    }
}

impl PoolAdapter for BoundedExecutorAdapter {
    fn name(&self) -> &str {
        self.executor.name()
    }

    fn original(&self) -> &dyn Any {
        self.executor.as_ref()
    }

    fn execute(&self, task: BoxTask) -> Result<(), AdapterError> {
        self.executor.execute(task)
    }

    fn core_pool_size(&self) -> i64 {
        self.maximum_pool_size()
    }

    fn set_core_pool_size(&self, core: i64) -> Result<(), AdapterError> {
        validate_bounds(core, self.maximum_pool_size())
    }

    fn maximum_pool_size(&self) -> i64 {
        i64::try_from(self.executor.limit()).unwrap_or(i64::MAX)
    }

    fn set_maximum_pool_size(&self, max: i64) -> Result<(), AdapterError> {
        validate_bounds(0, max)?;
        let limit = usize::try_from(max)
            .map_err(|_| AdapterError::InvalidConfig(format!("invalid limit {max}")))?;
        self.executor.set_limit(limit)
    }

    fn resize(&self, core: i64, max: i64) -> Result<(), AdapterError> {
        validate_bounds(core, max)?;
        self.set_maximum_pool_size(max)
    }

    fn pool_size(&self) -> i64 {
        self.active_count()
    }

    fn active_count(&self) -> i64 {
        i64::try_from(self.executor.active_count()).unwrap_or(i64::MAX)
    }

    fn queue_type(&self) -> String {
        "semaphore_wait".to_string()
    }

    fn queue_size(&self) -> i64 {
        i64::try_from(self.executor.waiting_count()).unwrap_or(i64::MAX)
    }

    fn queue_remaining_capacity(&self) -> i64 {
        i64::MAX
    }

    fn is_shutdown(&self) -> bool {
        self.executor.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.executor.is_terminated()
    }

    fn is_terminating(&self) -> bool {
        self.executor.is_shutdown() && !self.executor.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::UNSUPPORTED;
    use std::time::Duration;

    async fn eventually(mut condition: impl FnMut() -> bool) {
        for _ in 0..300 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    struct Tracker {
        current: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
    }

    impl Tracker {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
            })
        }

        fn task(self: &Arc<Self>, hold: Duration) -> impl Future<Output = ()> + Send + 'static {
            let tracker = Arc::clone(self);
            async move {
                let now = tracker.current.fetch_add(1, Ordering::SeqCst) + 1;
                tracker.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(hold).await;
                tracker.current.fetch_sub(1, Ordering::SeqCst);
                tracker.done.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn test_new_requires_runtime() {
        assert!(matches!(
            BoundedExecutor::new("orphan", 2),
            Err(AdapterError::NoRuntime { .. })
        ));
    }

    #[tokio::test]
    async fn test_zero_limit_is_invalid() {
        assert!(matches!(
            BoundedExecutor::new("zero", 0),
            Err(AdapterError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_limit_caps_concurrency() {
        let executor = BoundedExecutor::new("capped", 2).unwrap();
        let tracker = Tracker::new();

        for _ in 0..6 {
            executor.spawn(tracker.task(Duration::from_millis(20))).unwrap();
        }

        eventually(|| tracker.done.load(Ordering::SeqCst) == 6).await;
        assert_eq!(tracker.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_releases_its_slot() {
        let executor = Arc::new(BoundedExecutor::new("panicky", 1).unwrap());
        let adapter = BoundedExecutorAdapter::new(Arc::clone(&executor));
        let tracker = Tracker::new();

        executor.spawn(async { panic!("boom") }).unwrap();
        executor.spawn(tracker.task(Duration::from_millis(5))).unwrap();

        eventually(|| {
            tracker.done.load(Ordering::SeqCst) == 1
                && executor.waiting_count() == 0
                && executor.active_count() == 0
        })
        .await;
        assert_eq!(adapter.pool_size(), 0);

        executor.shutdown();
        assert!(adapter.is_terminated());
        assert!(!adapter.is_terminating());
    }

    #[tokio::test]
    async fn test_shrink_while_busy_takes_effect_as_tasks_finish() {
        let executor = BoundedExecutor::new("shrink", 3).unwrap();
        let first = Tracker::new();

        for _ in 0..3 {
            executor.spawn(first.task(Duration::from_millis(30))).unwrap();
        }
        eventually(|| executor.active_count() == 3).await;

        executor.set_limit(1).unwrap();
        assert_eq!(executor.limit(), 1);
        eventually(|| first.done.load(Ordering::SeqCst) == 3).await;

        let second = Tracker::new();
        for _ in 0..4 {
            executor.spawn(second.task(Duration::from_millis(10))).unwrap();
        }
        eventually(|| second.done.load(Ordering::SeqCst) == 4).await;
        assert_eq!(second.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_grow_cancels_outstanding_debt() {
        let executor = BoundedExecutor::new("grow", 2).unwrap();
        let tracker = Tracker::new();

        for _ in 0..2 {
            executor.spawn(tracker.task(Duration::from_millis(30))).unwrap();
        }
        eventually(|| executor.active_count() == 2).await;

        executor.set_limit(1).unwrap();
        executor.set_limit(4).unwrap();
        eventually(|| tracker.done.load(Ordering::SeqCst) == 2).await;

        let burst = Tracker::new();
        for _ in 0..8 {
            executor.spawn(burst.task(Duration::from_millis(30))).unwrap();
        }
        eventually(|| burst.done.load(Ordering::SeqCst) == 8).await;
        assert_eq!(burst.peak.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_work() {
        let executor = BoundedExecutor::new("closed", 1).unwrap();
        executor.shutdown();

        assert!(executor.is_shutdown());
        assert!(executor.is_terminated());
        assert!(matches!(
            executor.spawn(async {}),
            Err(AdapterError::Shutdown { .. })
        ));
    }

    #[tokio::test]
    async fn test_adapter_maps_single_bound() {
        let executor = Arc::new(BoundedExecutor::new("bounded", 4).unwrap());
        let adapter = BoundedExecutorAdapter::new(Arc::clone(&executor));

        assert_eq!(adapter.core_pool_size(), 4);
        assert_eq!(adapter.maximum_pool_size(), 4);
        assert_eq!(adapter.largest_pool_size(), UNSUPPORTED);
        assert_eq!(adapter.reject_count(), UNSUPPORTED);
        assert_eq!(adapter.reject_handler_type(), "unknown");
        assert_eq!(adapter.prestart_all_core_threads(), UNSUPPORTED);
        assert!(adapter.original().downcast_ref::<BoundedExecutor>().is_some());

        assert!(adapter.set_core_pool_size(2).is_ok());
        assert_eq!(adapter.core_pool_size(), 4);
        assert!(adapter.set_core_pool_size(5).is_err());

        adapter.resize(2, 6).unwrap();
        assert_eq!(executor.limit(), 6);
        assert!(adapter.resize(7, 6).is_err());
        assert_eq!(executor.limit(), 6);

        assert_eq!(adapter.snapshot().queue_percent(), None);
    }
}
