//! Tokio-backed worker pool with runtime-adjustable bounds
//!
//! [`DynamicPool`] mirrors the classic executor model: up to `core` workers
//! are started eagerly, further work is queued, and once the queue is full
//! extra workers are started up to `max`. Everything beyond that goes to the
//! [`RejectPolicy`]. Bounds, queue capacity, policy and keep-alive can all be
//! changed while tasks are running.

use std::any::Any;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::executor::{validate_bounds, AdapterError, BoxTask, PoolAdapter};
use super::RejectPolicy;

/// Queue capacity meaning "never full"
pub const UNBOUNDED_QUEUE: usize = usize::MAX;

/// Dynamic pool configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicPoolConfig {
    /// Workers kept alive even when idle
    pub core_pool_size: usize,

    /// Upper bound on workers
    pub maximum_pool_size: usize,

    /// Queue capacity ([`UNBOUNDED_QUEUE`] for unbounded)
    pub queue_capacity: usize,

    /// Idle time before a surplus worker retires
    #[serde(with = "duration_millis")]
    pub keep_alive: Duration,

    /// Whether core workers also retire after `keep_alive`
    pub allow_core_thread_timeout: bool,

    /// Overflow policy
    pub reject_policy: RejectPolicy,
}

impl Default for DynamicPoolConfig {
    fn default() -> Self {
        Self {
            core_pool_size: 4,
            maximum_pool_size: 8,
            queue_capacity: 1024,
            keep_alive: Duration::from_secs(60),
            allow_core_thread_timeout: false,
            reject_policy: RejectPolicy::Abort,
        }
    }
}

impl DynamicPoolConfig {
    /// Create a configuration with the given bounds
    pub fn new(core_pool_size: usize, maximum_pool_size: usize) -> Self {
        Self {
            core_pool_size,
            maximum_pool_size,
            ..Default::default()
        }
    }

    /// Set the queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Use an unbounded queue
    pub fn with_unbounded_queue(mut self) -> Self {
        self.queue_capacity = UNBOUNDED_QUEUE;
        self
    }

    /// Set the keep-alive for surplus workers
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Let core workers retire when idle
    pub fn with_core_thread_timeout(mut self, allow: bool) -> Self {
        self.allow_core_thread_timeout = allow;
        self
    }

    /// Set the overflow policy
    pub fn with_reject_policy(mut self, policy: RejectPolicy) -> Self {
        self.reject_policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AdapterError> {
        validate_bounds(to_i64(self.core_pool_size), to_i64(self.maximum_pool_size))
    }
}

struct PoolState {
    core: usize,
    max: usize,
    queue: VecDeque<BoxTask>,
    queue_capacity: usize,
    workers: usize,
    largest: usize,
    keep_alive: Duration,
    allow_core_timeout: bool,
    policy: RejectPolicy,
    shutdown: bool,
}

impl PoolState {
    fn is_terminated(&self) -> bool {
        self.shutdown && self.workers == 0 && self.queue.is_empty()
    }

    fn may_time_out(&self) -> bool {
        self.workers > self.core || self.allow_core_timeout
    }
}

struct Shared {
    name: String,
    state: Mutex<PoolState>,
    available: Notify,
    terminated: Notify,
    active: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    rejected: AtomicU64,
}

impl Shared {
    async fn run_task(&self, task: BoxTask) {
        self.active.fetch_add(1, Ordering::SeqCst);
        if AssertUnwindSafe(task).catch_unwind().await.is_err() {
            warn!(pool = %self.name, "Task panicked");
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn retire_worker(&self, state: &mut PoolState) {
        state.workers -= 1;
        if state.is_terminated() {
            debug!(pool = %self.name, "Last worker exited, pool terminated");
            self.terminated.notify_waiters();
        }
    }
}

async fn run_worker(shared: Arc<Shared>, first: Option<BoxTask>) {
    let mut next = first;

    loop {
        if let Some(task) = next.take() {
            shared.run_task(task).await;
        }

        let notified = shared.available.notified();
        tokio::pin!(notified);

        let keep_alive = {
            let mut state = shared.state.lock();
            if let Some(task) = state.queue.pop_front() {
                next = Some(task);
                continue;
            }
            if state.shutdown || state.workers > state.max {
                shared.retire_worker(&mut state);
                return;
            }
            notified.as_mut().enable();
            state.keep_alive
        };

        if tokio::time::timeout(keep_alive, notified).await.is_err() {
            let mut state = shared.state.lock();
            if state.queue.is_empty() && state.may_time_out() {
                shared.retire_worker(&mut state);
                return;
            }
        }
    }
}

/// A worker pool whose sizing and overflow policy can change at runtime
///
/// # Example
///
/// ```ignore
/// use dynapool::adapter::{DynamicPool, DynamicPoolConfig, RejectPolicy};
///
/// let pool = DynamicPool::new(
///     "io-pool",
///     DynamicPoolConfig::new(4, 16)
///         .with_queue_capacity(256)
///         .with_reject_policy(RejectPolicy::CallerRuns),
/// )?;
///
/// pool.spawn(async { /* work */ })?;
/// pool.set_bounds(8, 32)?;
/// ```
pub struct DynamicPool {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl DynamicPool {
    /// Create a pool driven by the current tokio runtime
    pub fn new(name: impl Into<String>, config: DynamicPoolConfig) -> Result<Self, AdapterError> {
        let name = name.into();
        let runtime = Handle::try_current().map_err(|_| AdapterError::NoRuntime {
            pool: name.clone(),
        })?;
        Self::with_handle(name, config, runtime)
    }

    /// Create a pool driven by the given runtime
    pub fn with_handle(
        name: impl Into<String>,
        config: DynamicPoolConfig,
        runtime: Handle,
    ) -> Result<Self, AdapterError> {
        config.validate()?;
        let name = name.into();

        info!(
            pool = %name,
            core = config.core_pool_size,
            max = config.maximum_pool_size,
            queue_capacity = config.queue_capacity,
            policy = %config.reject_policy,
            "Creating dynamic pool"
        );

        let state = PoolState {
            core: config.core_pool_size,
            max: config.maximum_pool_size,
            queue: VecDeque::new(),
            queue_capacity: config.queue_capacity,
            workers: 0,
            largest: 0,
            keep_alive: config.keep_alive,
            allow_core_timeout: config.allow_core_thread_timeout,
            policy: config.reject_policy,
            shutdown: false,
        };

        Ok(Self {
            shared: Arc::new(Shared {
                name,
                state: Mutex::new(state),
                available: Notify::new(),
                terminated: Notify::new(),
                active: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
            runtime,
        })
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Submit a future
    pub fn spawn<F>(&self, future: F) -> Result<(), AdapterError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.execute(Box::pin(future))
    }

    /// Submit a boxed task
    pub fn execute(&self, task: BoxTask) -> Result<(), AdapterError> {
        let mut state = self.shared.state.lock();

        if state.shutdown {
            self.shared.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(AdapterError::Shutdown {
                pool: self.shared.name.clone(),
            });
        }

        if state.workers < state.core {
            self.shared.submitted.fetch_add(1, Ordering::Relaxed);
            self.start_worker(&mut state, Some(task));
            return Ok(());
        }

        if state.queue.len() < state.queue_capacity {
            self.shared.submitted.fetch_add(1, Ordering::Relaxed);
            state.queue.push_back(task);
            if state.workers == 0 {
                self.start_worker(&mut state, None);
            }
            drop(state);
            self.shared.available.notify_one();
            return Ok(());
        }

        if state.workers < state.max {
            self.shared.submitted.fetch_add(1, Ordering::Relaxed);
            self.start_worker(&mut state, Some(task));
            return Ok(());
        }

        self.reject(state, task)
    }

    fn reject(
        &self,
        mut state: parking_lot::MutexGuard<'_, PoolState>,
        task: BoxTask,
    ) -> Result<(), AdapterError> {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        let policy = state.policy;

        debug!(
            pool = %self.shared.name,
            %policy,
            workers = state.workers,
            queued = state.queue.len(),
            "Pool saturated, applying reject policy"
        );

        match policy {
            RejectPolicy::Abort => Err(AdapterError::Rejected {
                pool: self.shared.name.clone(),
            }),
            RejectPolicy::Discard => Ok(()),
            RejectPolicy::DiscardOldest => {
                if state.queue.pop_front().is_some() {
                    self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                    state.queue.push_back(task);
                    drop(state);
                    self.shared.available.notify_one();
                }
                Ok(())
            }
            RejectPolicy::CallerRuns => {
                drop(state);
                self.runtime.spawn(task);
                Ok(())
            }
        }
    }

    fn start_worker(&self, state: &mut PoolState, first: Option<BoxTask>) {
        state.workers += 1;
        state.largest = state.largest.max(state.workers);
        self.runtime
            .spawn(run_worker(Arc::clone(&self.shared), first));
    }

    /// Start workers for queued work that the current core size allows
    fn fill_core(&self, state: &mut PoolState) {
        let missing = state
            .core
            .saturating_sub(state.workers)
            .min(state.queue.len());
        for _ in 0..missing {
            self.start_worker(state, None);
        }
    }

    /// Start idle workers until the pool holds `core` of them.
    ///
    /// Returns the number started; zero once the pool is shut down.
    pub fn prestart_all_core_threads(&self) -> usize {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return 0;
        }
        let missing = state.core.saturating_sub(state.workers);
        for _ in 0..missing {
            self.start_worker(&mut state, None);
        }
        if missing > 0 {
            debug!(pool = %self.shared.name, started = missing, "Prestarted core workers");
        }
        missing
    }

    /// Current (core, max) read under one lock
    pub fn bounds(&self) -> (usize, usize) {
        let state = self.shared.state.lock();
        (state.core, state.max)
    }

    pub fn core_pool_size(&self) -> usize {
        self.shared.state.lock().core
    }

    pub fn maximum_pool_size(&self) -> usize {
        self.shared.state.lock().max
    }

    /// Change the core size; fails if it would exceed the maximum
    pub fn set_core_pool_size(&self, core: usize) -> Result<(), AdapterError> {
        let mut state = self.shared.state.lock();
        validate_bounds(to_i64(core), to_i64(state.max))?;
        let previous = std::mem::replace(&mut state.core, core);
        self.fill_core(&mut state);
        debug!(pool = %self.shared.name, previous, core, "Core pool size changed");
        Ok(())
    }

    /// Change the maximum size; fails if it would drop below the core size
    pub fn set_maximum_pool_size(&self, max: usize) -> Result<(), AdapterError> {
        let mut state = self.shared.state.lock();
        validate_bounds(to_i64(state.core), to_i64(max))?;
        let previous = std::mem::replace(&mut state.max, max);
        let surplus = state.workers > max;
        drop(state);
        if surplus {
            self.shared.available.notify_waiters();
        }
        debug!(pool = %self.shared.name, previous, max, "Maximum pool size changed");
        Ok(())
    }

    /// Change both bounds atomically
    pub fn set_bounds(&self, core: usize, max: usize) -> Result<(), AdapterError> {
        validate_bounds(to_i64(core), to_i64(max))?;
        let mut state = self.shared.state.lock();
        state.core = core;
        state.max = max;
        self.fill_core(&mut state);
        let surplus = state.workers > max;
        drop(state);
        if surplus {
            self.shared.available.notify_waiters();
        }
        debug!(pool = %self.shared.name, core, max, "Pool bounds changed");
        Ok(())
    }

    /// Number of live workers
    pub fn pool_size(&self) -> usize {
        self.shared.state.lock().workers
    }

    /// Workers currently running a task
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Most workers ever alive at once
    pub fn largest_pool_size(&self) -> usize {
        self.shared.state.lock().largest
    }

    /// Tasks accepted into the pool
    pub fn task_count(&self) -> u64 {
        self.shared.submitted.load(Ordering::Relaxed)
    }

    pub fn completed_task_count(&self) -> u64 {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Submissions handled by the reject policy or refused after shutdown
    pub fn reject_count(&self) -> u64 {
        self.shared.rejected.load(Ordering::Relaxed)
    }

    pub fn queue_len(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn queue_capacity(&self) -> usize {
        self.shared.state.lock().queue_capacity
    }

    /// Free queue slots; `UNBOUNDED_QUEUE` when unbounded
    pub fn queue_remaining_capacity(&self) -> usize {
        let state = self.shared.state.lock();
        if state.queue_capacity == UNBOUNDED_QUEUE {
            UNBOUNDED_QUEUE
        } else {
            state.queue_capacity.saturating_sub(state.queue.len())
        }
    }

    /// Resize the queue; fails if more tasks are already queued
    pub fn set_queue_capacity(&self, capacity: usize) -> Result<(), AdapterError> {
        let mut state = self.shared.state.lock();
        if capacity < state.queue.len() {
            return Err(AdapterError::InvalidConfig(format!(
                "queue capacity {capacity} is below the {} tasks already queued",
                state.queue.len()
            )));
        }
        let previous = std::mem::replace(&mut state.queue_capacity, capacity);
        debug!(pool = %self.shared.name, previous, capacity, "Queue capacity changed");
        Ok(())
    }

    pub fn reject_policy(&self) -> RejectPolicy {
        self.shared.state.lock().policy
    }

    pub fn set_reject_policy(&self, policy: RejectPolicy) {
        self.shared.state.lock().policy = policy;
    }

    pub fn keep_alive(&self) -> Duration {
        self.shared.state.lock().keep_alive
    }

    pub fn set_keep_alive(&self, keep_alive: Duration) {
        self.shared.state.lock().keep_alive = keep_alive;
        self.shared.available.notify_waiters();
    }

    pub fn allows_core_thread_timeout(&self) -> bool {
        self.shared.state.lock().allow_core_timeout
    }

    pub fn allow_core_thread_timeout(&self, allow: bool) {
        self.shared.state.lock().allow_core_timeout = allow;
        if allow {
            self.shared.available.notify_waiters();
        }
    }

    /// Stop accepting work; queued tasks still run
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;
        let terminated = state.is_terminated();
        drop(state);

        info!(pool = %self.shared.name, "Shutting down dynamic pool");
        self.shared.available.notify_waiters();
        if terminated {
            self.shared.terminated.notify_waiters();
        }
    }

    /// Stop accepting work and drop queued tasks, returning how many were dropped
    pub fn shutdown_now(&self) -> usize {
        let dropped = {
            let mut state = self.shared.state.lock();
            let dropped = state.queue.len();
            state.queue.clear();
            dropped
        };
        self.shutdown();
        if dropped > 0 {
            warn!(pool = %self.shared.name, dropped, "Dropped queued tasks on shutdown");
        }
        dropped
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state.lock().is_terminated()
    }

    /// Shut down but workers or queued tasks remain
    pub fn is_terminating(&self) -> bool {
        let state = self.shared.state.lock();
        state.shutdown && !state.is_terminated()
    }

    /// Wait until the pool terminates, returning `false` on timeout
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.terminated.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_terminated() {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.is_terminated();
            }
        }
    }
}

impl std::fmt::Debug for DynamicPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("DynamicPool")
            .field("name", &self.shared.name)
            .field("core", &state.core)
            .field("max", &state.max)
            .field("workers", &state.workers)
            .field("queued", &state.queue.len())
            .field("queue_capacity", &state.queue_capacity)
            .field("policy", &state.policy)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

/// [`PoolAdapter`] over a [`DynamicPool`]; supports every capability
#[derive(Debug, Clone)]
pub struct DynamicPoolAdapter {
    pool: Arc<DynamicPool>,
}

impl DynamicPoolAdapter {
    pub fn new(pool: Arc<DynamicPool>) -> Self {
        Self { pool }
    }

    /// The wrapped pool
    pub fn pool(&self) -> &Arc<DynamicPool> {
        &self.pool
    }
}

impl PoolAdapter for DynamicPoolAdapter {
    fn name(&self) -> &str {
        self.pool.name()
    }

    fn original(&self) -> &dyn Any {
        self.pool.as_ref()
    }

    fn execute(&self, task: BoxTask) -> Result<(), AdapterError> {
        self.pool.execute(task)
    }

    fn core_pool_size(&self) -> i64 {
        to_i64(self.pool.core_pool_size())
    }

    fn set_core_pool_size(&self, core: i64) -> Result<(), AdapterError> {
        self.pool.set_core_pool_size(to_usize(core, "core pool size")?)
    }

    fn maximum_pool_size(&self) -> i64 {
        to_i64(self.pool.maximum_pool_size())
    }

    fn set_maximum_pool_size(&self, max: i64) -> Result<(), AdapterError> {
        self.pool
            .set_maximum_pool_size(to_usize(max, "maximum pool size")?)
    }

    fn resize(&self, core: i64, max: i64) -> Result<(), AdapterError> {
        validate_bounds(core, max)?;
        self.pool.set_bounds(
            to_usize(core, "core pool size")?,
            to_usize(max, "maximum pool size")?,
        )
    }

    fn bounds(&self) -> (i64, i64) {
        let (core, max) = self.pool.bounds();
        (to_i64(core), to_i64(max))
    }

    fn pool_size(&self) -> i64 {
        to_i64(self.pool.pool_size())
    }

    fn active_count(&self) -> i64 {
        to_i64(self.pool.active_count())
    }

    fn largest_pool_size(&self) -> i64 {
        to_i64(self.pool.largest_pool_size())
    }

    fn task_count(&self) -> i64 {
        i64::try_from(self.pool.task_count()).unwrap_or(i64::MAX)
    }

    fn completed_task_count(&self) -> i64 {
        i64::try_from(self.pool.completed_task_count()).unwrap_or(i64::MAX)
    }

    fn reject_count(&self) -> i64 {
        i64::try_from(self.pool.reject_count()).unwrap_or(i64::MAX)
    }

    fn queue_type(&self) -> String {
        if self.pool.queue_capacity() == UNBOUNDED_QUEUE {
            "unbounded_fifo".to_string()
        } else {
            "resizable_fifo".to_string()
        }
    }

    fn queue_size(&self) -> i64 {
        to_i64(self.pool.queue_len())
    }

    fn queue_remaining_capacity(&self) -> i64 {
        to_i64(self.pool.queue_remaining_capacity())
    }

    fn on_refresh_queue_capacity(&self, capacity: i64) -> Result<(), AdapterError> {
        self.pool
            .set_queue_capacity(to_usize(capacity, "queue capacity")?)
    }

    fn prestart_all_core_threads(&self) -> i64 {
        to_i64(self.pool.prestart_all_core_threads())
    }

    fn reject_policy(&self) -> Option<RejectPolicy> {
        Some(self.pool.reject_policy())
    }

    fn set_reject_policy(&self, policy: RejectPolicy) {
        self.pool.set_reject_policy(policy);
    }

    fn allows_core_thread_timeout(&self) -> bool {
        self.pool.allows_core_thread_timeout()
    }

    fn allow_core_thread_timeout(&self, value: bool) {
        self.pool.allow_core_thread_timeout(value);
    }

    fn keep_alive(&self) -> Option<Duration> {
        Some(self.pool.keep_alive())
    }

    fn set_keep_alive(&self, keep_alive: Duration) {
        self.pool.set_keep_alive(keep_alive);
    }

    fn is_shutdown(&self) -> bool {
        self.pool.is_shutdown()
    }

    fn is_terminated(&self) -> bool {
        self.pool.is_terminated()
    }

    fn is_terminating(&self) -> bool {
        self.pool.is_terminating()
    }
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_usize(value: i64, what: &str) -> Result<usize, AdapterError> {
    usize::try_from(value)
        .map_err(|_| AdapterError::InvalidConfig(format!("{what} must not be negative, got {value}")))
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
