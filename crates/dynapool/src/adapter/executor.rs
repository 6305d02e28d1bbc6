//! The pool adapter capability set
//!
//! Every concrete pool is controlled and observed through [`PoolAdapter`].
//! Capabilities a pool cannot back fall through to default methods that
//! return conservative sentinels instead of failing.

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RejectPolicy;

/// Sentinel for a statistic the underlying pool cannot report.
///
/// Callers must read it as "unknown", never as zero.
pub const UNSUPPORTED: i64 = -1;

/// Tag reported when a pool has no observable queue or policy object
pub const UNKNOWN_TYPE: &str = "unknown";

/// A unit of work submitted to a pool
pub type BoxTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Adapter errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdapterError {
    /// A reconfiguration argument violates a pool invariant; nothing was changed
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),

    /// The pool's overflow policy refused the task
    #[error("task rejected by pool {pool}")]
    Rejected { pool: String },

    /// The pool no longer accepts work
    #[error("pool {pool} is shut down")]
    Shutdown { pool: String },

    /// Pool workers need a tokio runtime and none was current
    #[error("no tokio runtime available to drive pool {pool}")]
    NoRuntime { pool: String },
}

/// Check a (core, max) pair before applying it
pub fn validate_bounds(core: i64, max: i64) -> Result<(), AdapterError> {
    if core < 0 {
        return Err(AdapterError::InvalidConfig(format!(
            "core pool size must not be negative, got {core}"
        )));
    }
    if max < 1 {
        return Err(AdapterError::InvalidConfig(format!(
            "maximum pool size must be at least 1, got {max}"
        )));
    }
    if core > max {
        return Err(AdapterError::InvalidConfig(format!(
            "core pool size {core} exceeds maximum pool size {max}"
        )));
    }
    Ok(())
}

/// Uniform control and introspection surface over a worker pool.
///
/// All methods are non-blocking and may be called while the pool executes
/// tasks. Counters are backed by the pool's own primitives, not the adapter.
pub trait PoolAdapter: Send + Sync + 'static {
    /// Stable pool name
    fn name(&self) -> &str;

    /// The wrapped pool. Callers must not assume a concrete type.
    fn original(&self) -> &dyn Any;

    /// Submit a task to the wrapped pool
    fn execute(&self, task: BoxTask) -> Result<(), AdapterError>;

    fn core_pool_size(&self) -> i64;

    fn set_core_pool_size(&self, core: i64) -> Result<(), AdapterError>;

    fn maximum_pool_size(&self) -> i64;

    fn set_maximum_pool_size(&self, max: i64) -> Result<(), AdapterError>;

    /// Apply both bounds without ever exposing `core > max`.
    ///
    /// The larger bound is applied first. Pools holding both bounds under
    /// one lock should override this to apply them atomically.
    fn resize(&self, core: i64, max: i64) -> Result<(), AdapterError> {
        validate_bounds(core, max)?;
        if core > self.maximum_pool_size() {
            self.set_maximum_pool_size(max)?;
            self.set_core_pool_size(core)
        } else {
            self.set_core_pool_size(core)?;
            self.set_maximum_pool_size(max)
        }
    }

    /// Current (core, max). Pools that can read both under one lock override this.
    fn bounds(&self) -> (i64, i64) {
        (self.core_pool_size(), self.maximum_pool_size())
    }

    /// Current number of workers
    fn pool_size(&self) -> i64;

    /// Workers currently running a task
    fn active_count(&self) -> i64;

    fn largest_pool_size(&self) -> i64 {
        UNSUPPORTED
    }

    /// Tasks ever accepted
    fn task_count(&self) -> i64 {
        UNSUPPORTED
    }

    fn completed_task_count(&self) -> i64 {
        UNSUPPORTED
    }

    /// Tasks the overflow policy has handled since the pool started
    fn reject_count(&self) -> i64 {
        UNSUPPORTED
    }

    fn queue_type(&self) -> String {
        UNKNOWN_TYPE.to_string()
    }

    fn queue_size(&self) -> i64 {
        0
    }

    fn queue_remaining_capacity(&self) -> i64 {
        0
    }

    /// Queue size plus remaining capacity, saturating at `i64::MAX`
    fn queue_capacity(&self) -> i64 {
        self.queue_size()
            .saturating_add(self.queue_remaining_capacity())
    }

    /// Called after a queue capacity change so resizable queues can follow
    fn on_refresh_queue_capacity(&self, _capacity: i64) -> Result<(), AdapterError> {
        Ok(())
    }

    /// Start idle workers up to the core size; returns how many were started
    fn prestart_all_core_threads(&self) -> i64 {
        UNSUPPORTED
    }

    fn reject_policy(&self) -> Option<RejectPolicy> {
        None
    }

    fn set_reject_policy(&self, _policy: RejectPolicy) {}

    fn reject_handler_type(&self) -> String {
        self.reject_policy()
            .map(|p| p.to_string())
            .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
    }

    fn allows_core_thread_timeout(&self) -> bool {
        false
    }

    fn allow_core_thread_timeout(&self, _value: bool) {}

    /// Idle time after which surplus workers retire
    fn keep_alive(&self) -> Option<Duration> {
        None
    }

    fn set_keep_alive(&self, _keep_alive: Duration) {}

    fn is_shutdown(&self) -> bool {
        false
    }

    fn is_terminated(&self) -> bool {
        false
    }

    fn is_terminating(&self) -> bool {
        false
    }

    /// Point-in-time statistics for monitoring and export
    fn snapshot(&self) -> PoolSnapshot {
        let (core_pool_size, maximum_pool_size) = self.bounds();
        PoolSnapshot {
            pool_name: self.name().to_string(),
            core_pool_size,
            maximum_pool_size,
            pool_size: self.pool_size(),
            active_count: self.active_count(),
            largest_pool_size: self.largest_pool_size(),
            task_count: self.task_count(),
            completed_task_count: self.completed_task_count(),
            reject_count: self.reject_count(),
            queue_type: self.queue_type(),
            queue_size: self.queue_size(),
            queue_remaining_capacity: self.queue_remaining_capacity(),
            queue_capacity: self.queue_capacity(),
            reject_handler_type: self.reject_handler_type(),
            keep_alive_ms: self.keep_alive().map(|d| d.as_millis() as u64),
            allow_core_thread_timeout: self.allows_core_thread_timeout(),
            is_shutdown: self.is_shutdown(),
            is_terminating: self.is_terminating(),
            is_terminated: self.is_terminated(),
            captured_at: Utc::now(),
        }
    }
}

impl dyn PoolAdapter {
    /// Submit any future to the wrapped pool
    pub fn spawn<F>(&self, future: F) -> Result<(), AdapterError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.execute(Box::pin(future))
    }
}

/// Statistics captured from one adapter at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub pool_name: String,
    pub core_pool_size: i64,
    pub maximum_pool_size: i64,
    pub pool_size: i64,
    pub active_count: i64,
    pub largest_pool_size: i64,
    pub task_count: i64,
    pub completed_task_count: i64,
    pub reject_count: i64,
    pub queue_type: String,
    pub queue_size: i64,
    pub queue_remaining_capacity: i64,
    pub queue_capacity: i64,
    pub reject_handler_type: String,
    pub keep_alive_ms: Option<u64>,
    pub allow_core_thread_timeout: bool,
    pub is_shutdown: bool,
    pub is_terminating: bool,
    pub is_terminated: bool,
    pub captured_at: DateTime<Utc>,
}

impl PoolSnapshot {
    /// Active workers as a percentage of the maximum, if both are known
    pub fn active_percent(&self) -> Option<f64> {
        if self.active_count < 0 || self.maximum_pool_size <= 0 {
            return None;
        }
        Some(self.active_count as f64 * 100.0 / self.maximum_pool_size as f64)
    }

    /// Queue fill as a percentage of capacity.
    ///
    /// `None` when the queue is unobservable or unbounded.
    pub fn queue_percent(&self) -> Option<f64> {
        if self.queue_capacity <= 0 || self.queue_capacity == i64::MAX || self.queue_size < 0 {
            return None;
        }
        Some(self.queue_size as f64 * 100.0 / self.queue_capacity as f64)
    }
}
