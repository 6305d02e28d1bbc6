//! Pool adapters
//!
//! This module provides:
//! - [`PoolAdapter`] - Uniform control and introspection over any pool
//! - [`DynamicPool`] - Worker pool with resizable bounds, queue and policy
//! - [`BoundedExecutor`] - Semaphore-limited executor with a single bound
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dynapool::adapter::{DynamicPool, DynamicPoolAdapter, DynamicPoolConfig, PoolAdapter};
//!
//! let pool = Arc::new(DynamicPool::new("io-pool", DynamicPoolConfig::new(4, 16))?);
//! let adapter: Arc<dyn PoolAdapter> = Arc::new(DynamicPoolAdapter::new(pool));
//!
//! adapter.resize(8, 32)?;
//! println!("{:?}", adapter.snapshot());
//! ```

mod bounded;
mod dynamic;
mod executor;
mod policy;

pub use bounded::{BoundedExecutor, BoundedExecutorAdapter};
pub use dynamic::{DynamicPool, DynamicPoolAdapter, DynamicPoolConfig, UNBOUNDED_QUEUE};
pub use executor::{
    validate_bounds, AdapterError, BoxTask, PoolAdapter, PoolSnapshot, UNKNOWN_TYPE, UNSUPPORTED,
};
pub use policy::RejectPolicy;
