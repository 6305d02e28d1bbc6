//! # Dynapool
//!
//! Runtime control plane for worker pools: resize pools while they run,
//! export their statistics, and raise alerts that are rate limited across
//! every process sharing one store.
//!
//! ## Features
//!
//! - **Uniform adapters**: one capability trait over heterogeneous pools, with `-1` for
//!   statistics a pool cannot report
//! - **Live reconfiguration**: bounds, queue capacity, reject policy and keep-alive change
//!   without restarting the pool
//! - **Cluster-wide alert limits**: a fixed-window limiter backed by a single atomic
//!   upsert in PostgreSQL, failing open when the store is unreachable
//! - **Filter chain**: ordered, short-circuiting stages in front of delivery
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ControlPlane                          │
//! │  (registry, context bridge, refresher, monitor)             │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PoolRegistry → PoolAdapter                   │
//! │  (DynamicPool, BoundedExecutor, any custom pool)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ snapshots
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │      PoolMonitor → NotifyChain → Delivery                    │
//! │  (threshold and rate-limit stages; limits kept in the       │
//! │   shared RateLimitStore: PostgreSQL or in-memory)           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use dynapool::prelude::*;
//!
//! let plane = ControlPlane::builder(ControlPlaneConfig::from_env()?).build();
//! let pool = plane.create_dynamic_pool("io-pool", DynamicPoolConfig::new(4, 16))?;
//! plane.start()?;
//!
//! pool.spawn(async { /* work */ })?;
//!
//! plane
//!     .refresh("io-pool", &PoolProperties::new().with_maximum_pool_size(32))
//!     .await?;
//! ```

pub mod adapter;
pub mod config;
pub mod context;
pub mod limiter;
pub mod monitor;
pub mod notify;
pub mod plane;
pub mod refresh;
pub mod registry;

pub use config::{ConfigError, ControlPlaneConfig};
pub use plane::{ControlPlane, ControlPlaneBuilder, ControlPlaneError};

/// Prelude for common imports
pub mod prelude {
    pub use crate::adapter::{
        AdapterError, BoundedExecutor, BoundedExecutorAdapter, DynamicPool, DynamicPoolAdapter,
        DynamicPoolConfig, PoolAdapter, PoolSnapshot, RejectPolicy, UNSUPPORTED,
    };
    pub use crate::config::{ConfigError, ControlPlaneConfig};
    pub use crate::context::{ContextError, ContextHolder, Environment};
    pub use crate::limiter::{
        InMemoryRateLimitStore, PostgresRateLimitStore, RateLimitDecision, RateLimitStore,
        RateLimiter, RateLimiterConfig, StoreError,
    };
    pub use crate::monitor::{MonitorConfig, PoolMonitor, TickReport};
    pub use crate::notify::{
        ChainOutcome, Delivery, LogDelivery, NotifyChain, NotifyContext, NotifyError,
        NotifyFilter, NotifyItem, NotifyKind,
    };
    pub use crate::plane::{ControlPlane, ControlPlaneError};
    pub use crate::refresh::{PoolProperties, RefreshError, RefreshReport, Refresher};
    pub use crate::registry::{PoolRegistry, RegistryError};
}
