//! Control plane assembly
//!
//! [`ControlPlane`] owns the registry, context bridge, filter chain,
//! refresher and monitor. Everything is shared by `Arc`; there is no global
//! state.
//!
//! # Example
//!
//! ```ignore
//! use dynapool::prelude::*;
//!
//! let plane = ControlPlane::builder(ControlPlaneConfig::from_env()?)
//!     .with_store(Arc::new(InMemoryRateLimitStore::new()))
//!     .build();
//!
//! let pool = plane.create_dynamic_pool("io-pool", DynamicPoolConfig::new(4, 16))?;
//! plane.start()?;
//! // ...
//! plane.shutdown(Duration::from_secs(10)).await;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::adapter::{
    AdapterError, BoundedExecutor, DynamicPool, DynamicPoolAdapter, DynamicPoolConfig, PoolAdapter,
};
use crate::config::ControlPlaneConfig;
use crate::context::{AppContext, ContextHolder, Environment};
use crate::limiter::{InMemoryRateLimitStore, RateLimitStore, RateLimiter};
use crate::monitor::{MonitorError, PoolMonitor};
use crate::notify::{
    Delivery, LogDelivery, NotifyChain, NotifyFilter, NotifyKind, RateLimitFilter, ThresholdFilter,
};
use crate::refresh::{PoolProperties, RefreshError, RefreshReport, Refresher};
use crate::registry::{PoolRegistry, RegistryError};

/// Bean name of the [`PoolRegistry`]
pub const REGISTRY_BEAN: &str = "poolRegistry";
/// Bean name of the [`NotifyChain`]
pub const CHAIN_BEAN: &str = "notifyChain";
/// Bean name of the [`Refresher`]
pub const REFRESHER_BEAN: &str = "poolRefresher";

/// Errors creating pools through the control plane
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Builder for [`ControlPlane`]
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    store: Option<Arc<dyn RateLimitStore>>,
    delivery: Option<Arc<dyn Delivery>>,
    environment: Option<Environment>,
}

impl ControlPlaneBuilder {
    /// Shared rate-limit store (default: in-memory)
    pub fn with_store(mut self, store: Arc<dyn RateLimitStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Notification delivery (default: [`LogDelivery`])
    pub fn with_delivery(mut self, delivery: Arc<dyn Delivery>) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Environment for the context bridge (default: read from the process
    /// environment using the configured prefix)
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn build(self) -> ControlPlane {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryRateLimitStore::new()));
        let delivery = self.delivery.unwrap_or_else(|| Arc::new(LogDelivery));
        let environment = self
            .environment
            .unwrap_or_else(|| Environment::from_env(&config.env_prefix));

        let registry = Arc::new(PoolRegistry::new());

        let limiter = RateLimiter::new(Arc::clone(&store), config.rate_limiter.clone());
        let filters: Vec<Arc<dyn NotifyFilter>> = vec![
            Arc::new(ThresholdFilter),
            Arc::new(RateLimitFilter::new(limiter)),
        ];
        let chain = Arc::new(NotifyChain::new(filters, delivery));

        let refresher = Arc::new(
            Refresher::new(Arc::clone(&registry))
                .with_chain(Arc::clone(&chain))
                .with_change_item(config.monitor.item(NotifyKind::Change)),
        );

        let monitor = Arc::new(
            PoolMonitor::new(Arc::clone(&registry), Arc::clone(&chain), config.monitor.clone())
                .with_store(store),
        );

        let context = Arc::new(ContextHolder::new());
        context.initialize(
            AppContext::new(environment)
                .with_bean(REGISTRY_BEAN, Arc::clone(&registry))
                .with_bean(CHAIN_BEAN, Arc::clone(&chain))
                .with_bean(REFRESHER_BEAN, Arc::clone(&refresher)),
        );

        ControlPlane {
            config,
            registry,
            context,
            chain,
            refresher,
            monitor,
        }
    }
}

/// Owns every control-plane component
pub struct ControlPlane {
    config: ControlPlaneConfig,
    registry: Arc<PoolRegistry>,
    context: Arc<ContextHolder>,
    chain: Arc<NotifyChain>,
    refresher: Arc<Refresher>,
    monitor: Arc<PoolMonitor>,
}

impl ControlPlane {
    pub fn builder(config: ControlPlaneConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder {
            config,
            store: None,
            delivery: None,
            environment: None,
        }
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PoolRegistry> {
        &self.registry
    }

    pub fn context(&self) -> &Arc<ContextHolder> {
        &self.context
    }

    pub fn chain(&self) -> &Arc<NotifyChain> {
        &self.chain
    }

    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }

    pub fn monitor(&self) -> &Arc<PoolMonitor> {
        &self.monitor
    }

    /// Register an adapter under its own name
    pub fn register_pool(&self, adapter: Arc<dyn PoolAdapter>) -> Result<(), RegistryError> {
        self.registry.register_adapter(adapter)
    }

    /// Create a [`DynamicPool`] and register it
    pub fn create_dynamic_pool(
        &self,
        name: &str,
        config: DynamicPoolConfig,
    ) -> Result<Arc<DynamicPool>, ControlPlaneError> {
        if self.registry.contains(name) {
            return Err(RegistryError::DuplicateName(name.to_string()).into());
        }
        let pool = Arc::new(DynamicPool::new(name, config)?);
        self.registry
            .register(name, Arc::new(DynamicPoolAdapter::new(Arc::clone(&pool))))?;
        Ok(pool)
    }

    /// Apply properties to one pool and notify on change
    pub async fn refresh(
        &self,
        name: &str,
        props: &PoolProperties,
    ) -> Result<RefreshReport, RefreshError> {
        self.refresher.refresh(name, props).await
    }

    pub async fn refresh_all(
        &self,
        pools: &BTreeMap<String, PoolProperties>,
    ) -> Vec<(String, Result<RefreshReport, RefreshError>)> {
        self.refresher.refresh_all(pools).await
    }

    /// Start monitoring
    pub fn start(&self) -> Result<(), MonitorError> {
        self.monitor.start()
    }

    /// Stop monitoring, then deregister and shut down every pool.
    ///
    /// Dynamic pools get `grace` to drain before queued tasks are dropped.
    pub async fn shutdown(&self, grace: Duration) {
        info!(pools = self.registry.len(), "Shutting down control plane");
        self.monitor.stop().await;

        for adapter in self.registry.drain() {
            let Some(pool) = begin_shutdown(adapter.as_ref()) else {
                continue;
            };
            if !pool.await_termination(grace).await {
                let dropped = pool.shutdown_now();
                warn!(
                    pool = %adapter.name(),
                    dropped,
                    "Pool did not drain in time, queued tasks dropped"
                );
            }
        }

        info!("Control plane shutdown complete");
    }
}

/// Stop accepting work; returns the pool when it can be awaited
fn begin_shutdown(adapter: &dyn PoolAdapter) -> Option<&DynamicPool> {
    let original = adapter.original();
    if let Some(pool) = original.downcast_ref::<DynamicPool>() {
        pool.shutdown();
        return Some(pool);
    }
    if let Some(executor) = original.downcast_ref::<BoundedExecutor>() {
        executor.shutdown();
    } else {
        debug!(pool = %adapter.name(), "No shutdown hook for pool type");
    }
    None
}

impl std::fmt::Debug for ControlPlane {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlPlane")
            .field("registry", &self.registry)
            .field("chain", &self.chain)
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}
