//! Integration tests for the registry, adapters, reconfiguration and context bridge
//!
//! Run with: cargo test -p dynapool --test control_plane_test

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use dynapool::adapter::{
    AdapterError, BoundedExecutor, BoundedExecutorAdapter, DynamicPool, DynamicPoolAdapter,
    DynamicPoolConfig, PoolAdapter, RejectPolicy, UNKNOWN_TYPE, UNSUPPORTED,
};
use dynapool::context::{AppContext, ContextError, ContextHolder, Environment};
use dynapool::notify::{ChannelDelivery, NotifyKind};
use dynapool::refresh::{PoolProperties, RefreshError};
use dynapool::registry::{PoolRegistry, RegistryError};
use dynapool::{ControlPlane, ControlPlaneConfig};

fn dynamic(name: &str, core: usize, max: usize) -> Arc<dyn PoolAdapter> {
    let pool = DynamicPool::new(name, DynamicPoolConfig::new(core, max)).unwrap();
    Arc::new(DynamicPoolAdapter::new(Arc::new(pool)))
}

fn plane() -> (
    ControlPlane,
    tokio::sync::mpsc::UnboundedReceiver<dynapool::notify::NotifyContext>,
) {
    let (delivery, rx) = ChannelDelivery::new();
    let plane = ControlPlane::builder(ControlPlaneConfig::default())
        .with_delivery(Arc::new(delivery))
        .with_environment(
            Environment::new()
                .with_property("pool.io.core", "8")
                .with_active_profiles(["prod"]),
        )
        .build();
    (plane, rx)
}

// ============================================
// Registry
// ============================================

#[tokio::test]
async fn test_registry_identity_and_removal() {
    let registry = PoolRegistry::new();
    let adapter = dynamic("io-pool", 1, 2);

    registry.register("io-pool", Arc::clone(&adapter)).unwrap();
    let found = registry.lookup("io-pool").unwrap();
    assert!(Arc::ptr_eq(&found, &adapter));

    assert!(registry.deregister("io-pool").is_some());
    assert!(registry.lookup("io-pool").is_none());
    assert!(registry.deregister("io-pool").is_none());
}

#[tokio::test]
async fn test_duplicate_name_keeps_original() {
    let registry = PoolRegistry::new();
    let original = dynamic("io-pool", 1, 2);
    let other = dynamic("io-pool", 3, 4);

    registry.register("io-pool", Arc::clone(&original)).unwrap();
    let result = registry.register("io-pool", other);

    assert_eq!(result, Err(RegistryError::DuplicateName("io-pool".into())));
    assert!(Arc::ptr_eq(&registry.lookup("io-pool").unwrap(), &original));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_list_all_is_a_snapshot() {
    let registry = PoolRegistry::new();
    registry.register_adapter(dynamic("a", 1, 1)).unwrap();
    registry.register_adapter(dynamic("b", 1, 1)).unwrap();

    let listed: Vec<_> = registry.list_all().collect();
    registry.deregister("a");

    assert_eq!(listed.len(), 2);
    assert_eq!(registry.names(), vec!["b".to_string()]);
}

// ============================================
// Adapters
// ============================================

#[tokio::test]
async fn test_bounded_executor_reports_unsupported() {
    let executor = Arc::new(BoundedExecutor::new("bounded", 3).unwrap());
    let adapter: Arc<dyn PoolAdapter> = Arc::new(BoundedExecutorAdapter::new(executor));

    let snapshot = adapter.snapshot();
    assert_eq!(snapshot.core_pool_size, 3);
    assert_eq!(snapshot.maximum_pool_size, 3);
    assert_eq!(snapshot.largest_pool_size, UNSUPPORTED);
    assert_eq!(snapshot.task_count, UNSUPPORTED);
    assert_eq!(snapshot.completed_task_count, UNSUPPORTED);
    assert_eq!(snapshot.reject_count, UNSUPPORTED);
    assert_eq!(snapshot.reject_handler_type, UNKNOWN_TYPE);
    assert_eq!(snapshot.queue_capacity, i64::MAX);
    assert!(snapshot.queue_percent().is_none());
}

#[tokio::test]
async fn test_queue_capacity_is_size_plus_remaining() {
    let pool = Arc::new(
        DynamicPool::new("io-pool", DynamicPoolConfig::new(1, 1).with_queue_capacity(4)).unwrap(),
    );
    let adapter = DynamicPoolAdapter::new(Arc::clone(&pool));
    let gate = Arc::new(Semaphore::new(0));

    for _ in 0..3 {
        let gate = Arc::clone(&gate);
        adapter
            .execute(Box::pin(async move {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }))
            .unwrap();
    }

    assert_eq!(adapter.queue_size(), 2);
    assert_eq!(adapter.queue_remaining_capacity(), 2);
    assert_eq!(
        adapter.queue_capacity(),
        adapter.queue_size() + adapter.queue_remaining_capacity()
    );

    gate.add_permits(3);
}

#[tokio::test]
async fn test_bounds_hold_in_either_order() {
    let adapter = dynamic("io-pool", 2, 4);

    adapter.set_maximum_pool_size(10).unwrap();
    adapter.set_core_pool_size(8).unwrap();
    assert_eq!(adapter.bounds(), (8, 10));

    assert!(matches!(
        adapter.set_maximum_pool_size(5),
        Err(AdapterError::InvalidConfig(_))
    ));
    assert_eq!(adapter.bounds(), (8, 10));

    adapter.resize(1, 2).unwrap();
    assert_eq!(adapter.bounds(), (1, 2));
}

// ============================================
// Reconfiguration
// ============================================

#[tokio::test]
async fn test_refresh_applies_and_reports() {
    let (plane, mut rx) = plane();
    let pool = plane
        .create_dynamic_pool("io-pool", DynamicPoolConfig::new(2, 4).with_queue_capacity(16))
        .unwrap();

    let props: PoolProperties = serde_json::from_str(
        r#"{
            "core_pool_size": 6,
            "maximum_pool_size": 12,
            "queue_capacity": 64,
            "reject_policy": "caller_runs",
            "keep_alive_secs": 30
        }"#,
    )
    .unwrap();

    let report = plane.refresh("io-pool", &props).await.unwrap();

    assert_eq!(pool.bounds(), (6, 12));
    assert_eq!(pool.queue_capacity(), 64);
    assert_eq!(pool.reject_policy(), RejectPolicy::CallerRuns);
    assert_eq!(pool.keep_alive(), Duration::from_secs(30));

    let core = report.change("core_pool_size").unwrap();
    assert_eq!((core.old.as_str(), core.new.as_str()), ("2", "6"));
    assert!(report.change("allow_core_thread_timeout").is_none());

    let ctx = rx.try_recv().unwrap();
    assert_eq!(ctx.kind(), NotifyKind::Change);
    assert_eq!(ctx.detail.as_deref(), Some(report.summary().as_str()));
}

#[tokio::test]
async fn test_invalid_refresh_leaves_pool_untouched() {
    let (plane, mut rx) = plane();
    let pool = plane
        .create_dynamic_pool("io-pool", DynamicPoolConfig::new(2, 4))
        .unwrap();

    let result = plane
        .refresh(
            "io-pool",
            &PoolProperties::new()
                .with_core_pool_size(9)
                .with_reject_policy(RejectPolicy::Discard),
        )
        .await;

    assert!(matches!(
        result,
        Err(RefreshError::Adapter(AdapterError::InvalidConfig(_)))
    ));
    assert_eq!(pool.bounds(), (2, 4));
    assert_eq!(pool.reject_policy(), RejectPolicy::Abort);
    assert!(rx.try_recv().is_err());

    let missing = plane.refresh("missing", &PoolProperties::new()).await;
    assert_eq!(
        missing,
        Err(RefreshError::Registry(RegistryError::NotFound("missing".into())))
    );
}

#[tokio::test]
async fn test_refresh_all_isolates_failures() {
    let (plane, _rx) = plane();
    plane
        .create_dynamic_pool("a", DynamicPoolConfig::new(1, 2))
        .unwrap();
    plane
        .create_dynamic_pool("b", DynamicPoolConfig::new(1, 2))
        .unwrap();

    let pools = BTreeMap::from([
        ("a".to_string(), PoolProperties::new().with_maximum_pool_size(0)),
        ("b".to_string(), PoolProperties::new().with_maximum_pool_size(5)),
    ]);
    let results = plane.refresh_all(&pools).await;

    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_err());
    assert!(results[1].1.is_ok());
    assert_eq!(plane.registry().get("b").unwrap().maximum_pool_size(), 5);
}

// ============================================
// Context bridge
// ============================================

#[test]
fn test_uninitialized_context_fails_every_lookup() {
    let holder = ContextHolder::new();

    assert!(matches!(
        holder.get_bean::<PoolRegistry>(),
        Err(ContextError::NotInitialized)
    ));
    assert!(matches!(
        holder.get_environment_property("a"),
        Err(ContextError::NotInitialized)
    ));
    assert!(matches!(
        holder.active_profiles(),
        Err(ContextError::NotInitialized)
    ));
}

#[test]
fn test_context_beans_by_type_and_name() {
    let holder = ContextHolder::new();
    holder.initialize(
        AppContext::new(Environment::new())
            .with_bean("primary", Arc::new(PoolRegistry::new()))
            .with_bean("secondary", Arc::new(PoolRegistry::new())),
    );

    assert!(matches!(
        holder.get_bean::<PoolRegistry>(),
        Err(ContextError::AmbiguousBean { found: 2, .. })
    ));
    assert!(holder.get_bean_named::<PoolRegistry>("primary").is_ok());
    assert_eq!(holder.get_beans_of_type::<PoolRegistry>().unwrap().len(), 2);
    assert!(matches!(
        holder.get_bean_named::<String>("primary"),
        Err(ContextError::BeanTypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_plane_environment_and_profiles() {
    let (plane, _rx) = plane();
    let context = plane.context();

    assert_eq!(
        context.get_environment_property("pool.io.core").unwrap(),
        Some("8".to_string())
    );
    assert_eq!(
        context
            .get_environment_property_or("pool.io.max", "16")
            .unwrap(),
        "16"
    );
    assert_eq!(context.active_profiles().unwrap(), vec!["prod".to_string()]);
    assert_eq!(
        context.default_profiles().unwrap(),
        vec!["default".to_string()]
    );
}
