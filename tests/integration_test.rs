//! moonrpc Integration Tests
//!
//! End-to-end tests that export services over real loopback TCP, discover
//! them through in-process registries and call them through the consumer
//! stack (reference config, cluster, load balancer, HA strategy, endpoint).
//!
//! Every test names its own `local://` registry so tests sharing the
//! process-wide registry factory never see each other's providers.

use futures::future::join_all;
use moonrpc::common::registry::{DefaultRegistryFactory, Registry, RegistryFactory};
use moonrpc::server::WorkerPoolConfig;
use moonrpc::{
    param, Address, CallKind, MoonrpcError, Provider, ReferenceConfig, ServiceConfig, ServiceProvider,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const INTERFACE: &str = "it.GreeterService";

fn registry(name: &str) -> Address {
    Address::new("local", format!("it-{}", name), 0, "registry")
}

fn greeter(tag: &'static str, hits: Arc<AtomicUsize>) -> Arc<dyn Provider> {
    Arc::new(
        ServiceProvider::new(INTERFACE)
            .method("echo", &["String"], |args| Ok(args[0].clone()))
            .method("whoami", &[], move |_| Ok(json!(tag)))
            .method("fail", &["String"], |args| {
                Err(MoonrpcError::business(args[0].as_str().unwrap_or_default()))
            })
            .method("sleep", &["long"], |args| {
                std::thread::sleep(Duration::from_millis(args[0].as_u64().unwrap_or_default()));
                Ok(json!("awake"))
            })
            .method("hit", &[], move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }),
    )
}

async fn export(registry: &Address, tag: &'static str) -> ServiceConfig {
    let mut service = ServiceConfig::new(greeter(tag, Arc::new(AtomicUsize::new(0)))).with_registry(registry.clone());
    service.export().await.unwrap();
    service
}

/// Address of a port nothing listens on.
async fn dead_provider() -> Address {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Address::new("moon", "127.0.0.1", port, INTERFACE).with_parameter(param::SIDE, param::SIDE_PROVIDER)
}

// ============================================================================
// Registry-driven calls
// ============================================================================

#[tokio::test]
async fn test_call_through_local_registry() {
    let registry = registry("basic");
    let mut service = export(&registry, "a").await;

    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(registry);
    let invoker = reference.refer().unwrap();

    let echoed: String = invoker
        .call(invoker.request("echo").with_arg("String", json!("hello moon")))
        .await
        .unwrap();
    assert_eq!(echoed, "hello moon");
    assert_eq!(reference.clusters()[0].endpoints().len(), 1);

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_business_error_crosses_the_wire() {
    let registry = registry("business");
    let mut service = export(&registry, "a").await;

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_retries(3)
        .with_leniency(true);
    let invoker = reference.refer().unwrap();

    let err = invoker
        .invoke(invoker.request("fail").with_arg("String", json!("account frozen")))
        .await
        .unwrap_err();
    assert!(err.is_business());
    assert_eq!(err.to_string(), "Business error: account frozen");

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_unknown_method_is_framework_error() {
    let registry = registry("no-method");
    let mut service = export(&registry, "a").await;

    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(registry);
    let invoker = reference.refer().unwrap();

    let err = invoker.invoke(invoker.request("missing")).await.unwrap_err();
    assert!(!err.is_business());
    assert!(err.to_string().contains("Service method not exist"));

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_refer_without_provider_fails_check() {
    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(registry("empty"));
    assert!(matches!(reference.refer(), Err(MoonrpcError::NoEndpoint(_))));
}

#[tokio::test]
async fn test_direct_registry_call() {
    let mut service = ServiceConfig::new(greeter("direct", Arc::new(AtomicUsize::new(0))));
    let url = service.export().await.unwrap();

    let direct = Address::new("direct", "127.0.0.1", url.port(), "");
    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(direct);
    let invoker = reference.refer().unwrap();
    assert_eq!(invoker.invoke(invoker.request("whoami")).await.unwrap(), json!("direct"));

    reference.destroy();
    service.unexport().await;
}

// ============================================================================
// Membership changes
// ============================================================================

#[tokio::test]
async fn test_provider_joining_after_refer() {
    let registry = registry("late-join");
    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry.clone())
        .with_check(false);
    let invoker = reference.refer().unwrap();

    let err = invoker.invoke(invoker.request("whoami")).await.unwrap_err();
    assert!(err.to_string().contains("No endpoint"), "unexpected error: {}", err);

    let mut service = export(&registry, "late").await;
    assert_eq!(reference.clusters()[0].endpoints().len(), 1);
    assert_eq!(invoker.invoke(invoker.request("whoami")).await.unwrap(), json!("late"));

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_calls_spread_over_providers() {
    let registry = registry("spread");
    let mut first = export(&registry, "first").await;
    let mut second = export(&registry, "second").await;

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_load_balance("roundrobin");
    let invoker = reference.refer().unwrap();
    assert_eq!(reference.clusters()[0].endpoints().len(), 2);

    let mut seen = Vec::new();
    for _ in 0..4 {
        seen.push(invoker.invoke(invoker.request("whoami")).await.unwrap());
    }
    assert!(seen.contains(&json!("first")));
    assert!(seen.contains(&json!("second")));

    reference.destroy();
    first.unexport().await;
    second.unexport().await;
}

#[tokio::test]
async fn test_unexport_removes_provider_from_cluster() {
    let registry = registry("leave");
    let mut staying = export(&registry, "staying").await;
    let mut leaving = export(&registry, "leaving").await;

    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(registry);
    let invoker = reference.refer().unwrap();
    assert_eq!(reference.clusters()[0].endpoints().len(), 2);

    leaving.unexport().await;
    assert_eq!(reference.clusters()[0].endpoints().len(), 1);
    for _ in 0..4 {
        assert_eq!(invoker.invoke(invoker.request("whoami")).await.unwrap(), json!("staying"));
    }

    reference.destroy();
    staying.unexport().await;
}

// ============================================================================
// Failure handling
// ============================================================================

#[tokio::test]
async fn test_failover_skips_dead_provider() {
    let registry = registry("failover");
    let factory = DefaultRegistryFactory::global();
    factory.get_registry(&registry).unwrap().register(&dead_provider().await).unwrap();
    let mut service = export(&registry, "alive").await;

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_load_balance("roundrobin")
        .with_ha_strategy("failover")
        .with_retries(1);
    let invoker = reference.refer().unwrap();
    assert_eq!(reference.clusters()[0].endpoints().len(), 2);

    for _ in 0..4 {
        assert_eq!(invoker.invoke(invoker.request("whoami")).await.unwrap(), json!("alive"));
    }

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_failfast_surfaces_dead_provider() {
    let registry = registry("failfast");
    let factory = DefaultRegistryFactory::global();
    factory.get_registry(&registry).unwrap().register(&dead_provider().await).unwrap();
    let mut service = export(&registry, "alive").await;

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_load_balance("roundrobin")
        .with_ha_strategy("failfast");
    let invoker = reference.refer().unwrap();

    let mut failures = 0;
    for _ in 0..2 {
        match invoker.invoke(invoker.request("whoami")).await {
            Ok(value) => assert_eq!(value, json!("alive")),
            Err(e) => {
                assert!(!e.is_business());
                failures += 1;
            }
        }
    }
    assert_eq!(failures, 1);

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_timeout_is_framework_error() {
    let registry = registry("timeout");
    let mut service = export(&registry, "slow").await;

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_request_timeout_ms(100);
    let invoker = reference.refer().unwrap();

    let err = invoker
        .invoke(invoker.request("sleep").with_arg("long", json!(400)))
        .await
        .unwrap_err();
    assert!(!err.is_business());
    assert!(err.to_string().contains("timeout"), "unexpected error: {}", err);

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_leniency_returns_default_without_provider() {
    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry("lenient"))
        .with_check(false)
        .with_leniency(true)
        .declare_errors("echo");
    let invoker = reference.refer().unwrap();

    let count: i64 = invoker.call(invoker.request("count")).await.unwrap();
    assert_eq!(count, 0);
    let name: String = invoker.call(invoker.request("whoami")).await.unwrap();
    assert_eq!(name, "");
    assert!(invoker
        .invoke(invoker.request("echo").with_arg("String", json!("x")))
        .await
        .is_err());

    reference.destroy();
}

#[tokio::test]
async fn test_saturated_provider_reports_busy() {
    let registry = registry("busy");
    let mut service = ServiceConfig::new(greeter("busy", Arc::new(AtomicUsize::new(0))))
        .with_registry(registry.clone())
        .with_pool(WorkerPoolConfig::new().with_max_workers(1));
    service.export().await.unwrap();

    let mut reference = ReferenceConfig::new(INTERFACE)
        .with_registry(registry)
        .with_ha_strategy("failfast");
    let invoker = reference.refer().unwrap();

    let calls = (0..3).map(|_| invoker.invoke(invoker.request("sleep").with_arg("long", json!(200))));
    let outcomes = join_all(calls).await;

    let busy = outcomes
        .iter()
        .filter(|outcome| matches!(outcome, Err(MoonrpcError::ServerBusy(_))))
        .count();
    let served = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(served, 1);
    assert_eq!(busy, 2);

    reference.destroy();
    service.unexport().await;
}

// ============================================================================
// Call kinds and routing
// ============================================================================

#[tokio::test]
async fn test_oneway_call_runs_provider() {
    let registry = registry("oneway");
    let hits = Arc::new(AtomicUsize::new(0));
    let mut service = ServiceConfig::new(greeter("oneway", hits.clone())).with_registry(registry.clone());
    service.export().await.unwrap();

    let mut reference = ReferenceConfig::new(INTERFACE).with_registry(registry);
    let invoker = reference.refer().unwrap();

    let result = invoker
        .invoke(invoker.request("hit").with_kind(CallKind::Oneway))
        .await
        .unwrap();
    assert_eq!(result, Value::Null);

    for _ in 0..50 {
        if hits.load(Ordering::SeqCst) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    reference.destroy();
    service.unexport().await;
}

#[tokio::test]
async fn test_versions_share_one_server() {
    let registry = registry("versions");
    let mut v1 = export(&registry, "v1").await;
    let port = v1.exported_url().unwrap().port();

    let mut v2 = ServiceConfig::new(greeter("v2", Arc::new(AtomicUsize::new(0))))
        .with_registry(registry.clone())
        .with_port(port)
        .with_version("2.0");
    let v2_url = v2.export().await.unwrap();
    assert_eq!(v2_url.port(), port);

    let mut old = ReferenceConfig::new(INTERFACE).with_registry(registry.clone());
    let mut new = ReferenceConfig::new(INTERFACE).with_registry(registry).with_version("2.0");
    let old_invoker = old.refer().unwrap();
    let new_invoker = new.refer().unwrap();

    assert_eq!(old_invoker.invoke(old_invoker.request("whoami")).await.unwrap(), json!("v1"));
    assert_eq!(new_invoker.invoke(new_invoker.request("whoami")).await.unwrap(), json!("v2"));

    old.destroy();
    new.destroy();
    v2.unexport().await;
    v1.unexport().await;
}
