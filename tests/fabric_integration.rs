//! Integration tests for the registry, breakers and health checker
//!
//! These exercise the shared-state pieces of the dispatch fabric together,
//! without going through the HTTP layer.

use std::sync::Arc;
use std::time::Duration;

use svcgate::breaker::{BreakerConfig, BreakerRegistry};
use svcgate::client::{ClientConfig, ClientPool};
use svcgate::health::{HealthChecker, HealthConfig};
use svcgate::registry::{Registry, Replica};

fn replica(name: &str, endpoint: &str, service: &str) -> Replica {
    Replica::new(name, endpoint, service, 1).unwrap()
}

#[tokio::test]
async fn test_registry_and_breakers_track_services_together() {
    let registry = Registry::new();
    let breakers = BreakerRegistry::new(BreakerConfig::default());

    for (name, endpoint, service) in [
        ("u1", "http://127.0.0.1:9001", "user-orch"),
        ("u2", "http://127.0.0.1:9002", "user-orch"),
        ("o1", "http://127.0.0.1:9101", "order-service"),
    ] {
        registry.register(replica(name, endpoint, service)).await;
        breakers.ensure(service).await;
    }

    assert_eq!(registry.all("user-orch").await.len(), 2);
    assert_eq!(registry.all("order-service").await.len(), 1);

    let observed = breakers.observe_all().await;
    assert_eq!(observed.len(), 2);
    assert!(observed.contains_key("user-orch"));
    assert!(observed.contains_key("order-service"));
}

#[tokio::test]
async fn test_snapshot_is_stable_without_mutation() {
    let registry = Registry::new();
    registry
        .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
        .await;
    registry
        .register(replica("u2", "http://127.0.0.1:9002", "user-orch"))
        .await;

    let first = registry.snapshot().await;
    let second = registry.snapshot().await;

    assert_eq!(first.len(), second.len());
    for (service, replicas) in &first {
        let other = &second[service];
        let endpoints: Vec<_> = replicas.iter().map(|r| r.endpoint.clone()).collect();
        let other_endpoints: Vec<_> = other.iter().map(|r| r.endpoint.clone()).collect();
        assert_eq!(endpoints, other_endpoints);
    }
}

#[tokio::test]
async fn test_healthy_stays_subset_of_all_under_concurrent_writes() {
    let registry = Arc::new(Registry::new());

    let mut handles = Vec::new();
    for i in 0..8 {
        let registry = Arc::clone(&registry);
        handles.push(tokio::spawn(async move {
            for j in 0..25 {
                let endpoint = format!("http://127.0.0.1:{}", 9000 + i * 100 + j);
                let added = registry
                    .register(Replica::new(format!("r{}-{}", i, j), endpoint, "user-orch", 1).unwrap())
                    .await;
                if j % 3 == 0 {
                    added.set_healthy(false);
                }

                let all = registry.all("user-orch").await;
                let healthy = registry.healthy("user-orch").await;
                assert!(healthy.len() <= all.len());
                for h in &healthy {
                    assert!(all.iter().any(|a| Arc::ptr_eq(a, h)));
                }
            }
        }));
    }

    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(registry.all("user-orch").await.len(), 200);
}

#[tokio::test]
async fn test_concurrent_breaker_traffic_does_not_lose_the_trip() {
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig {
        failure_threshold: 5,
        cooldown: Duration::from_secs(60),
        probe_quota: 3,
    }));
    breakers.ensure("svc").await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let breakers = Arc::clone(&breakers);
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                breakers.allow("svc").await;
                breakers.record("svc", false).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // 200 concurrent failures far exceed the threshold; the circuit must be
    // open and denying admission
    let status = breakers.observe("svc").await.unwrap();
    assert_eq!(status.state, "OPEN");
    assert!(!breakers.allow("svc").await);
}

#[tokio::test]
async fn test_health_cycle_feeds_breakers_and_flags() {
    let registry = Arc::new(Registry::new());
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let clients = Arc::new(ClientPool::new(ClientConfig::default()));

    // Two dead replicas across two services; port 1 never listens
    let first = registry
        .register(replica("u1", "http://127.0.0.1:1", "user-orch"))
        .await;
    let second = registry
        .register(replica("o1", "http://127.0.0.1:1", "order-service"))
        .await;
    breakers.ensure("user-orch").await;
    breakers.ensure("order-service").await;

    let checker = HealthChecker::new(
        Arc::clone(&registry),
        Arc::clone(&breakers),
        clients,
        HealthConfig {
            timeout: Duration::from_millis(500),
            ..Default::default()
        },
    );

    checker.run_once().await;

    assert!(!first.is_healthy());
    assert!(!second.is_healthy());
    assert_eq!(breakers.observe("user-orch").await.unwrap().failure_count, 1);
    assert_eq!(
        breakers.observe("order-service").await.unwrap().failure_count,
        1
    );

    // A failing probe cycle leaves the healthy set empty but the full set
    // intact
    assert_eq!(registry.all("user-orch").await.len(), 1);
    assert!(registry.healthy("user-orch").await.is_empty());
}
