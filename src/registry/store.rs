use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use super::replica::Replica;

/// In-memory mapping from logical service name to its registered replicas.
///
/// Replicas keep insertion order within a service. The map is shared by the
/// admin handlers, the dispatcher and the health checker; the healthy flag on
/// each replica is atomic, so readers of that flag never take the map lock.
pub struct Registry {
    services: RwLock<HashMap<String, Vec<Arc<Replica>>>>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
        }
    }

    /// Append a replica to its service, creating the service entry if absent.
    ///
    /// Duplicate endpoints are allowed and scheduled independently by the
    /// load balancer.
    pub async fn register(&self, replica: Replica) -> Arc<Replica> {
        let replica = Arc::new(replica);
        let mut services = self.services.write().await;
        services
            .entry(replica.service.clone())
            .or_default()
            .push(Arc::clone(&replica));

        info!(
            service = %replica.service,
            endpoint = %replica.endpoint,
            name = %replica.name,
            "registered replica"
        );

        replica
    }

    /// Remove the first replica of `service` matching both name and endpoint.
    ///
    /// Returns `true` if an entry was removed. An emptied service keeps its
    /// (empty) key; lookups treat that the same as an absent service.
    pub async fn deregister(&self, service: &str, name: &str, endpoint: &str) -> bool {
        let mut services = self.services.write().await;
        let Some(replicas) = services.get_mut(service) else {
            return false;
        };

        let Some(pos) = replicas
            .iter()
            .position(|r| r.name == name && r.endpoint == endpoint)
        else {
            return false;
        };

        let removed = replicas.remove(pos);
        info!(
            service = %service,
            endpoint = %removed.endpoint,
            name = %removed.name,
            "deregistered replica"
        );
        true
    }

    /// All replicas of a service, in insertion order
    pub async fn all(&self, service: &str) -> Vec<Arc<Replica>> {
        let services = self.services.read().await;
        services.get(service).cloned().unwrap_or_default()
    }

    /// Replicas of a service whose healthy flag is set, preserving order
    pub async fn healthy(&self, service: &str) -> Vec<Arc<Replica>> {
        let services = self.services.read().await;
        services
            .get(service)
            .map(|replicas| {
                replicas
                    .iter()
                    .filter(|r| r.is_healthy())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Names of all services ever registered
    pub async fn service_names(&self) -> Vec<String> {
        let services = self.services.read().await;
        services.keys().cloned().collect()
    }

    /// Consistent view of every service and its replicas, for the status
    /// endpoint
    pub async fn snapshot(&self) -> HashMap<String, Vec<Arc<Replica>>> {
        let services = self.services.read().await;
        services.clone()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(name: &str, endpoint: &str, service: &str) -> Replica {
        Replica::new(name, endpoint, service, 1).unwrap()
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = Registry::new();
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;
        registry
            .register(replica("u2", "http://127.0.0.1:9002", "user-orch"))
            .await;

        let all = registry.all("user-orch").await;
        assert_eq!(all.len(), 2);
        // Insertion order is preserved
        assert_eq!(all[0].name, "u1");
        assert_eq!(all[1].name, "u2");

        assert!(registry.all("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_healthy_is_subset_of_all() {
        let registry = Registry::new();
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;
        let second = registry
            .register(replica("u2", "http://127.0.0.1:9002", "user-orch"))
            .await;

        second.set_healthy(false);

        let all = registry.all("user-orch").await;
        let healthy = registry.healthy("user-orch").await;
        assert_eq!(all.len(), 2);
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].name, "u1");
        assert!(healthy.iter().all(|h| all.iter().any(|a| Arc::ptr_eq(a, h))));
    }

    #[tokio::test]
    async fn test_deregister_removes_first_match() {
        let registry = Registry::new();
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;

        assert!(
            registry
                .deregister("user-orch", "u1", "http://127.0.0.1:9001")
                .await
        );
        assert_eq!(registry.all("user-orch").await.len(), 1);

        // Unknown identity is a no-op
        assert!(
            !registry
                .deregister("user-orch", "u9", "http://127.0.0.1:9001")
                .await
        );
        assert!(!registry.deregister("ghost", "u1", "http://x:1").await);
    }

    #[tokio::test]
    async fn test_duplicate_endpoints_are_independent() {
        let registry = Registry::new();
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;

        assert_eq!(registry.all("user-orch").await.len(), 2);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let registry = Registry::new();
        registry
            .register(replica("u1", "http://127.0.0.1:9001", "user-orch"))
            .await;
        registry
            .register(replica("o1", "http://127.0.0.1:9101", "order-service"))
            .await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot["user-orch"].len(), 1);
        assert_eq!(snapshot["order-service"].len(), 1);
    }
}
