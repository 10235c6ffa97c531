use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::{self, HeaderValue};
use hyper::Request;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::breaker::BreakerRegistry;
use crate::client::ClientPool;
use crate::registry::{Registry, Replica};

/// Configuration for health probing
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Whether the periodic checker runs at all
    pub enabled: bool,

    /// Interval between probe cycles
    pub interval: Duration,

    /// Per-probe timeout
    pub timeout: Duration,

    /// Path probed on each replica endpoint
    pub path: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(50),
            timeout: Duration::from_secs(5),
            path: "/health".to_string(),
        }
    }
}

/// Periodic prober for all registered replicas
pub struct HealthChecker {
    registry: Arc<Registry>,
    breakers: Arc<BreakerRegistry>,
    clients: Arc<ClientPool>,
    config: HealthConfig,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<Registry>,
        breakers: Arc<BreakerRegistry>,
        clients: Arc<ClientPool>,
        config: HealthConfig,
    ) -> Self {
        Self {
            registry,
            breakers,
            clients,
            config,
        }
    }

    /// Start the background probe loop
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if !self.config.enabled {
                info!("health checker disabled, replicas keep their registered state");
                return;
            }

            info!(
                interval_secs = self.config.interval.as_secs(),
                path = %self.config.path,
                "health checker started"
            );

            loop {
                sleep(self.config.interval).await;
                self.run_once().await;
            }
        })
    }

    /// Probe every replica of every known service once.
    ///
    /// Public so tests and the admin surface can drive a cycle on demand.
    pub async fn run_once(&self) {
        let services = self.registry.service_names().await;

        let mut handles = Vec::new();
        for service in services {
            for replica in self.registry.all(&service).await {
                let checker = ProbeContext {
                    breakers: Arc::clone(&self.breakers),
                    clients: Arc::clone(&self.clients),
                    timeout: self.config.timeout,
                    path: self.config.path.clone(),
                };
                handles.push(tokio::spawn(async move {
                    checker.probe_replica(replica).await;
                }));
            }
        }

        for handle in handles {
            let _ = handle.await;
        }

        debug!("health check cycle complete");
    }
}

/// Everything one spawned probe needs
struct ProbeContext {
    breakers: Arc<BreakerRegistry>,
    clients: Arc<ClientPool>,
    timeout: Duration,
    path: String,
}

impl ProbeContext {
    async fn probe_replica(&self, replica: Arc<Replica>) {
        let healthy = self.probe(&replica).await;

        if replica.is_healthy() != healthy {
            if healthy {
                info!(
                    service = %replica.service,
                    endpoint = %replica.endpoint,
                    "replica recovered"
                );
            } else {
                warn!(
                    service = %replica.service,
                    endpoint = %replica.endpoint,
                    "replica failed health probe"
                );
            }
        }

        replica.set_healthy(healthy);
        self.breakers.record(&replica.service, healthy).await;
    }

    /// A probe succeeds when the replica answers anything below 500 within
    /// the timeout; transport errors and timeouts are failures.
    async fn probe(&self, replica: &Replica) -> bool {
        let client = match self.clients.client_for(&replica.endpoint).await {
            Ok(client) => client,
            Err(e) => {
                warn!(endpoint = %replica.endpoint, error = %e, "probe client unavailable");
                return false;
            }
        };

        let uri = format!("{}{}", replica.endpoint.trim_end_matches('/'), self.path);
        let request = match Request::builder()
            .method(hyper::Method::GET)
            .uri(&uri)
            .header(
                header::HOST,
                HeaderValue::from_str(replica.authority())
                    .unwrap_or(HeaderValue::from_static("localhost")),
            )
            .body(Full::new(Bytes::new()))
        {
            Ok(request) => request,
            Err(e) => {
                warn!(uri = %uri, error = %e, "probe request build failed");
                return false;
            }
        };

        match timeout(self.timeout, client.request(request)).await {
            Ok(Ok(response)) => {
                let ok = response.status().as_u16() < 500;
                debug!(
                    endpoint = %replica.endpoint,
                    status = response.status().as_u16(),
                    ok = ok,
                    "probe answered"
                );
                ok
            }
            Ok(Err(e)) => {
                debug!(endpoint = %replica.endpoint, error = %e, "probe failed");
                false
            }
            Err(_) => {
                debug!(endpoint = %replica.endpoint, "probe timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::client::ClientConfig;

    #[test]
    fn test_config_defaults() {
        let config = HealthConfig::default();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_secs(50));
        assert_eq!(config.path, "/health");
    }

    #[tokio::test]
    async fn test_unreachable_replica_is_marked_unhealthy() {
        let registry = Arc::new(Registry::new());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let clients = Arc::new(ClientPool::new(ClientConfig::default()));

        // Port 1 is never listening
        let replica = registry
            .register(Replica::new("dead", "http://127.0.0.1:1", "user-orch", 1).unwrap())
            .await;
        breakers.ensure("user-orch").await;

        let checker = HealthChecker::new(
            registry,
            Arc::clone(&breakers),
            clients,
            HealthConfig {
                timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );

        checker.run_once().await;

        assert!(!replica.is_healthy());
        assert_eq!(breakers.observe("user-orch").await.unwrap().failure_count, 1);
    }
}
