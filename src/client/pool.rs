use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::Full;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client as HyperClient;
use hyper_util::rt::TokioExecutor;
use native_tls::TlsConnector;
use tokio::sync::RwLock;
use tracing::info;
use url::Url;

/// Keep-alive HTTP client bound to one origin.
///
/// Clone is cheap; the underlying client shares its connection pool.
pub type OutboundClient = HyperClient<HttpsConnector<HttpConnector>, Full<Bytes>>;

/// Errors raised while obtaining an outbound client
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("TLS initialization failed: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Configuration for outbound clients
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP connect timeout
    pub connect_timeout: Duration,

    /// How long an idle pooled connection is retained
    pub idle_timeout: Duration,

    /// Maximum idle connections retained per origin
    pub max_idle_per_origin: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(50),
            idle_timeout: Duration::from_secs(30),
            max_idle_per_origin: 20,
        }
    }
}

/// Cache of keep-alive clients keyed by endpoint.
///
/// Entries are created lazily on first dispatch to an endpoint and retained
/// for the process lifetime. The map is read-mostly; the write lock is only
/// taken to insert a new origin.
pub struct ClientPool {
    clients: RwLock<HashMap<String, OutboundClient>>,
    config: ClientConfig,
}

impl ClientPool {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Get the client for an endpoint, creating it on first use.
    ///
    /// A malformed endpoint is an error here, never a silent fallback to
    /// some default origin.
    pub async fn client_for(&self, endpoint: &str) -> Result<OutboundClient, ClientError> {
        {
            let clients = self.clients.read().await;
            if let Some(client) = clients.get(endpoint) {
                return Ok(client.clone());
            }
        }

        let mut clients = self.clients.write().await;
        // Another dispatch may have created it while we waited for the lock
        if let Some(client) = clients.get(endpoint) {
            return Ok(client.clone());
        }

        let client = self.build_client(endpoint)?;
        clients.insert(endpoint.to_string(), client.clone());
        Ok(client)
    }

    /// Number of cached origins
    pub async fn len(&self) -> usize {
        self.clients.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.clients.read().await.is_empty()
    }

    fn build_client(&self, endpoint: &str) -> Result<OutboundClient, ClientError> {
        let url =
            Url::parse(endpoint).map_err(|_| ClientError::InvalidEndpoint(endpoint.to_string()))?;
        if url.host_str().is_none() || !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::InvalidEndpoint(endpoint.to_string()));
        }

        let mut http = HttpConnector::new();
        http.set_nodelay(true);
        http.enforce_http(false);
        http.set_connect_timeout(Some(self.config.connect_timeout));
        http.set_keepalive(Some(self.config.idle_timeout));

        let tls = TlsConnector::new()?;
        let https = HttpsConnector::from((http, tls.into()));

        let client = HyperClient::builder(TokioExecutor::new())
            .pool_idle_timeout(self.config.idle_timeout)
            .pool_max_idle_per_host(self.config.max_idle_per_origin)
            .set_host(false)
            .build(https);

        info!(endpoint = %endpoint, "created outbound client");
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_clients_are_cached_per_endpoint() {
        let pool = ClientPool::new(ClientConfig::default());
        assert!(pool.is_empty().await);

        pool.client_for("http://127.0.0.1:9001").await.unwrap();
        pool.client_for("http://127.0.0.1:9001").await.unwrap();
        assert_eq!(pool.len().await, 1);

        pool.client_for("http://127.0.0.1:9002").await.unwrap();
        assert_eq!(pool.len().await, 2);
    }

    #[tokio::test]
    async fn test_malformed_endpoint_is_rejected() {
        let pool = ClientPool::new(ClientConfig::default());

        let err = pool.client_for("not a url").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint(_)));

        let err = pool.client_for("ftp://host:21").await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidEndpoint(_)));

        // Nothing was cached for the failed attempts
        assert!(pool.is_empty().await);
    }
}
