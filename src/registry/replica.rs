use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use url::Url;

/// Errors raised while admitting a replica into the registry
#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("invalid endpoint URL: {0}")]
    InvalidEndpoint(String),

    #[error("endpoint has no host: {0}")]
    MissingHost(String),

    #[error("unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),
}

/// A single backend instance registered under a logical service name
#[derive(Debug)]
pub struct Replica {
    /// Human-readable label for this instance (the "project name")
    pub name: String,

    /// Absolute base URL the instance listens on, e.g. "http://10.0.0.3:9001"
    pub endpoint: String,

    /// Logical service this replica belongs to
    pub service: String,

    /// Relative weight for weighted selection (>= 1)
    pub weight: u32,

    /// `host:port` derived from the endpoint, used for Host header rewrites
    authority: String,

    /// Whether the replica is currently considered healthy
    healthy: AtomicBool,
}

impl Replica {
    /// Validate the endpoint and build a replica.
    ///
    /// The endpoint must be an absolute http/https URL with a host. Anything
    /// else is rejected here, before the registry is touched.
    pub fn new(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        service: impl Into<String>,
        weight: u32,
    ) -> Result<Self, ReplicaError> {
        let endpoint = endpoint.into();

        let url = Url::parse(&endpoint)
            .map_err(|_| ReplicaError::InvalidEndpoint(endpoint.clone()))?;

        let default_port = match url.scheme() {
            "http" => 80,
            "https" => 443,
            other => return Err(ReplicaError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ReplicaError::MissingHost(endpoint.clone()))?;
        let port = url.port().unwrap_or(default_port);
        let authority = format!("{}:{}", host, port);

        Ok(Self {
            name: name.into(),
            endpoint,
            service: service.into(),
            weight: weight.max(1),
            authority,
            healthy: AtomicBool::new(true),
        })
    }

    /// `host:port` of the endpoint
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// Whether this replica is currently healthy
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Flip the healthy flag (health checker only)
    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
    }
}
