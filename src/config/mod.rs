use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerConfig;
use crate::client::ClientConfig;
use crate::health::HealthConfig;
use crate::router::{Router, RoutingRule};

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0:8080)
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Load balancer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Policy: weighted_random, round_robin, random, least_connections
    #[serde(default = "default_policy")]
    pub policy: String,
}

fn default_policy() -> String {
    "weighted_random".to_string()
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            policy: default_policy(),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    /// Consecutive failures before a circuit opens
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Seconds an open circuit denies admission before probing
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Successes required in half-open state to close
    #[serde(default = "default_probe_quota")]
    pub probe_quota: u32,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_probe_quota() -> u32 {
    3
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
            probe_quota: default_probe_quota(),
        }
    }
}

impl BreakerSettings {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_secs),
            probe_quota: self.probe_quota,
        }
    }
}

/// Health checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,

    /// Seconds between probe cycles
    #[serde(default = "default_health_interval_secs")]
    pub interval_secs: u64,

    /// Per-probe timeout in seconds
    #[serde(default = "default_health_timeout_secs")]
    pub timeout_secs: u64,

    /// Path probed on each replica
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_interval_secs() -> u64 {
    50
}

fn default_health_timeout_secs() -> u64 {
    5
}

fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            interval_secs: default_health_interval_secs(),
            timeout_secs: default_health_timeout_secs(),
            path: default_health_path(),
        }
    }
}

impl HealthSettings {
    pub fn to_health_config(&self) -> HealthConfig {
        HealthConfig {
            enabled: self.enabled,
            interval: Duration::from_secs(self.interval_secs),
            timeout: Duration::from_secs(self.timeout_secs),
            path: self.path.clone(),
        }
    }
}

/// Outbound client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_idle_per_origin")]
    pub max_idle_per_origin: usize,
}

fn default_connect_timeout_secs() -> u64 {
    50
}

fn default_idle_timeout_secs() -> u64 {
    30
}

fn default_max_idle_per_origin() -> usize {
    20
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            max_idle_per_origin: default_max_idle_per_origin(),
        }
    }
}

impl ClientSettings {
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            max_idle_per_origin: self.max_idle_per_origin,
        }
    }
}

/// One routing rule as written in configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    /// Optional Host substring the rule is scoped to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Path prefix ending with '/'
    pub prefix: String,

    /// Target service name
    pub service: String,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub balancer: BalancerConfig,

    #[serde(default)]
    pub breaker: BreakerSettings,

    #[serde(default)]
    pub health: HealthSettings,

    #[serde(default)]
    pub client: ClientSettings,

    /// Routing table; empty means the built-in default rules
    #[serde(default)]
    pub routes: Vec<RouteEntry>,
}

impl Config {
    /// Build the router from the configured routes, or the default table
    /// when none are configured
    pub fn build_router(&self) -> Router {
        if self.routes.is_empty() {
            return Router::with_default_rules();
        }

        let rules = self
            .routes
            .iter()
            .map(|entry| match &entry.host {
                Some(host) => RoutingRule::for_host(host, &entry.prefix, &entry.service),
                None => RoutingRule::for_prefix(&entry.prefix, &entry.service),
            })
            .collect();
        Router::new(rules)
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml(path: &str) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .context(format!("Failed to read config file: {}", path))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    Ok(config)
}

/// Load configuration from environment variables on top of the defaults.
///
/// Recognized variables: `GATEWAY_LISTEN`, `GATEWAY_LB_POLICY`,
/// `GATEWAY_HEALTH_INTERVAL_SECS`, `GATEWAY_HEALTH_PATH`.
pub fn load_from_env() -> Config {
    // Pick up a .env file if one exists
    let _ = dotenvy::dotenv();

    let mut config = Config::default();

    if let Ok(listen) = std::env::var("GATEWAY_LISTEN") {
        config.server.listen = listen;
    }

    if let Ok(policy) = std::env::var("GATEWAY_LB_POLICY") {
        config.balancer.policy = policy;
    }

    if let Ok(interval) = std::env::var("GATEWAY_HEALTH_INTERVAL_SECS") {
        if let Ok(val) = interval.parse() {
            config.health.interval_secs = val;
        }
    }

    if let Ok(path) = std::env::var("GATEWAY_HEALTH_PATH") {
        config.health.path = path;
    }

    config
}

/// Load configuration from file or environment
pub fn load_config(config_path: Option<&str>) -> Result<Config> {
    match config_path {
        Some(path) => load_from_yaml(path),
        None => Ok(load_from_env()),
    }
}
