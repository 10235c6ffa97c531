use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Normal operation, requests are admitted
    Closed,
    /// Recent failures exceeded the threshold, requests are denied
    Open,
    /// Cooldown elapsed, a limited number of probe requests is admitted
    HalfOpen,
}

impl BreakerState {
    pub fn name(&self) -> &'static str {
        match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// How long an open circuit denies admission before probing
    pub cooldown: Duration,

    /// Successes required in half-open state to close the circuit
    pub probe_quota: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            probe_quota: 3,
        }
    }
}

/// Point-in-time view of one breaker, for the status endpoint.
///
/// The fields are read together under the registry lock but counters may
/// still move between two observations; that is acceptable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerStatus {
    pub state: &'static str,
    pub failure_count: u32,
    pub success_count: u32,
    /// Epoch milliseconds of the most recent failure, 0 if none yet
    pub last_failure_time: u64,
}

/// Per-service three-state machine
struct ServiceBreaker {
    state: BreakerState,
    config: BreakerConfig,

    /// Consecutive failures, reset by any success
    failure_count: u32,

    /// Successes since the last open-to-half-open transition
    success_count: u32,

    /// Instant of the last failure, for cooldown arithmetic
    last_failure: Option<Instant>,

    /// Same moment as epoch ms, for the status endpoint
    last_failure_ms: u64,
}

impl ServiceBreaker {
    fn new(config: BreakerConfig) -> Self {
        Self {
            state: BreakerState::Closed,
            config,
            failure_count: 0,
            success_count: 0,
            last_failure: None,
            last_failure_ms: 0,
        }
    }

    /// Consult the machine. Drives the open-to-half-open transition when the
    /// cooldown has elapsed.
    fn allow(&mut self, service: &str) -> bool {
        match self.state {
            BreakerState::Closed => true,

            BreakerState::Open => {
                let cooled_down = self
                    .last_failure
                    .map(|t| t.elapsed() >= self.config.cooldown)
                    .unwrap_or(true);

                if cooled_down {
                    self.state = BreakerState::HalfOpen;
                    self.success_count = 0;
                    info!(service = %service, "circuit half-open, admitting probes");
                    true
                } else {
                    false
                }
            }

            BreakerState::HalfOpen => self.success_count < self.config.probe_quota,
        }
    }

    fn record(&mut self, service: &str, success: bool) {
        if success {
            self.on_success(service);
        } else {
            self.on_failure(service);
        }
    }

    fn on_success(&mut self, service: &str) {
        self.success_count += 1;
        self.failure_count = 0;

        if self.state == BreakerState::HalfOpen && self.success_count >= self.config.probe_quota {
            self.state = BreakerState::Closed;
            info!(service = %service, "circuit closed after successful probes");
        }
    }

    fn on_failure(&mut self, service: &str) {
        self.failure_count += 1;
        self.last_failure = Some(Instant::now());
        self.last_failure_ms = Utc::now().timestamp_millis() as u64;

        match self.state {
            BreakerState::Closed => {
                if self.failure_count >= self.config.failure_threshold {
                    self.state = BreakerState::Open;
                    warn!(
                        service = %service,
                        failures = self.failure_count,
                        "circuit opened"
                    );
                }
            }
            BreakerState::HalfOpen => {
                self.state = BreakerState::Open;
                warn!(service = %service, "probe failed, circuit reopened");
            }
            BreakerState::Open => {}
        }
    }

    fn observe(&self) -> BreakerStatus {
        BreakerStatus {
            state: self.state.name(),
            failure_count: self.failure_count,
            success_count: self.success_count,
            last_failure_time: self.last_failure_ms,
        }
    }
}

/// All per-service breakers, keyed by service name.
///
/// Shared by the dispatcher (admission + outcome recording), the health
/// checker (probe outcomes) and the admin status endpoint. Transitions run
/// under the write lock, so concurrent `allow` and `record` calls cannot
/// lose a transition.
pub struct BreakerRegistry {
    breakers: RwLock<HashMap<String, ServiceBreaker>>,
    config: BreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            breakers: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Create a breaker for the service if none exists yet
    pub async fn ensure(&self, service: &str) {
        let mut breakers = self.breakers.write().await;
        if !breakers.contains_key(service) {
            debug!(service = %service, "creating circuit breaker");
            breakers.insert(service.to_string(), ServiceBreaker::new(self.config.clone()));
        }
    }

    /// Whether a request to the service may proceed. Services without a
    /// breaker are admitted.
    pub async fn allow(&self, service: &str) -> bool {
        let mut breakers = self.breakers.write().await;
        match breakers.get_mut(service) {
            Some(breaker) => breaker.allow(service),
            None => true,
        }
    }

    /// Feed a request or probe outcome into the service's machine
    pub async fn record(&self, service: &str, success: bool) {
        let mut breakers = self.breakers.write().await;
        if let Some(breaker) = breakers.get_mut(service) {
            breaker.record(service, success);
        }
    }

    /// Observe a single breaker
    pub async fn observe(&self, service: &str) -> Option<BreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers.get(service).map(|b| b.observe())
    }

    /// Observe every breaker, for the status endpoint
    pub async fn observe_all(&self) -> HashMap<String, BreakerStatus> {
        let breakers = self.breakers.read().await;
        breakers
            .iter()
            .map(|(service, breaker)| (service.clone(), breaker.observe()))
            .collect()
    }
}
