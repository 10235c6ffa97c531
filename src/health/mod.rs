//! Background health probing
//!
//! A periodic task that probes every registered replica and feeds the
//! outcomes into the per-service circuit breakers and the replica healthy
//! flags. Probes run on their own spawned tasks, off the request-serving
//! path, and a probe failure never kills the checker.

pub mod checker;

pub use checker::{HealthChecker, HealthConfig};
