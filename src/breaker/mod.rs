//! Per-service circuit breaking
//!
//! Each registered service gets a three-state machine (closed, open,
//! half-open) that gates outbound dispatch based on recent success and
//! failure signals. The dispatcher consults `allow` before contacting an
//! upstream and feeds outcomes back through `record`; the health checker
//! feeds probe outcomes through the same path.

pub mod circuit;

pub use circuit::{BreakerConfig, BreakerRegistry, BreakerState, BreakerStatus};
