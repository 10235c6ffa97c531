//! Outbound HTTP client cache
//!
//! One keep-alive client per registered endpoint, created lazily and
//! retained for the process lifetime. Each client owns its own connection
//! pool; idle connections are reaped by the client itself after the idle
//! timeout.

pub mod pool;

pub use pool::{ClientConfig, ClientError, ClientPool, OutboundClient};
