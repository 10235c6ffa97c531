//! Replica selection
//!
//! Picks one replica out of a service's healthy candidates using a
//! configurable policy.
//!
//! # Policies
//!
//! - **Round-robin**: rotate through the candidates with an atomic counter
//! - **Random**: uniform pick
//! - **Weighted-random** (default): pick proportional to replica weight
//! - **Least-connections**: first healthy candidate, first candidate as the
//!   fallback

pub mod balancer;

pub use balancer::{LoadBalancer, Policy};
