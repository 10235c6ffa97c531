//! Runtime service registry
//!
//! Maps logical service names to the ordered set of backend replicas
//! registered for them. The registry starts empty and is only mutated through
//! the admin endpoints; the health checker flips per-replica healthy flags in
//! place.

pub mod replica;
pub mod store;

pub use replica::{Replica, ReplicaError};
pub use store::Registry;
