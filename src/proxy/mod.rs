//! Gateway HTTP front
//!
//! The listener, the admin surface under `/gateway/`, the `/health`
//! liveness endpoint and the catch-all proxying of every other path through
//! the dispatch pipeline.

mod admin;
mod server;

pub use server::GatewayServer;
