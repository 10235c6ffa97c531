use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod breaker;
mod client;
mod config;
mod dispatch;
mod health;
mod lb;
mod proxy;
mod registry;
mod router;

use breaker::BreakerRegistry;
use client::ClientPool;
use dispatch::Dispatcher;
use health::HealthChecker;
use lb::{LoadBalancer, Policy};
use proxy::GatewayServer;
use registry::Registry;

#[derive(Parser)]
#[command(name = "svcgate")]
#[command(version, about = "HTTP reverse-proxy gateway with runtime service registration", long_about = None)]
struct Cli {
    /// Listen address, overrides the configured one
    #[arg(long)]
    listen: Option<String>,

    /// Config file path (YAML)
    #[arg(long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = config::load_config(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }

    // Wire up the dispatch fabric
    let registry = Arc::new(Registry::new());
    let router = Arc::new(config.build_router());
    let balancer = Arc::new(LoadBalancer::new(Policy::from_name(&config.balancer.policy)));
    let breakers = Arc::new(BreakerRegistry::new(config.breaker.to_breaker_config()));
    let clients = Arc::new(ClientPool::new(config.client.to_client_config()));

    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        router,
        balancer,
        Arc::clone(&breakers),
        Arc::clone(&clients),
    ));

    let checker = Arc::new(HealthChecker::new(
        registry,
        breakers,
        clients,
        config.health.to_health_config(),
    ));
    checker.start();

    let server = GatewayServer::new(dispatcher, config.server.listen.clone());

    tokio::select! {
        result = server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, exiting");
            Ok(())
        }
    }
}
