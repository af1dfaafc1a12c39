// src/main.rs
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};

use upstream_balancer::{
    config,
    metrics::MetricsRegistry,
    proxy::Proxy,
    server::{AdminServer, RequestHandler, ServerBuilder},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("upstream_balancer=debug".parse()?)
                .add_directive("hyper=info".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());

    info!("Loading configuration from: {}", config_path);
    let config = config::load_config(&config_path).await?;

    // Initialize metrics
    let registry = if config.metrics.enabled {
        Some(Arc::new(MetricsRegistry::new()?))
    } else {
        None
    };

    let proxy = Arc::new(
        Proxy::new(
            config.load_balancer.clone(),
            registry.as_ref().map(|r| r.collector()),
        )
        .context("Failed to build load balancer")?,
    );

    for backend in &config.backends {
        proxy
            .add_backend(&backend.url, backend.weight, backend.metadata.clone())
            .await
            .with_context(|| format!("Failed to register backend {}", backend.url))?;
    }
    if config.backends.is_empty() {
        warn!("No backends configured; every request will get 503");
    }

    let health_task = proxy.start_health_checker();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let admin_task = if config.metrics.enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics.port).into();
        let admin = AdminServer::new(proxy.clone(), registry.clone(), config.metrics.path.clone());
        Some(admin.spawn(addr, wait_for(shutdown_rx.clone()))?)
    } else {
        None
    };

    info!("Starting load balancer on {}", config.server.listen);
    ServerBuilder::new(config.server.listen)
        .with_handler(RequestHandler::new(proxy.clone()))
        .serve_with_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    proxy.stop();
    if let Err(e) = health_task.await {
        warn!("Health checker task ended abnormally: {}", e);
    }
    if let Some(task) = admin_task {
        let _ = task.await;
    }

    let stats = proxy.get_stats();
    info!(
        "Load balancer stopped: {} requests ({} ok, {} failed)",
        stats.total_requests, stats.success_requests, stats.failed_requests
    );
    Ok(())
}

async fn wait_for(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow() {
        if rx.changed().await.is_err() {
            break;
        }
    }
}

// Graceful shutdown handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
