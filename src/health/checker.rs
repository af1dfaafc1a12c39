// src/health/checker.rs
use crate::circuit_breaker::CircuitBreakerManager;
use crate::config::LoadBalancerConfig;
use crate::metrics::MetricsCollector;
use crate::proxy::{Backend, BackendPool};
use reqwest::{Client, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::{interval_at, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Why a probe counted as a failure. Only ever logged and folded into
/// backend state.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("probe timed out")]
    Timeout,

    #[error("unexpected status {0}")]
    UnexpectedStatus(StatusCode),

    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::Transport(err)
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub backend_id: String,
    pub healthy: bool,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

/// Periodic, cancellable prober. Every tick probes all registered backends
/// concurrently, one task per backend.
pub struct HealthChecker {
    interval: Duration,
    path: String,
    pool: Arc<BackendPool>,
    breakers: Option<Arc<CircuitBreakerManager>>,
    client: Client,
    metrics: Option<Arc<MetricsCollector>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl HealthChecker {
    pub fn new(
        config: &LoadBalancerConfig,
        pool: Arc<BackendPool>,
        breakers: Option<Arc<CircuitBreakerManager>>,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.health_check_timeout())
            .build()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            interval: config.health_check_interval(),
            path: config.health_check_path.clone(),
            pool,
            breakers,
            client,
            metrics,
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub async fn start(self: Arc<Self>) {
        // First round fires one interval after start, not immediately.
        let mut interval = interval_at(
            tokio::time::Instant::now() + self.interval,
            self.interval,
        );
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        info!("Starting health checker with interval: {:?}", self.interval);

        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {
                    self.check_all_backends().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Health checker shutting down");
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_shut_down(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Probes every backend currently registered and waits for all of them.
    pub async fn check_all_backends(self: &Arc<Self>) -> Vec<HealthCheckResult> {
        let backends = self.pool.snapshot().await;
        let mut tasks = Vec::with_capacity(backends.len());

        for backend in backends {
            let checker = self.clone();
            tasks.push(tokio::spawn(async move {
                checker.check_backend(backend).await
            }));
        }

        let mut results = Vec::with_capacity(tasks.len());
        let mut healthy_count = 0;

        for joined in futures::future::join_all(tasks).await {
            match joined {
                Ok(result) => {
                    if result.healthy {
                        healthy_count += 1;
                        debug!("Backend {} is healthy", result.backend_id);
                    } else {
                        warn!(
                            "Backend {} is unhealthy: {}",
                            result.backend_id,
                            result.error.as_deref().unwrap_or("unknown error")
                        );
                    }
                    results.push(result);
                }
                Err(e) => error!("Health check task failed: {}", e),
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_counts(healthy_count, self.pool.len().await);
        }

        info!(
            "Health check complete: {} healthy, {} unhealthy",
            healthy_count,
            results.len() - healthy_count
        );

        results
    }

    async fn probe(&self, backend: &Backend) -> Result<(), ProbeError> {
        let url = format!("{}{}", backend.url.as_str().trim_end_matches('/'), self.path);
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeError::UnexpectedStatus(status)),
        }
    }

    pub async fn check_backend(&self, backend: Arc<Backend>) -> HealthCheckResult {
        let start = Instant::now();
        let was_healthy = backend.is_healthy();

        let outcome = self.probe(&backend).await;
        let response_time_ms = start.elapsed().as_millis() as u64;
        let healthy = outcome.is_ok();

        backend.update_health(healthy).await;
        let breaker = self.breakers.as_ref().and_then(|m| m.get(&backend.id));

        if healthy {
            backend.record_success();
            if let Some(breaker) = &breaker {
                breaker.record_success().await;
            }
            if !was_healthy {
                info!("Backend {} is healthy again", backend.id);
            }
        } else {
            backend.record_error();
            if let Some(breaker) = &breaker {
                breaker.record_failure().await;
            }
            if was_healthy {
                warn!("Backend {} marked unhealthy", backend.id);
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&backend.id, healthy);
            if let Some(breaker) = &breaker {
                metrics.update_circuit_breaker_state(&backend.id, breaker.get_state().await);
            }
        }

        HealthCheckResult {
            backend_id: backend.id.clone(),
            healthy,
            response_time_ms,
            error: outcome.err().map(|e| e.to_string()),
        }
    }
}
