// src/metrics/collector.rs
use crate::circuit_breaker::CircuitBreakerState;
use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

/// Owns the prometheus registry the balancer's collector is registered in.
pub struct MetricsRegistry {
    registry: Registry,
    collector: Arc<MetricsCollector>,
}

impl MetricsRegistry {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let collector = Arc::new(MetricsCollector::new(&registry)?);

        Ok(Self {
            registry,
            collector,
        })
    }

    pub fn collector(&self) -> Arc<MetricsCollector> {
        self.collector.clone()
    }

    /// Renders every registered family in the text exposition format.
    pub fn gather(&self) -> Result<Vec<u8>, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

pub struct MetricsCollector {
    // Dispatch metrics
    pub requests_total: IntCounterVec,
    pub request_duration_seconds: HistogramVec,

    // Backend metrics
    pub backend_requests_total: IntCounterVec,
    pub backend_connections_active: IntGaugeVec,
    pub backend_health_status: IntGaugeVec,

    // Circuit breaker metrics
    pub circuit_breaker_state: IntGaugeVec,

    // Balancer-wide gauges
    pub active_connections: IntGauge,
    pub healthy_backends: IntGauge,
    pub total_backends: IntGauge,
}

fn register<M>(registry: &Registry, metric: M) -> Result<M>
where
    M: Collector + Clone + 'static,
{
    registry.register(Box::new(metric.clone()))?;
    Ok(metric)
}

fn per_backend_gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGaugeVec> {
    register(registry, IntGaugeVec::new(Opts::new(name, help), &["backend"])?)
}

impl MetricsCollector {
    pub fn new(registry: &Registry) -> Result<Self> {
        let dispatch_labels = ["method", "status_code", "backend"];

        Ok(Self {
            requests_total: register(
                registry,
                IntCounterVec::new(
                    Opts::new("lb_requests_total", "Requests dispatched to a backend or refused"),
                    &dispatch_labels,
                )?,
            )?,
            request_duration_seconds: register(
                registry,
                HistogramVec::new(
                    HistogramOpts::new(
                        "lb_request_duration_seconds",
                        "Time until the backend answered, in seconds",
                    ),
                    &dispatch_labels,
                )?,
            )?,
            backend_requests_total: register(
                registry,
                IntCounterVec::new(
                    Opts::new("lb_backend_requests_total", "Backend request outcomes"),
                    &["backend", "status"],
                )?,
            )?,
            backend_connections_active: per_backend_gauge(
                registry,
                "lb_backend_connections_active",
                "Live connections per backend",
            )?,
            backend_health_status: per_backend_gauge(
                registry,
                "lb_backend_health_status",
                "Last probe verdict per backend (1 healthy, 0 unhealthy)",
            )?,
            circuit_breaker_state: per_backend_gauge(
                registry,
                "lb_circuit_breaker_state",
                "Breaker position per backend (0 closed, 1 open, 2 half-open)",
            )?,
            active_connections: register(
                registry,
                IntGauge::new("lb_active_connections", "Requests currently in flight")?,
            )?,
            healthy_backends: register(
                registry,
                IntGauge::new("lb_healthy_backends", "Backends that passed the last probe round")?,
            )?,
            total_backends: register(
                registry,
                IntGauge::new("lb_total_backends", "Registered backends")?,
            )?,
        })
    }

    pub fn record_request(
        &self,
        method: &str,
        status_code: u16,
        backend: &str,
        duration: Duration,
    ) {
        let status = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, &status, backend])
            .inc();

        self.request_duration_seconds
            .with_label_values(&[method, &status, backend])
            .observe(duration.as_secs_f64());
    }

    pub fn record_backend_request(&self, backend: &str, success: bool) {
        let status = if success { "success" } else { "failure" };
        self.backend_requests_total
            .with_label_values(&[backend, status])
            .inc();
    }

    pub fn update_backend_connections(&self, backend: &str, count: usize) {
        self.backend_connections_active
            .with_label_values(&[backend])
            .set(count as i64);
    }

    pub fn update_backend_health(&self, backend: &str, healthy: bool) {
        self.backend_health_status
            .with_label_values(&[backend])
            .set(i64::from(healthy));
    }

    pub fn update_circuit_breaker_state(&self, backend: &str, state: CircuitBreakerState) {
        let value = match state {
            CircuitBreakerState::Closed => 0,
            CircuitBreakerState::Open => 1,
            CircuitBreakerState::HalfOpen => 2,
        };

        self.circuit_breaker_state
            .with_label_values(&[backend])
            .set(value);
    }

    /// Drops every per-backend series of a deregistered backend.
    pub fn forget_backend(&self, backend: &str) {
        let _ = self.backend_connections_active.remove_label_values(&[backend]);
        let _ = self.backend_health_status.remove_label_values(&[backend]);
        let _ = self.circuit_breaker_state.remove_label_values(&[backend]);
    }

    /// Raises the in-flight gauge until the returned guard is dropped.
    pub fn in_flight(&self) -> InFlightGuard {
        self.active_connections.inc();
        InFlightGuard {
            gauge: self.active_connections.clone(),
        }
    }

    pub fn update_backend_counts(&self, healthy: usize, total: usize) {
        self.healthy_backends.set(healthy as i64);
        self.total_backends.set(total as i64);
    }
}

/// Lowers `lb_active_connections` on drop, also when the dispatch future is
/// cancelled mid-flight.
pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gather_exposes_recorded_series() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        collector.record_request("GET", 200, "b1", Duration::from_millis(3));
        collector.record_backend_request("b1", true);
        collector.update_circuit_breaker_state("b1", CircuitBreakerState::Open);
        collector.update_backend_counts(1, 2);

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        let request_line = text
            .lines()
            .find(|line| line.starts_with("lb_requests_total{"))
            .unwrap();
        assert!(request_line.contains("status_code=\"200\""));
        assert!(request_line.ends_with(" 1"));
        assert!(text.contains("lb_circuit_breaker_state{backend=\"b1\"} 1"));
        assert!(text.contains("lb_healthy_backends 1"));
        assert!(text.contains("lb_total_backends 2"));
    }

    #[tokio::test]
    async fn test_in_flight_guard_survives_cancellation() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();

        let held = collector.in_flight();
        assert_eq!(collector.active_connections.get(), 1);

        let pending = {
            let collector = collector.clone();
            tokio::spawn(async move {
                let _guard = collector.in_flight();
                std::future::pending::<()>().await;
            })
        };
        while collector.active_connections.get() < 2 {
            tokio::task::yield_now().await;
        }

        pending.abort();
        let _ = pending.await;
        assert_eq!(collector.active_connections.get(), 1);

        drop(held);
        assert_eq!(collector.active_connections.get(), 0);
    }

    #[test]
    fn test_forget_backend_drops_series() {
        let registry = MetricsRegistry::new().unwrap();
        let collector = registry.collector();
        collector.update_backend_health("gone", true);

        collector.forget_backend("gone");

        let text = String::from_utf8(registry.gather().unwrap()).unwrap();
        assert!(!text.contains("backend=\"gone\""));
    }
}
