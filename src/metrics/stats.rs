// src/metrics/stats.rs
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide request counters, lock-free on the request path.
#[derive(Debug)]
pub struct StatsCollector {
    total_requests: AtomicU64,
    success_requests: AtomicU64,
    failed_requests: AtomicU64,
    active_connections: AtomicI64,
    latency_micros: AtomicU64,
    last_reset_ms: AtomicI64,
}

/// Counts an in-flight request until dropped.
#[derive(Debug)]
pub struct ActiveRequest<'a> {
    stats: &'a StatsCollector,
}

impl Drop for ActiveRequest<'_> {
    fn drop(&mut self) {
        self.stats.active_connections.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsCollector {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            success_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            latency_micros: AtomicU64::new(0),
            last_reset_ms: AtomicI64::new(Utc::now().timestamp_millis()),
        }
    }

    pub fn begin(&self) -> ActiveRequest<'_> {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ActiveRequest { stats: self }
    }

    pub fn record(&self, success: bool, elapsed: Duration) {
        if success {
            self.success_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.latency_micros.fetch_add(micros, Ordering::Relaxed);
    }

    /// Zeroes the cumulative counters. In-flight requests are still counted
    /// as active.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.success_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.latency_micros.store(0, Ordering::Relaxed);
        self.last_reset_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LoadBalancerStats {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let success_requests = self.success_requests.load(Ordering::Relaxed);
        let failed_requests = self.failed_requests.load(Ordering::Relaxed);
        let completed = success_requests + failed_requests;

        let average_latency_ms = if completed == 0 {
            0.0
        } else {
            self.latency_micros.load(Ordering::Relaxed) as f64 / completed as f64 / 1000.0
        };

        let last_reset = DateTime::<Utc>::from_timestamp_millis(
            self.last_reset_ms.load(Ordering::Relaxed),
        )
        .unwrap_or_else(Utc::now);
        let window = (Utc::now() - last_reset).num_milliseconds() as f64 / 1000.0;
        let throughput = if window > 0.0 {
            total_requests as f64 / window
        } else {
            0.0
        };

        LoadBalancerStats {
            total_requests,
            success_requests,
            failed_requests,
            average_latency_ms,
            active_connections: self.active_connections.load(Ordering::SeqCst).max(0),
            throughput,
            last_reset,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadBalancerStats {
    pub total_requests: u64,
    pub success_requests: u64,
    pub failed_requests: u64,
    pub average_latency_ms: f64,
    pub active_connections: i64,
    /// Requests per second since `last_reset`.
    pub throughput: f64,
    pub last_reset: DateTime<Utc>,
}
