// src/proxy/backend.rs
use crate::circuit_breaker::CircuitBreakerState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use url::Url;

/// A proxyable upstream target and its runtime state.
///
/// Everything touched on the request path is atomic, so dispatch never takes
/// a lock on the backend itself.
#[derive(Debug)]
pub struct Backend {
    pub id: String,
    pub url: Url,
    pub weight: u32,
    pub metadata: HashMap<String, Value>,
    pub registered_at: DateTime<Utc>,

    // Runtime state
    healthy: AtomicBool,
    last_health_check: RwLock<Option<DateTime<Utc>>>,
    active_connections: AtomicUsize,
    response_time_micros: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
}

impl Backend {
    pub fn new(id: String, url: Url, weight: u32, metadata: HashMap<String, Value>) -> Self {
        Self {
            id,
            url,
            weight,
            metadata,
            registered_at: Utc::now(),
            healthy: AtomicBool::new(true),
            last_health_check: RwLock::new(None),
            active_connections: AtomicUsize::new(0),
            response_time_micros: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub async fn update_health(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Release);
        *self.last_health_check.write().await = Some(Utc::now());
    }

    pub async fn last_health_check(&self) -> Option<DateTime<Utc>> {
        *self.last_health_check.read().await
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn increment_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
    }

    pub fn decrement_connections(&self) {
        // Never wraps below zero, even on an unbalanced call.
        let _ = self.active_connections.fetch_update(
            Ordering::SeqCst,
            Ordering::Relaxed,
            |current| current.checked_sub(1),
        );
    }

    /// Counts a live connection until the returned guard is dropped.
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.increment_connections();
        ConnectionGuard {
            backend: self.clone(),
        }
    }

    pub fn response_time(&self) -> Duration {
        Duration::from_micros(self.response_time_micros.load(Ordering::Relaxed))
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.response_time_micros.store(micros, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.success_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn success_count(&self) -> u64 {
        self.success_count.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.error_count.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self, circuit_state: Option<CircuitBreakerState>) -> BackendSnapshot {
        BackendSnapshot {
            id: self.id.clone(),
            url: self.url.to_string(),
            weight: self.weight,
            healthy: self.is_healthy(),
            last_check: self.last_health_check().await,
            connections: self.active_connections(),
            response_time_ms: self.response_time().as_secs_f64() * 1000.0,
            success_count: self.success_count(),
            error_count: self.error_count(),
            metadata: self.metadata.clone(),
            circuit_state,
            registered_at: self.registered_at,
        }
    }
}

/// Releases a backend connection slot on drop.
#[derive(Debug)]
pub struct ConnectionGuard {
    backend: Arc<Backend>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.backend.decrement_connections();
    }
}

/// Read-only copy of a backend for inspection tooling.
#[derive(Debug, Clone, Serialize)]
pub struct BackendSnapshot {
    pub id: String,
    pub url: String,
    pub weight: u32,
    pub healthy: bool,
    pub last_check: Option<DateTime<Utc>>,
    pub connections: usize,
    pub response_time_ms: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub metadata: HashMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<CircuitBreakerState>,
    pub registered_at: DateTime<Utc>,
}
