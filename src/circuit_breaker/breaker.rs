// src/circuit_breaker/breaker.rs

use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitBreakerState {
    Closed,     // Normal operation
    Open,       // Failing, rejecting requests
    HalfOpen,   // Probing whether the backend recovered
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    last_failure: Option<Instant>,
}

impl BreakerInner {
    fn cooled_down(&self, config: &CircuitBreakerConfig) -> bool {
        self.last_failure
            .map_or(true, |at| at.elapsed() > config.timeout())
    }

    /// Opening keeps the failure tally; every other transition starts both
    /// counters afresh.
    fn enter(&mut self, state: CircuitBreakerState) {
        self.state = state;
        self.success_count = 0;
        if state != CircuitBreakerState::Open {
            self.failure_count = 0;
        }
    }
}

/// Three-state breaker guarding one backend.
///
/// An open circuit has no timer of its own: once `timeout` has elapsed since
/// the last failure, [`CircuitBreaker::can_request`] starts admitting traffic
/// again and the next recorded outcome moves the circuit through half-open.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<BreakerInner>,
    total_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                failure_count: 0,
                success_count: 0,
                last_failure: None,
            }),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
        }
    }

    pub async fn can_request(&self) -> bool {
        let inner = self.inner.read().await;

        match inner.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => inner.cooled_down(&self.config),
            CircuitBreakerState::HalfOpen => {
                inner.success_count < self.config.half_open_requests
            }
        }
    }

    pub async fn record_success(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;

        if inner.state == CircuitBreakerState::Open && inner.cooled_down(&self.config) {
            inner.enter(CircuitBreakerState::HalfOpen);
            tracing::info!("Circuit breaker transitioned to half-open");
        }

        inner.success_count = inner.success_count.saturating_add(1);

        match inner.state {
            CircuitBreakerState::Closed => {
                inner.failure_count = 0;
            }
            CircuitBreakerState::HalfOpen => {
                if inner.success_count >= self.config.success_threshold {
                    inner.enter(CircuitBreakerState::Closed);
                    inner.last_failure = None;
                    tracing::info!("Circuit breaker closed after successful recovery");
                }
            }
            // Late success from a request admitted before the circuit opened.
            CircuitBreakerState::Open => {}
        }
    }

    pub async fn record_failure(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;

        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            CircuitBreakerState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    let failures = inner.failure_count;
                    inner.enter(CircuitBreakerState::Open);
                    tracing::warn!("Circuit breaker opened after {} failures", failures);
                }
            }
            CircuitBreakerState::HalfOpen => {
                inner.enter(CircuitBreakerState::Open);
                tracing::warn!("Circuit breaker reopened by a half-open failure");
            }
            CircuitBreakerState::Open => {
                if inner.cooled_down(&self.config) {
                    tracing::debug!("Probe failed after cool-down, circuit stays open");
                }
            }
        }

        inner.last_failure = Some(Instant::now());
    }

    pub async fn get_state(&self) -> CircuitBreakerState {
        self.inner.read().await.state
    }

    pub async fn get_metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.read().await;
        CircuitBreakerMetrics {
            state: inner.state,
            total_requests: self.total_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            failure_count: inner.failure_count,
            success_count: inner.success_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitBreakerState,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Per-backend breakers, keyed by backend id.
///
/// Each breaker carries its own lock, so traffic to different backends never
/// contends here.
pub struct CircuitBreakerManager {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    config: CircuitBreakerConfig,
}

impl CircuitBreakerManager {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    pub fn get_or_create(&self, backend_id: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(backend_id.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(self.config.clone())))
            .clone()
    }

    pub fn get(&self, backend_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(backend_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, backend_id: &str) {
        self.breakers.remove(backend_id);
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config(timeout_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms,
            half_open_requests: 3,
        }
    }

    async fn open_breaker(breaker: &CircuitBreaker) {
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn test_opens_after_failure_threshold() {
        let breaker = CircuitBreaker::new(config(60_000));

        for _ in 0..4 {
            breaker.record_failure().await;
            assert!(breaker.can_request().await);
        }
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);

        breaker.record_failure().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
        assert!(!breaker.can_request().await);

        let metrics = breaker.get_metrics().await;
        assert_eq!(metrics.failure_count, 5);
        assert_eq!(metrics.success_count, 0);
        assert_eq!(metrics.failed_requests, 5);
    }

    #[tokio::test]
    async fn test_success_in_closed_forgives_failures() {
        let breaker = CircuitBreaker::new(config(60_000));

        for _ in 0..4 {
            breaker.record_failure().await;
        }
        breaker.record_success().await;
        for _ in 0..4 {
            breaker.record_failure().await;
        }

        assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);
    }

    #[tokio::test]
    async fn test_open_allows_requests_after_timeout() {
        let breaker = CircuitBreaker::new(config(50));
        open_breaker(&breaker).await;
        assert!(!breaker.can_request().await);

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(breaker.can_request().await);
        // Admitting traffic does not change the state by itself.
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
    }

    #[tokio::test]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new(config(50));
        open_breaker(&breaker).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::HalfOpen);
        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);

        let metrics = breaker.get_metrics().await;
        assert_eq!(metrics.failure_count, 0);
        assert_eq!(metrics.success_count, 0);
        assert!(breaker.can_request().await);
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(config(50));
        open_breaker(&breaker).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::HalfOpen);

        breaker.record_failure().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
        assert!(!breaker.can_request().await);
    }

    #[tokio::test]
    async fn test_half_open_limits_admitted_requests() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            success_threshold: 5,
            half_open_requests: 2,
            ..config(50)
        });
        open_breaker(&breaker).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        breaker.record_success().await;
        assert!(breaker.can_request().await);
        breaker.record_success().await;
        assert_eq!(breaker.get_state().await, CircuitBreakerState::HalfOpen);
        assert!(!breaker.can_request().await);
    }

    #[tokio::test]
    async fn test_failure_while_open_extends_cool_down() {
        let breaker = CircuitBreaker::new(config(100));
        open_breaker(&breaker).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        breaker.record_failure().await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!breaker.can_request().await);
    }

    #[test]
    fn test_manager_tracks_breakers_per_backend() {
        let manager = CircuitBreakerManager::new(config(1_000));

        let a = manager.get_or_create("a");
        let again = manager.get_or_create("a");
        assert!(Arc::ptr_eq(&a, &again));

        manager.get_or_create("b");
        assert_eq!(manager.len(), 2);

        manager.remove("a");
        assert!(manager.get("a").is_none());
        assert!(manager.get("b").is_some());
    }
}
