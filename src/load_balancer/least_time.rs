// src/load_balancer/least_time.rs
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

/// Picks the backend with the smallest last observed response time. Backends
/// that have not served anything yet report zero and are tried first.
#[derive(Debug, Default)]
pub struct LeastTimeBalancer;

#[async_trait]
impl LoadBalancer for LeastTimeBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        let mut selected = backends.first()?;
        let mut min = selected.response_time();

        for backend in &backends[1..] {
            let response_time = backend.response_time();
            if response_time < min {
                min = response_time;
                selected = backend;
            }
        }

        Some(selected.clone())
    }

    fn name(&self) -> &'static str {
        "least_time"
    }
}
