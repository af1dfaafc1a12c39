// src/load_balancer/random.rs
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::proxy::Backend;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct RandomBalancer;

#[async_trait]
impl LoadBalancer for RandomBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let index = rand::thread_rng().gen_range(0..backends.len());
        Some(backends[index].clone())
    }

    fn name(&self) -> &'static str {
        "random"
    }
}
