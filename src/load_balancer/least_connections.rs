// src/load_balancer/least_connections.rs
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct LeastConnectionsBalancer;

/// Fewest live connections; the first backend wins ties.
fn least_connections(backends: &[Arc<Backend>]) -> Option<Arc<Backend>> {
    let mut selected = backends.first()?;
    let mut min = selected.active_connections();

    for backend in &backends[1..] {
        let connections = backend.active_connections();
        if connections < min {
            min = connections;
            selected = backend;
        }
    }

    Some(selected.clone())
}

#[async_trait]
impl LoadBalancer for LeastConnectionsBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        least_connections(backends)
    }

    fn name(&self) -> &'static str {
        "least_connections"
    }
}

#[derive(Debug, Default)]
pub struct WeightedLeastConnectionsBalancer;

#[async_trait]
impl LoadBalancer for WeightedLeastConnectionsBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        // Minimise connections / weight. Ratios are compared by
        // cross-multiplication so no division happens at all.
        let mut selected: Option<(&Arc<Backend>, u128, u128)> = None;

        for backend in backends.iter().filter(|b| b.weight > 0) {
            let connections = backend.active_connections() as u128;
            let weight = u128::from(backend.weight);

            let better = match selected {
                None => true,
                Some((_, best_conns, best_weight)) => {
                    connections * best_weight < best_conns * weight
                }
            };
            if better {
                selected = Some((backend, connections, weight));
            }
        }

        match selected {
            Some((backend, _, _)) => Some(backend.clone()),
            // Every weight is zero: treat them as equal.
            None => least_connections(backends),
        }
    }

    fn name(&self) -> &'static str {
        "weighted_least_connections"
    }
}
