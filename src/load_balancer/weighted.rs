// src/load_balancer/weighted.rs
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::proxy::Backend;
use async_trait::async_trait;
use rand::Rng;
use std::sync::Arc;

/// Weight-proportional draw; serves both `weighted_round_robin` and
/// `weighted_random`.
#[derive(Debug)]
pub struct WeightedBalancer {
    name: &'static str,
}

impl WeightedBalancer {
    pub fn weighted_round_robin() -> Self {
        Self {
            name: "weighted_round_robin",
        }
    }

    pub fn weighted_random() -> Self {
        Self {
            name: "weighted_random",
        }
    }
}

/// Draws in `[0, total_weight)` and walks the set until the draw lands in a
/// backend's band. All-zero weights degrade to a uniform pick.
pub(crate) fn pick_by_weight<R: Rng + ?Sized>(
    backends: &[Arc<Backend>],
    rng: &mut R,
) -> Option<Arc<Backend>> {
    if backends.is_empty() {
        return None;
    }

    let total: u64 = backends.iter().map(|b| u64::from(b.weight)).sum();
    if total == 0 {
        return Some(backends[rng.gen_range(0..backends.len())].clone());
    }

    let draw = rng.gen_range(0..total);
    let mut accumulated = 0u64;
    for backend in backends {
        accumulated += u64::from(backend.weight);
        if draw < accumulated {
            return Some(backend.clone());
        }
    }

    backends.first().cloned()
}

#[async_trait]
impl LoadBalancer for WeightedBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        _context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        pick_by_weight(backends, &mut rand::thread_rng())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
