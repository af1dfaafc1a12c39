// src/load_balancer/hash.rs
use crate::load_balancer::{fnv1a_32, ConsistentHashRing, LoadBalancer, SelectionContext};
use crate::proxy::Backend;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Client IP hashed modulo the eligible set size.
#[derive(Debug, Default)]
pub struct IpHashBalancer;

fn ip_hash(backends: &[Arc<Backend>], key: &str) -> Option<Arc<Backend>> {
    if backends.is_empty() {
        return None;
    }

    let index = fnv1a_32(key.as_bytes()) as usize % backends.len();
    Some(backends[index].clone())
}

#[async_trait]
impl LoadBalancer for IpHashBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        ip_hash(backends, context.hash_key())
    }

    fn name(&self) -> &'static str {
        "ip_hash"
    }
}

/// Client IP looked up on a hash ring of every registered backend.
///
/// The ring is kept in sync through the registration hooks. Lookups continue
/// clockwise past positions whose backend is not currently eligible.
#[derive(Debug)]
pub struct ConsistentHashBalancer {
    ring: RwLock<ConsistentHashRing>,
}

impl ConsistentHashBalancer {
    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            ring: RwLock::new(ConsistentHashRing::new(virtual_nodes)),
        }
    }

    pub async fn ring_len(&self) -> usize {
        self.ring.read().await.len()
    }
}

#[async_trait]
impl LoadBalancer for ConsistentHashBalancer {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        context: &SelectionContext,
    ) -> Option<Arc<Backend>> {
        if backends.is_empty() {
            return None;
        }

        let key = context.hash_key();
        let found = {
            let ring = self.ring.read().await;
            let eligible: HashSet<&str> = backends.iter().map(|b| b.id.as_str()).collect();
            ring.find_backend(key, |backend| eligible.contains(backend.id.as_str()))
        };

        match found {
            Some(backend) => Some(backend),
            None => {
                tracing::warn!("Hash ring has no eligible position, falling back to ip hash");
                ip_hash(backends, key)
            }
        }
    }

    async fn backend_added(&self, backend: &Arc<Backend>) {
        self.ring.write().await.add_backend(backend);
    }

    async fn backend_removed(&self, backend: &Arc<Backend>) {
        self.ring.write().await.remove_backend(backend);
    }

    fn name(&self) -> &'static str {
        "consistent_hash"
    }
}
