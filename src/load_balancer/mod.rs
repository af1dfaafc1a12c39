// src/load_balancer/mod.rs
mod algorithm;
mod hash;
mod least_connections;
mod least_time;
mod random;
mod ring;
mod round_robin;
mod weighted;

pub use algorithm::{fnv1a_32, LoadBalancer, SelectionContext};
pub use hash::{ConsistentHashBalancer, IpHashBalancer};
pub use least_connections::{LeastConnectionsBalancer, WeightedLeastConnectionsBalancer};
pub use least_time::LeastTimeBalancer;
pub use random::RandomBalancer;
pub use ring::ConsistentHashRing;
pub use round_robin::RoundRobinBalancer;
pub use weighted::WeightedBalancer;
pub use crate::config::LoadBalancerAlgorithm;

use std::sync::Arc;

pub fn create_load_balancer(
    algorithm: LoadBalancerAlgorithm,
    virtual_nodes: usize,
) -> Arc<dyn LoadBalancer> {
    match algorithm {
        LoadBalancerAlgorithm::RoundRobin => Arc::new(RoundRobinBalancer::new()),
        LoadBalancerAlgorithm::WeightedRoundRobin => {
            Arc::new(WeightedBalancer::weighted_round_robin())
        }
        LoadBalancerAlgorithm::LeastConnections => Arc::new(LeastConnectionsBalancer),
        LoadBalancerAlgorithm::WeightedLeastConnections => {
            Arc::new(WeightedLeastConnectionsBalancer)
        }
        LoadBalancerAlgorithm::IpHash => Arc::new(IpHashBalancer),
        LoadBalancerAlgorithm::ConsistentHash => {
            Arc::new(ConsistentHashBalancer::new(virtual_nodes))
        }
        LoadBalancerAlgorithm::Random => Arc::new(RandomBalancer),
        LoadBalancerAlgorithm::WeightedRandom => Arc::new(WeightedBalancer::weighted_random()),
        LoadBalancerAlgorithm::LeastTime => Arc::new(LeastTimeBalancer),
    }
}
