// src/lib.rs
pub mod config;
pub mod server;
pub mod proxy;
pub mod load_balancer;
pub mod health;
pub mod circuit_breaker;
pub mod retry;
pub mod metrics;

pub use config::{Config, LoadBalancerAlgorithm, LoadBalancerConfig};
pub use proxy::{BackendSnapshot, Proxy, ProxyError};
pub use metrics::LoadBalancerStats;
