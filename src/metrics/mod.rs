// src/metrics/mod.rs
mod collector;
mod stats;

pub use collector::{InFlightGuard, MetricsCollector, MetricsRegistry};
pub use stats::{ActiveRequest, LoadBalancerStats, StatsCollector};
