// src/circuit_breaker/mod.rs
mod breaker;

pub use breaker::{
    CircuitBreaker, CircuitBreakerManager, CircuitBreakerMetrics, CircuitBreakerState,
};
