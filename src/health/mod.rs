// src/health/mod.rs
mod checker;

pub use checker::{HealthCheckResult, HealthChecker, ProbeError};
