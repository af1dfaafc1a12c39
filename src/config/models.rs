// src/config/models.rs
use anyhow::{bail, ensure, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub load_balancer: LoadBalancerConfig,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.load_balancer.validate()?;

        for backend in &self.backends {
            if let Err(e) = parse_backend_url(&backend.url) {
                bail!("invalid backend url {:?}: {}", backend.url, e);
            }
        }

        if self.metrics.enabled {
            ensure!(
                self.metrics.path.starts_with('/'),
                "metrics.path must start with '/'"
            );
            ensure!(
                self.metrics.port != self.server.listen.port(),
                "metrics.port must differ from the proxy listen port"
            );
        }

        Ok(())
    }
}

/// Parses a backend URL, accepting only absolute http(s) URLs with a host.
pub fn parse_backend_url(raw: &str) -> std::result::Result<Url, String> {
    let url = Url::parse(raw).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme {other:?}")),
    }
    if url.host_str().is_none() {
        return Err("missing host".to_string());
    }
    Ok(url)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalancerAlgorithm {
    #[default]
    RoundRobin,
    WeightedRoundRobin,
    LeastConnections,
    WeightedLeastConnections,
    IpHash,
    ConsistentHash,
    Random,
    WeightedRandom,
    LeastTime,
}

impl LoadBalancerAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoundRobin => "round_robin",
            Self::WeightedRoundRobin => "weighted_round_robin",
            Self::LeastConnections => "least_connections",
            Self::WeightedLeastConnections => "weighted_least_connections",
            Self::IpHash => "ip_hash",
            Self::ConsistentHash => "consistent_hash",
            Self::Random => "random",
            Self::WeightedRandom => "weighted_random",
            Self::LeastTime => "least_time",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    #[serde(default)]
    pub algorithm: LoadBalancerAlgorithm,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_health_check_timeout_secs")]
    pub health_check_timeout_secs: u64,
    #[serde(default = "default_health_check_path")]
    pub health_check_path: String,
    /// Upper bound on a single proxied call.
    #[serde(default = "default_proxy_timeout_secs")]
    pub proxy_timeout_secs: u64,
    /// Ring positions per backend for `consistent_hash`.
    #[serde(default = "default_virtual_nodes")]
    pub virtual_nodes: usize,
    /// Consumed by `RetryStrategy`; `Proxy::dispatch` never retries.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Reserved for session affinity; parsed but not acted on.
    #[serde(default)]
    pub session_sticky: bool,
    #[serde(default = "default_session_timeout_secs")]
    pub session_timeout_secs: u64,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub log_requests: bool,
}

impl LoadBalancerConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn health_check_timeout(&self) -> Duration {
        Duration::from_secs(self.health_check_timeout_secs)
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.health_check_interval_secs > 0,
            "health_check_interval_secs must be positive"
        );
        ensure!(
            self.health_check_timeout_secs > 0,
            "health_check_timeout_secs must be positive"
        );
        ensure!(
            self.health_check_path.starts_with('/'),
            "health_check_path must start with '/'"
        );
        ensure!(self.proxy_timeout_secs > 0, "proxy_timeout_secs must be positive");
        ensure!(self.virtual_nodes > 0, "virtual_nodes must be positive");
        self.circuit_breaker.validate()
    }
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            algorithm: LoadBalancerAlgorithm::default(),
            health_check_interval_secs: default_health_check_interval_secs(),
            health_check_timeout_secs: default_health_check_timeout_secs(),
            health_check_path: default_health_check_path(),
            proxy_timeout_secs: default_proxy_timeout_secs(),
            virtual_nodes: default_virtual_nodes(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            session_sticky: false,
            session_timeout_secs: default_session_timeout_secs(),
            circuit_breaker: CircuitBreakerConfig::default(),
            log_requests: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Cool-down after the last failure before an open circuit lets probes through.
    #[serde(default = "default_breaker_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_half_open_requests")]
    pub half_open_requests: u32,
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.failure_threshold > 0,
            "circuit_breaker.failure_threshold must be positive"
        );
        ensure!(
            self.success_threshold > 0,
            "circuit_breaker.success_threshold must be positive"
        );
        ensure!(
            self.half_open_requests > 0,
            "circuit_breaker.half_open_requests must be positive"
        );
        ensure!(self.timeout_ms > 0, "circuit_breaker.timeout_ms must be positive");
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            success_threshold: default_success_threshold(),
            timeout_ms: default_breaker_timeout_ms(),
            half_open_requests: default_half_open_requests(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
    #[serde(default = "default_metrics_path")]
    pub path: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
            path: default_metrics_path(),
        }
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_true() -> bool {
    true
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_health_check_timeout_secs() -> u64 {
    5
}

fn default_health_check_path() -> String {
    "/health".to_string()
}

fn default_proxy_timeout_secs() -> u64 {
    30
}

fn default_virtual_nodes() -> usize {
    150
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_session_timeout_secs() -> u64 {
    30 * 60
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_success_threshold() -> u32 {
    3
}

fn default_breaker_timeout_ms() -> u64 {
    60_000
}

fn default_half_open_requests() -> u32 {
    3
}

fn default_weight() -> u32 {
    1
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}
