// ────────────────────────────────
// src/proxy/proxy.rs
// Dispatcher: registry operations, backend selection and request forwarding
// ────────────────────────────────

use super::backend::{Backend, BackendSnapshot};
use super::pool::{generate_backend_id, BackendPool};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerManager};
use crate::config::{parse_backend_url, LoadBalancerConfig};
use crate::health::{HealthCheckResult, HealthChecker};
use crate::load_balancer::{create_load_balancer, LoadBalancer, SelectionContext};
use crate::metrics::{LoadBalancerStats, MetricsCollector, StatsCollector};
use hyper::client::HttpConnector;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Client, Request, Response, StatusCode, Uri, Version};
use hyper_tls::HttpsConnector;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REQUEST_ID: &str = "x-request-id";

pub struct Proxy {
    config: LoadBalancerConfig,
    pool: Arc<BackendPool>,
    balancer: Arc<dyn LoadBalancer>,
    breakers: Option<Arc<CircuitBreakerManager>>,
    client: Client<HttpsConnector<HttpConnector>>,
    health_checker: Arc<HealthChecker>,
    stats: StatsCollector,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Proxy {
    pub fn new(
        config: LoadBalancerConfig,
        metrics: Option<Arc<MetricsCollector>>,
    ) -> Result<Self, ProxyError> {
        config
            .validate()
            .map_err(|e| ProxyError::InvalidConfig(format!("{e:#}")))?;

        let pool = Arc::new(BackendPool::new());
        let balancer = create_load_balancer(config.algorithm, config.virtual_nodes);
        let breakers = config
            .circuit_breaker
            .enabled
            .then(|| Arc::new(CircuitBreakerManager::new(config.circuit_breaker.clone())));

        let health_checker = Arc::new(HealthChecker::new(
            &config,
            pool.clone(),
            breakers.clone(),
            metrics.clone(),
        )?);

        let client = Client::builder().build::<_, Body>(HttpsConnector::new());

        info!(
            "Load balancer using {} (circuit breaking {})",
            balancer.name(),
            if breakers.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            pool,
            balancer,
            breakers,
            client,
            health_checker,
            stats: StatsCollector::new(),
            metrics,
        })
    }

    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    pub fn algorithm(&self) -> &'static str {
        self.balancer.name()
    }

    /// Registers a backend and returns its generated id.
    pub async fn add_backend(
        &self,
        url: &str,
        weight: u32,
        metadata: HashMap<String, Value>,
    ) -> Result<String, ProxyError> {
        let parsed = parse_backend_url(url).map_err(|reason| ProxyError::InvalidBackendUrl {
            url: url.to_string(),
            reason,
        })?;

        let id = generate_backend_id(url);
        let backend = Arc::new(Backend::new(id.clone(), parsed, weight, metadata));

        if let Some(breakers) = &self.breakers {
            breakers.get_or_create(&id);
        }
        self.pool.insert(backend.clone()).await;
        self.balancer.backend_added(&backend).await;

        if let Some(metrics) = &self.metrics {
            metrics.update_backend_health(&id, true);
        }

        info!("Added backend {} ({}, weight {})", id, backend.url, weight);
        Ok(id)
    }

    pub async fn remove_backend(&self, id: &str) -> Result<(), ProxyError> {
        let backend = self
            .pool
            .remove(id)
            .await
            .ok_or_else(|| ProxyError::BackendNotFound(id.to_string()))?;

        self.balancer.backend_removed(&backend).await;
        if let Some(breakers) = &self.breakers {
            breakers.remove(id);
        }
        if let Some(metrics) = &self.metrics {
            metrics.forget_backend(id);
        }

        info!("Removed backend {} ({})", id, backend.url);
        Ok(())
    }

    pub fn circuit_breaker(&self, backend_id: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.as_ref().and_then(|m| m.get(backend_id))
    }

    /// Backends that are healthy and currently admitted by their breaker.
    pub async fn eligible_backends(&self) -> Vec<Arc<Backend>> {
        let backends = self.pool.snapshot().await;
        let mut eligible = Vec::with_capacity(backends.len());

        for backend in backends {
            if !backend.is_healthy() {
                continue;
            }
            if let Some(breaker) = self.circuit_breaker(&backend.id) {
                if !breaker.can_request().await {
                    continue;
                }
            }
            eligible.push(backend);
        }

        eligible
    }

    /// Forwards `req` to one eligible backend. Never retries.
    pub async fn dispatch(
        &self,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let start = Instant::now();
        let _active = self.stats.begin();
        let _in_flight = self.metrics.as_ref().map(|m| m.in_flight());

        self.route(req, peer, start).await
    }

    async fn route(
        &self,
        req: Request<Body>,
        peer: Option<SocketAddr>,
        start: Instant,
    ) -> Result<Response<Body>, ProxyError> {
        let context = SelectionContext::from_request(&req, peer);
        let eligible = self.eligible_backends().await;

        let Some(backend) = self.balancer.select_backend(&eligible, &context).await else {
            self.stats.record(false, start.elapsed());
            if let Some(metrics) = &self.metrics {
                metrics.record_request(
                    req.method().as_str(),
                    StatusCode::SERVICE_UNAVAILABLE.as_u16(),
                    "none",
                    start.elapsed(),
                );
            }
            warn!(
                "No eligible backend for {} {}",
                req.method(),
                req.uri().path()
            );
            return Err(ProxyError::NoHealthyBackends);
        };

        debug!(
            "Selected backend {} via {} for client {:?}",
            backend.id,
            self.balancer.name(),
            context.client_ip
        );

        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let connection = backend.acquire();
        if let Some(metrics) = &self.metrics {
            metrics.update_backend_connections(&backend.id, backend.active_connections());
        }

        let outcome = self.forward(&backend.url, req, peer).await;
        let elapsed = start.elapsed();
        drop(connection);

        let success = matches!(&outcome, Ok(response) if !response.status().is_server_error());
        backend.record_response_time(elapsed);
        self.stats.record(success, elapsed);

        let breaker = self.circuit_breaker(&backend.id);
        if success {
            backend.record_success();
            if let Some(breaker) = &breaker {
                breaker.record_success().await;
            }
        } else {
            backend.record_error();
            if let Some(breaker) = &breaker {
                breaker.record_failure().await;
            }
        }

        let status = match &outcome {
            Ok(response) => response.status(),
            Err(err) => err.status(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_request(method.as_str(), status.as_u16(), &backend.id, elapsed);
            metrics.record_backend_request(&backend.id, success);
            metrics.update_backend_connections(&backend.id, backend.active_connections());
            if let Some(breaker) = &breaker {
                metrics.update_circuit_breaker_state(&backend.id, breaker.get_state().await);
            }
        }

        if self.config.log_requests {
            info!("{} {} -> {} {} in {:?}", method, path, backend.id, status, elapsed);
        } else {
            debug!("{} {} -> {} {} in {:?}", method, path, backend.id, status, elapsed);
        }

        if let Err(err) = &outcome {
            warn!("Proxying to backend {} failed: {}", backend.id, err);
        }

        outcome.map(|mut response| {
            strip_hop_by_hop(response.headers_mut());
            response
        })
    }

    async fn forward(
        &self,
        target: &Url,
        req: Request<Body>,
        peer: Option<SocketAddr>,
    ) -> Result<Response<Body>, ProxyError> {
        let upstream = build_upstream_request(target, req, peer)?;

        match tokio::time::timeout(self.config.proxy_timeout(), self.client.request(upstream)).await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(ProxyError::BackendError(e.to_string())),
            Err(_) => Err(ProxyError::Timeout),
        }
    }

    /// Like [`Proxy::dispatch`], with errors rendered as HTTP responses.
    pub async fn handle(&self, req: Request<Body>, peer: Option<SocketAddr>) -> Response<Body> {
        match self.dispatch(req, peer).await {
            Ok(response) => response,
            Err(err) => err.into(),
        }
    }

    pub async fn get_backends(&self) -> Vec<BackendSnapshot> {
        let backends = self.pool.snapshot().await;
        let mut snapshots = Vec::with_capacity(backends.len());

        for backend in backends {
            let state = match self.circuit_breaker(&backend.id) {
                Some(breaker) => Some(breaker.get_state().await),
                None => None,
            };
            snapshots.push(backend.snapshot(state).await);
        }

        snapshots
    }

    pub fn get_stats(&self) -> LoadBalancerStats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }

    /// Runs the periodic health checker until [`Proxy::stop`] is called.
    pub fn start_health_checker(&self) -> JoinHandle<()> {
        tokio::spawn(self.health_checker.clone().start())
    }

    /// One probe round outside the regular schedule.
    pub async fn check_health_now(&self) -> Vec<HealthCheckResult> {
        self.health_checker.check_all_backends().await
    }

    /// Stops the health checker. In-flight requests drain on their own.
    pub fn stop(&self) {
        self.health_checker.shutdown();
    }
}

fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{base}/{path}"),
        _ => format!("{base}{path}"),
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(name);
    }
}

/// Rewrites an inbound request so it targets `target`. Method, remaining
/// headers and body pass through untouched.
fn build_upstream_request(
    target: &Url,
    req: Request<Body>,
    peer: Option<SocketAddr>,
) -> Result<Request<Body>, ProxyError> {
    let (mut parts, body) = req.into_parts();

    let mut uri = format!(
        "{}://{}{}",
        target.scheme(),
        authority(target),
        join_paths(target.path(), parts.uri.path())
    );
    match (target.query(), parts.uri.query()) {
        (Some(a), Some(b)) => uri.push_str(&format!("?{a}&{b}")),
        (Some(q), None) | (None, Some(q)) => uri.push_str(&format!("?{q}")),
        (None, None) => {}
    }
    parts.uri = uri
        .parse::<Uri>()
        .map_err(|e| ProxyError::BackendError(format!("invalid upstream uri {uri:?}: {e}")))?;
    parts.version = Version::HTTP_11;

    strip_hop_by_hop(&mut parts.headers);

    if let Some(peer) = peer {
        let client = peer.ip().to_string();
        let forwarded = match parts.headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {client}"),
            None => client,
        };
        if let Ok(value) = HeaderValue::from_str(&forwarded) {
            parts
                .headers
                .insert(HeaderName::from_static(X_FORWARDED_FOR), value);
        }
    }

    if !parts.headers.contains_key(X_REQUEST_ID) {
        if let Ok(value) = HeaderValue::from_str(&Uuid::new_v4().to_string()) {
            parts.headers.insert(HeaderName::from_static(X_REQUEST_ID), value);
        }
    }

    Ok(Request::from_parts(parts, body))
}

fn authority(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("Invalid backend URL {url:?}: {reason}")]
    InvalidBackendUrl { url: String, reason: String },

    #[error("Backend not found: {0}")]
    BackendNotFound(String),

    #[error("No healthy backends available")]
    NoHealthyBackends,

    #[error("Backend error: {0}")]
    BackendError(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Invalid load balancer configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to build HTTP client: {0}")]
    ClientInit(#[from] reqwest::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::InvalidBackendUrl { .. } => StatusCode::BAD_REQUEST,
            ProxyError::BackendNotFound(_) => StatusCode::NOT_FOUND,
            ProxyError::NoHealthyBackends => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::BackendError(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::InvalidConfig(_) | ProxyError::ClientInit(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

// Convert ProxyError to Hyper Response for error handling
impl From<ProxyError> for Response<Body> {
    fn from(err: ProxyError) -> Self {
        let status = err.status();
        let message = status.canonical_reason().unwrap_or("Error");

        let mut response = Response::new(Body::from(message));
        *response.status_mut() = status;
        response
    }
}
