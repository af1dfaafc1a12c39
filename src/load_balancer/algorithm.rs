// src/load_balancer/algorithm.rs
use crate::proxy::Backend;
use async_trait::async_trait;
use hyper::Request;
use std::net::SocketAddr;
use std::sync::Arc;

/// A backend selection policy.
///
/// `backends` is the eligible set (healthy and admitted by its circuit
/// breaker), in registration order. Policies that keep their own view of the
/// registry get told about registrations and removals.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    async fn select_backend(
        &self,
        backends: &[Arc<Backend>],
        context: &SelectionContext,
    ) -> Option<Arc<Backend>>;

    async fn backend_added(&self, _backend: &Arc<Backend>) {}

    async fn backend_removed(&self, _backend: &Arc<Backend>) {}

    fn name(&self) -> &'static str;
}

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_REAL_IP: &str = "x-real-ip";

/// Per-request inputs to a selection.
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    pub client_ip: Option<String>,
}

impl SelectionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    /// Resolves the client address from `X-Forwarded-For`, then `X-Real-IP`,
    /// then the connection peer.
    pub fn from_request<B>(req: &Request<B>, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.split(',').next())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        let client_ip = header(X_FORWARDED_FOR)
            .or_else(|| header(X_REAL_IP))
            .or_else(|| peer.map(|addr| addr.ip().to_string()));

        Self { client_ip }
    }

    /// Key used by the hashing policies; requests without a resolvable
    /// address all hash to the same bucket.
    pub fn hash_key(&self) -> &str {
        self.client_ip.as_deref().unwrap_or("")
    }
}

/// 32-bit FNV-1a.
pub fn fnv1a_32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c_9dc5;
    const PRIME: u32 = 0x0100_0193;

    data.iter().fold(OFFSET_BASIS, |hash, &byte| {
        (hash ^ u32::from(byte)).wrapping_mul(PRIME)
    })
}
