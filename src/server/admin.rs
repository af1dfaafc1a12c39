// ────────────────────────────────
// src/server/admin.rs
// Inspection listener: prometheus text, backend snapshots and stats as JSON.
// ────────────────────────────────
use crate::metrics::MetricsRegistry;
use crate::proxy::Proxy;
use anyhow::Result;
use hyper::header::CONTENT_TYPE;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AdminServer {
    proxy: Arc<Proxy>,
    registry: Option<Arc<MetricsRegistry>>,
    metrics_path: Arc<str>,
}

impl AdminServer {
    pub fn new(
        proxy: Arc<Proxy>,
        registry: Option<Arc<MetricsRegistry>>,
        metrics_path: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            proxy,
            registry,
            metrics_path: metrics_path.into(),
        }
    }

    /// Binds `addr` and serves on a background task until `shutdown` resolves.
    pub fn spawn<F>(self, addr: SocketAddr, shutdown: F) -> Result<tokio::task::JoinHandle<()>>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let admin = self.clone();
        let make_service = make_service_fn(move |_| {
            let admin = admin.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req: Request<Body>| {
                    let admin = admin.clone();
                    async move { Ok::<_, Infallible>(admin.route(req).await) }
                }))
            }
        });

        let server = Server::try_bind(&addr)?
            .serve(make_service)
            .with_graceful_shutdown(shutdown);

        info!("Admin server listening on http://{}", addr);

        Ok(tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("Admin server error: {}", e);
            }
        }))
    }

    pub async fn route(&self, req: Request<Body>) -> Response<Body> {
        if req.method() != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        }

        let path = req.uri().path();
        if path == &*self.metrics_path {
            return self.render_metrics();
        }

        match path {
            "/backends" => json(&self.proxy.get_backends().await),
            "/stats" => json(&self.proxy.get_stats()),
            _ => text(StatusCode::NOT_FOUND, "Not Found"),
        }
    }

    fn render_metrics(&self) -> Response<Body> {
        let Some(registry) = &self.registry else {
            return text(StatusCode::NOT_FOUND, "Metrics disabled");
        };

        match registry.gather() {
            Ok(body) => {
                let mut response = Response::new(Body::from(body));
                response.headers_mut().insert(
                    CONTENT_TYPE,
                    hyper::header::HeaderValue::from_static("text/plain; version=0.0.4"),
                );
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
            }
        }
    }
}

fn text(status: StatusCode, message: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(message));
    *response.status_mut() = status;
    response
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(Body::from(body));
            response.headers_mut().insert(
                CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(e) => {
            error!("Failed to serialize admin response: {}", e);
            text(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
        }
    }
}
