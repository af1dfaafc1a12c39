// tests/load_balancer_tests.rs
use hyper::{Body, Request, StatusCode};
use std::collections::HashMap;
use std::time::Duration;
use upstream_balancer::circuit_breaker::CircuitBreakerState;
use upstream_balancer::config::{CircuitBreakerConfig, LoadBalancerAlgorithm, LoadBalancerConfig};
use upstream_balancer::proxy::{Proxy, ProxyError};

fn config(algorithm: LoadBalancerAlgorithm) -> LoadBalancerConfig {
    LoadBalancerConfig {
        algorithm,
        health_check_timeout_secs: 1,
        proxy_timeout_secs: 2,
        ..LoadBalancerConfig::default()
    }
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

async fn body_string(response: hyper::Response<Body>) -> String {
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_dispatch_forwards_method_path_and_body() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/orders")
        .match_body("payload")
        .match_header("x-request-id", mockito::Matcher::Any)
        .with_status(201)
        .with_body("created")
        .create_async()
        .await;

    let proxy = Proxy::new(config(LoadBalancerAlgorithm::RoundRobin), None).unwrap();
    proxy
        .add_backend(&server.url(), 1, HashMap::new())
        .await
        .unwrap();

    let req = Request::builder()
        .method("POST")
        .uri("/api/orders")
        .body(Body::from("payload"))
        .unwrap();
    let response = proxy
        .dispatch(req, Some("10.1.2.3:5555".parse().unwrap()))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(body_string(response).await, "created");
    mock.assert_async().await;

    let stats = proxy.get_stats();
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.success_requests, 1);
    assert_eq!(stats.active_connections, 0);

    let backends = proxy.get_backends().await;
    assert_eq!(backends[0].success_count, 1);
    assert_eq!(backends[0].connections, 0);
}

#[tokio::test]
async fn test_no_eligible_backend_returns_503() {
    let proxy = Proxy::new(config(LoadBalancerAlgorithm::LeastConnections), None).unwrap();

    let result = proxy.dispatch(get("/"), None).await;
    assert!(matches!(result, Err(ProxyError::NoHealthyBackends)));

    // Every registered backend unhealthy behaves the same way.
    let id = proxy
        .add_backend("http://127.0.0.1:1", 1, HashMap::new())
        .await
        .unwrap();
    for backend in proxy.eligible_backends().await {
        backend.update_health(false).await;
    }

    let response = proxy.handle(get("/"), None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let snapshot = proxy.get_backends().await;
    assert_eq!(snapshot[0].id, id);
    assert_eq!(snapshot[0].connections, 0);
    assert_eq!(snapshot[0].error_count, 0);

    let stats = proxy.get_stats();
    assert_eq!(stats.total_requests, 2);
    assert_eq!(stats.failed_requests, 2);
}

#[tokio::test]
async fn test_weighted_round_robin_follows_weights() {
    let mut heavy = mockito::Server::new_async().await;
    let mut light = mockito::Server::new_async().await;
    let _heavy_mock = heavy
        .mock("GET", "/")
        .with_body("heavy")
        .expect_at_least(1)
        .create_async()
        .await;
    let _light_mock = light
        .mock("GET", "/")
        .with_body("light")
        .expect_at_least(1)
        .create_async()
        .await;

    let proxy = Proxy::new(config(LoadBalancerAlgorithm::WeightedRoundRobin), None).unwrap();
    proxy.add_backend(&heavy.url(), 2, HashMap::new()).await.unwrap();
    proxy.add_backend(&light.url(), 1, HashMap::new()).await.unwrap();

    let mut heavy_hits = 0;
    for _ in 0..300 {
        let response = proxy.dispatch(get("/"), None).await.unwrap();
        if body_string(response).await == "heavy" {
            heavy_hits += 1;
        }
    }

    assert!(
        (160..=240).contains(&heavy_hits),
        "heavy backend served {heavy_hits} of 300"
    );
}

#[tokio::test]
async fn test_backend_failures_are_counted() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("GET", "/boom")
        .with_status(500)
        .create_async()
        .await;

    let proxy = Proxy::new(config(LoadBalancerAlgorithm::RoundRobin), None).unwrap();
    let id = proxy.add_backend(&server.url(), 1, HashMap::new()).await.unwrap();

    // A 5xx is relayed to the client but counted as a failure.
    let response = proxy.dispatch(get("/boom"), None).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let stats = proxy.get_stats();
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.success_requests, 0);

    let backends = proxy.get_backends().await;
    assert_eq!(backends[0].error_count, 1);

    let breaker = proxy.circuit_breaker(&id).unwrap();
    assert_eq!(breaker.get_metrics().await.failure_count, 1);
}

#[tokio::test]
async fn test_unreachable_backend_yields_bad_gateway() {
    let proxy = Proxy::new(config(LoadBalancerAlgorithm::Random), None).unwrap();
    proxy
        .add_backend("http://127.0.0.1:1", 1, HashMap::new())
        .await
        .unwrap();

    let response = proxy.handle(get("/"), None).await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(proxy.get_stats().failed_requests, 1);
    assert_eq!(proxy.get_backends().await[0].connections, 0);
}

#[tokio::test]
async fn test_registry_rejects_bad_input() {
    let proxy = Proxy::new(config(LoadBalancerAlgorithm::RoundRobin), None).unwrap();

    let err = proxy
        .add_backend("not a url", 1, HashMap::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::InvalidBackendUrl { .. }));

    let err = proxy.remove_backend("missing").await.unwrap_err();
    assert!(matches!(err, ProxyError::BackendNotFound(_)));

    let id = proxy
        .add_backend("http://10.0.0.1:8080", 1, HashMap::new())
        .await
        .unwrap();
    assert!(proxy.circuit_breaker(&id).is_some());

    proxy.remove_backend(&id).await.unwrap();
    assert!(proxy.get_backends().await.is_empty());
    assert!(proxy.circuit_breaker(&id).is_none());
}

#[tokio::test]
async fn test_health_checks_drive_circuit_breaker() {
    let mut server = mockito::Server::new_async().await;
    let down_mock = server
        .mock("GET", "/health")
        .with_status(503)
        .create_async()
        .await;

    let lb_config = LoadBalancerConfig {
        circuit_breaker: CircuitBreakerConfig {
            timeout_ms: 50,
            ..CircuitBreakerConfig::default()
        },
        ..config(LoadBalancerAlgorithm::RoundRobin)
    };
    let proxy = Proxy::new(lb_config, None).unwrap();
    let id = proxy.add_backend(&server.url(), 1, HashMap::new()).await.unwrap();
    let breaker = proxy.circuit_breaker(&id).unwrap();

    for _ in 0..5 {
        let results = proxy.check_health_now().await;
        assert!(!results[0].healthy);
    }
    assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);
    assert!(proxy.eligible_backends().await.is_empty());

    tokio::time::sleep(Duration::from_millis(80)).await;
    down_mock.remove_async().await;
    let _up_mock = server
        .mock("GET", "/health")
        .with_status(200)
        .create_async()
        .await;

    let results = proxy.check_health_now().await;
    assert!(results[0].healthy);
    assert_eq!(breaker.get_state().await, CircuitBreakerState::HalfOpen);
    assert_eq!(proxy.eligible_backends().await.len(), 1);

    proxy.check_health_now().await;
    proxy.check_health_now().await;
    assert_eq!(breaker.get_state().await, CircuitBreakerState::Closed);
}

#[tokio::test]
async fn test_open_breaker_excludes_healthy_backend() {
    let mut tripped = mockito::Server::new_async().await;
    let mut standby = mockito::Server::new_async().await;
    let tripped_mock = tripped
        .mock("GET", "/")
        .with_body("tripped")
        .expect(0)
        .create_async()
        .await;
    let standby_mock = standby
        .mock("GET", "/")
        .with_body("standby")
        .expect(10)
        .create_async()
        .await;

    let proxy = Proxy::new(config(LoadBalancerAlgorithm::RoundRobin), None).unwrap();
    let tripped_id = proxy.add_backend(&tripped.url(), 1, HashMap::new()).await.unwrap();
    proxy.add_backend(&standby.url(), 1, HashMap::new()).await.unwrap();

    let breaker = proxy.circuit_breaker(&tripped_id).unwrap();
    for _ in 0..5 {
        breaker.record_failure().await;
    }
    assert_eq!(breaker.get_state().await, CircuitBreakerState::Open);

    for _ in 0..10 {
        let response = proxy.dispatch(get("/"), None).await.unwrap();
        assert_eq!(body_string(response).await, "standby");
    }

    tripped_mock.assert_async().await;
    standby_mock.assert_async().await;

    let snapshot = proxy.get_backends().await;
    let tripped_snapshot = snapshot.iter().find(|b| b.id == tripped_id).unwrap();
    assert!(tripped_snapshot.healthy);
    assert_eq!(tripped_snapshot.connections, 0);
    assert_eq!(tripped_snapshot.success_count, 0);
    assert_eq!(tripped_snapshot.error_count, 0);
}

#[tokio::test]
async fn test_consistent_hash_keeps_clients_on_one_backend() {
    let mut servers = Vec::new();
    let mut mocks = Vec::new();
    for name in ["a", "b", "c"] {
        let mut server = mockito::Server::new_async().await;
        mocks.push(
            server
                .mock("GET", "/")
                .with_body(name)
                .expect_at_least(0)
                .create_async()
                .await,
        );
        servers.push(server);
    }

    let proxy = Proxy::new(config(LoadBalancerAlgorithm::ConsistentHash), None).unwrap();
    for server in &servers {
        proxy.add_backend(&server.url(), 1, HashMap::new()).await.unwrap();
    }

    for client in ["198.51.100.7", "198.51.100.8", "203.0.113.40"] {
        let mut seen = Vec::new();
        for _ in 0..5 {
            let req = Request::builder()
                .uri("/")
                .header("X-Forwarded-For", client)
                .body(Body::empty())
                .unwrap();
            let response = proxy.dispatch(req, None).await.unwrap();
            seen.push(body_string(response).await);
        }
        seen.dedup();
        assert_eq!(seen.len(), 1, "client {client} moved between backends");
    }
}

#[tokio::test]
async fn test_stop_ends_health_loop() {
    let proxy = Proxy::new(config(LoadBalancerAlgorithm::RoundRobin), None).unwrap();
    let handle = proxy.start_health_checker();

    proxy.stop();

    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("health loop did not stop")
        .unwrap();
}
