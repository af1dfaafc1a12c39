//
// src/proxy/pool.rs
//

use super::backend::Backend;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Ordered backend registry.
///
/// Registration order is preserved because round robin and the
/// "first encountered" tie-breaks depend on it. The write lock is only held
/// for the list mutation itself.
#[derive(Default)]
pub struct BackendPool {
    backends: RwLock<Vec<Arc<Backend>>>,
}

impl BackendPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, backend: Arc<Backend>) {
        self.backends.write().await.push(backend);
    }

    pub async fn remove(&self, id: &str) -> Option<Arc<Backend>> {
        let mut backends = self.backends.write().await;
        let index = backends.iter().position(|b| b.id == id)?;
        Some(backends.remove(index))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Backend>> {
        self.backends.read().await.iter().find(|b| b.id == id).cloned()
    }

    pub async fn snapshot(&self) -> Vec<Arc<Backend>> {
        self.backends.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.backends.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.backends.read().await.is_empty()
    }
}

/// Opaque id derived from the backend URL and the registration instant.
pub fn generate_backend_id(url: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let name = format!("{url}#{nanos}#{}", Uuid::new_v4());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, name.as_bytes())
        .simple()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use url::Url;

    fn backend(id: &str) -> Arc<Backend> {
        Arc::new(Backend::new(
            id.to_string(),
            Url::parse("http://127.0.0.1:8001").unwrap(),
            1,
            HashMap::new(),
        ))
    }

    #[tokio::test]
    async fn test_insert_preserves_order_and_remove() {
        let pool = BackendPool::new();
        pool.insert(backend("a")).await;
        pool.insert(backend("b")).await;
        pool.insert(backend("c")).await;

        let removed = pool.remove("b").await.unwrap();
        assert_eq!(removed.id, "b");
        assert!(pool.remove("b").await.is_none());

        let ids: Vec<_> = pool.snapshot().await.iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert!(pool.get("c").await.is_some());
        assert_eq!(pool.len().await, 2);
    }

    #[test]
    fn test_generated_ids_are_unique_hex() {
        let a = generate_backend_id("http://127.0.0.1:8001");
        let b = generate_backend_id("http://127.0.0.1:8001");

        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
