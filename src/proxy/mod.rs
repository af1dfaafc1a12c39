//
// src/proxy/mod.rs
//
mod backend;
mod pool;
#[allow(clippy::module_inception)]
mod proxy;

pub use backend::{Backend, BackendSnapshot, ConnectionGuard};
pub use pool::{generate_backend_id, BackendPool};
pub use proxy::{Proxy, ProxyError};
