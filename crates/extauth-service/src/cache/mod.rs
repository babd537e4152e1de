//! Route cache shared by the authorization and metadata servers.
//!
//! Entries are `Arc<ServiceConfig>` values replaced wholesale. A reader holds
//! its own `Arc` after lookup, so a request in flight finishes under the
//! configuration it observed even if the route is replaced meanwhile.

use crate::pipeline::ServiceConfig;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Capability contract of the route cache.
#[async_trait]
pub trait RouteCache: Send + Sync {
    /// Look up the configuration of a routing key.
    async fn get(&self, key: &str) -> Option<Arc<ServiceConfig>>;

    /// Replace the configuration of a routing key.
    async fn set(&self, key: &str, config: Arc<ServiceConfig>);

    /// Remove a routing key.
    async fn delete(&self, key: &str);

    /// All routing keys currently configured.
    async fn keys(&self) -> Vec<String>;
}

/// In-process route cache.
#[derive(Default)]
pub struct InMemoryRouteCache {
    entries: RwLock<HashMap<String, Arc<ServiceConfig>>>,
}

impl InMemoryRouteCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouteCache for InMemoryRouteCache {
    async fn get(&self, key: &str) -> Option<Arc<ServiceConfig>> {
        self.entries.read().await.get(key).cloned()
    }

    async fn set(&self, key: &str, config: Arc<ServiceConfig>) {
        self.entries.write().await.insert(key.to_string(), config);
        tracing::debug!(target: "extauth.cache", host = %key, "Route set");
    }

    async fn delete(&self, key: &str) {
        if self.entries.write().await.remove(key).is_some() {
            tracing::debug!(target: "extauth.cache", host = %key, "Route deleted");
        }
    }

    async fn keys(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }
}

/// Look up a routing key by host, retrying without a `:port` suffix.
pub async fn lookup_host(cache: &dyn RouteCache, host: &str) -> Option<Arc<ServiceConfig>> {
    if let Some(config) = cache.get(host).await {
        return Some(config);
    }

    match host.rsplit_once(':') {
        Some((name, port)) if !name.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            cache.get(name).await
        }
        _ => None,
    }
}
