//! Test server harness for E2E testing
//!
//! Provides TestExtAuthServer for spawning both listeners in tests.

use extauth_service::cache::{InMemoryRouteCache, RouteCache};
use extauth_service::grpc::AuthService;
use extauth_service::pipeline::{PipelineExecutor, ServiceConfig};
use extauth_service::routes::AppState;
use extauth_service::server::{spawn_grpc_server, spawn_http_server, ServerHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Stream ceiling used by the harness.
pub const TEST_MAX_CONCURRENT_STREAMS: u32 = 64;

/// Test harness running the gRPC and metadata servers on random ports.
///
/// Both servers share one route cache, populated through [`configure`].
/// Dropping the harness cancels both servers.
///
/// [`configure`]: TestExtAuthServer::configure
pub struct TestExtAuthServer {
    grpc: ServerHandle,
    http: ServerHandle,
    cache: Arc<InMemoryRouteCache>,
    shutdown: CancellationToken,
    _guard: DropGuard,
}

impl TestExtAuthServer {
    /// Spawn both servers bound to 127.0.0.1:0.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let cache = Arc::new(InMemoryRouteCache::new());
        let shutdown = CancellationToken::new();

        let http = spawn_http_server(
            "127.0.0.1:0",
            Arc::new(AppState {
                cache: cache.clone(),
            }),
            shutdown.child_token(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn metadata server: {}", e))?;

        let grpc = spawn_grpc_server(
            "127.0.0.1:0",
            AuthService::new(cache.clone(), PipelineExecutor::default()),
            TEST_MAX_CONCURRENT_STREAMS,
            shutdown.child_token(),
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to spawn gRPC server: {}", e))?;

        Ok(Self {
            grpc,
            http,
            cache,
            _guard: shutdown.clone().drop_guard(),
            shutdown,
        })
    }

    /// Configure `host` with `config`.
    pub async fn configure(&self, host: &str, config: ServiceConfig) {
        self.cache.set(host, Arc::new(config)).await;
    }

    pub async fn remove(&self, host: &str) {
        self.cache.delete(host).await;
    }

    pub fn cache(&self) -> Arc<InMemoryRouteCache> {
        self.cache.clone()
    }

    /// Base URL of the metadata server.
    pub fn http_url(&self) -> String {
        format!("http://{}", self.http.local_addr)
    }

    /// Endpoint of the gRPC server, suitable for tonic clients.
    pub fn grpc_url(&self) -> String {
        format!("http://{}", self.grpc.local_addr)
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http.local_addr
    }

    /// Cancel both servers and wait for them to stop.
    pub async fn shutdown(self) -> Result<(), anyhow::Error> {
        self.shutdown.cancel();
        let Self { grpc, http, .. } = self;
        grpc.task.await??;
        http.task.await??;
        Ok(())
    }
}
