//! Listener binding and supervised server tasks.
//!
//! Each server binds its listener before spawning so bind failures surface at
//! startup. The spawned task resolves when the server stops, either because
//! the shutdown token was cancelled or because serving failed.

use crate::errors::AuthzError;
use crate::grpc::AuthService;
use crate::routes::{self, AppState};
use envoy_types::ext_authz::v3::pb::AuthorizationServer;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A running server task.
pub struct ServerHandle {
    /// Address the listener is bound to.
    pub local_addr: SocketAddr,
    pub task: JoinHandle<Result<(), AuthzError>>,
}

async fn bind(listener: &'static str, addr: &str) -> Result<(TcpListener, SocketAddr), AuthzError> {
    let bind_error = |source| AuthzError::ListenerBind {
        listener,
        addr: addr.to_string(),
        source,
    };

    let tcp = TcpListener::bind(addr).await.map_err(|e| {
        error!(target: "extauth.server", error = %e, addr = %addr, listener, "Failed to bind listener");
        bind_error(e)
    })?;
    let local_addr = tcp.local_addr().map_err(bind_error)?;

    info!(target: "extauth.server", addr = %local_addr, listener, "Listener bound successfully");
    Ok((tcp, local_addr))
}

/// Bind and spawn the external authorization gRPC server.
///
/// The standard gRPC health service is registered alongside and reports
/// SERVING for the authorization service.
pub async fn spawn_grpc_server(
    addr: &str,
    service: AuthService,
    max_concurrent_streams: u32,
    shutdown: CancellationToken,
) -> Result<ServerHandle, AuthzError> {
    let (listener, local_addr) = bind("grpc", addr).await?;

    let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AuthorizationServer<AuthService>>()
        .await;

    let task = tokio::spawn(async move {
        info!(target: "extauth.server", addr = %local_addr, "gRPC server starting");
        let result = tonic::transport::Server::builder()
            .max_concurrent_streams(max_concurrent_streams)
            .add_service(health_service)
            .add_service(AuthorizationServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown.cancelled().await;
                info!(target: "extauth.server", "gRPC server shutting down");
            })
            .await;

        result.map_err(|e| {
            error!(target: "extauth.server", error = %e, "gRPC server failed");
            AuthzError::Server(format!("gRPC server failed: {}", e))
        })
    });

    Ok(ServerHandle { local_addr, task })
}

/// Bind and spawn the OIDC metadata HTTP server.
pub async fn spawn_http_server(
    addr: &str,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) -> Result<ServerHandle, AuthzError> {
    let (listener, local_addr) = bind("oidc", addr).await?;
    let app = routes::build_routes(state);

    let task = tokio::spawn(async move {
        info!(target: "extauth.server", addr = %local_addr, "Metadata server starting");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!(target: "extauth.server", "Metadata server shutting down");
            })
            .await;

        result.map_err(|e| {
            error!(target: "extauth.server", error = %e, "Metadata server failed");
            AuthzError::Server(format!("Metadata server failed: {}", e))
        })
    });

    Ok(ServerHandle { local_addr, task })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::cache::InMemoryRouteCache;

    #[tokio::test]
    async fn test_bind_conflict_is_listener_bind_error() {
        let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = occupied.local_addr().unwrap().to_string();

        let state = Arc::new(AppState {
            cache: Arc::new(InMemoryRouteCache::new()),
        });
        let result = spawn_http_server(&addr, state, CancellationToken::new()).await;

        match result {
            Err(AuthzError::ListenerBind { listener, addr: a, .. }) => {
                assert_eq!(listener, "oidc");
                assert_eq!(a, addr);
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("bind should have failed"),
        }
    }

    #[tokio::test]
    async fn test_servers_stop_on_cancellation() {
        let token = CancellationToken::new();
        let cache = Arc::new(InMemoryRouteCache::new());

        let http = spawn_http_server(
            "127.0.0.1:0",
            Arc::new(AppState {
                cache: cache.clone(),
            }),
            token.clone(),
        )
        .await
        .unwrap();
        let grpc = spawn_grpc_server(
            "127.0.0.1:0",
            AuthService::new(cache, Default::default()),
            16,
            token.clone(),
        )
        .await
        .unwrap();

        assert_ne!(http.local_addr.port(), 0);
        assert_ne!(grpc.local_addr.port(), 0);

        token.cancel();
        assert!(http.task.await.unwrap().is_ok());
        assert!(grpc.task.await.unwrap().is_ok());
    }
}
