//! External Authorization Service
//!
//! Authorization sidecar for an Envoy proxy.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (text or JSON output)
//! 3. Create the route cache
//! 4. Start the OIDC metadata HTTP server
//! 5. Start the external authorization gRPC server
//! 6. Start the route document reconciler
//! 7. Wait for shutdown signal or a failed task

use extauth_service::cache::{InMemoryRouteCache, RouteCache};
use extauth_service::config::{Config, LogFormat};
use extauth_service::grpc::AuthService;
use extauth_service::pipeline::PipelineExecutor;
use extauth_service::reconciler::Reconciler;
use extauth_service::routes::AppState;
use extauth_service::server::{spawn_grpc_server, spawn_http_server};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Upper bound for in-flight work to drain after shutdown is requested.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Configuration is loaded first so LOG_FORMAT can select the output layer
    let config = Config::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or(LogFormat::Text);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "extauth_service=info,tower_http=info".into());
    let (json_layer, text_layer) = match log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };
    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    info!("Starting External Authorization Service");

    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        grpc_bind_address = %config.grpc_bind_address(),
        oidc_bind_address = %config.oidc_bind_address(),
        max_concurrent_streams = config.max_concurrent_streams,
        secret_label_key = %config.secret_label_key,
        routes_file = ?config.routes_file,
        "Configuration loaded successfully"
    );

    let cache: Arc<dyn RouteCache> = Arc::new(InMemoryRouteCache::new());
    let shutdown_token = CancellationToken::new();

    let mut http = spawn_http_server(
        &config.oidc_bind_address(),
        Arc::new(AppState {
            cache: Arc::clone(&cache),
        }),
        shutdown_token.child_token(),
    )
    .await?;

    let mut grpc = spawn_grpc_server(
        &config.grpc_bind_address(),
        AuthService::new(Arc::clone(&cache), PipelineExecutor::default()),
        config.max_concurrent_streams,
        shutdown_token.child_token(),
    )
    .await?;

    let reconciler = Reconciler::new(Arc::clone(&cache), config.secret_label_key.clone());
    let mut reconciler_task = tokio::spawn(reconciler.run(
        config.routes_file.clone(),
        config.routes_reload_interval,
        shutdown_token.child_token(),
    ));

    info!("External Authorization Service running - press Ctrl+C to shutdown");

    // A server or the reconciler ending early takes the whole process down
    let mut exit_error = None;
    tokio::select! {
        () = shutdown_signal() => {
            info!("Shutdown signal received, initiating graceful shutdown...");
        }
        result = &mut grpc.task => {
            exit_error = Some(format!("gRPC server exited: {:?}", result));
        }
        result = &mut http.task => {
            exit_error = Some(format!("Metadata server exited: {:?}", result));
        }
        result = &mut reconciler_task => {
            exit_error = Some(format!("Reconciler exited: {:?}", result));
        }
    }

    if let Some(reason) = &exit_error {
        error!(reason = %reason, "Task stopped unexpectedly, shutting down");
    }

    shutdown_token.cancel();

    let drain = async {
        for (name, task) in [("grpc", grpc.task), ("oidc", http.task)] {
            if !task.is_finished() {
                if let Ok(Err(e)) = task.await {
                    warn!(server = name, error = %e, "Server stopped with error");
                }
            }
        }
        if !reconciler_task.is_finished() {
            let _ = reconciler_task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, drain).await.is_err() {
        warn!("Graceful shutdown timed out");
    }

    info!("External Authorization Service shutdown complete");

    match exit_error {
        Some(reason) => Err(reason.into()),
        None => Ok(()),
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
