//! HTTP routes for the metadata listener.
//!
//! Defines the Axum router and application state.

use crate::cache::RouteCache;
use crate::handlers;
use crate::services::oidc_service::{DISCOVERY_PATH, JWKS_PATH};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Route configuration, keyed by host.
    pub cache: Arc<dyn RouteCache>,
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/.well-known/openid-configuration` - Discovery document per host
/// - `/.well-known/openid-connect/certs` - Public key set per host
/// - `/health` - Liveness probe
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route(DISCOVERY_PATH, get(handlers::handle_get_discovery))
        .route(JWKS_PATH, get(handlers::handle_get_jwks))
        .route("/health", get(handlers::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
