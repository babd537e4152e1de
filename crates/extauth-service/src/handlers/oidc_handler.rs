use crate::cache::lookup_host;
use crate::errors::AuthzError;
use crate::models::{OidcConfiguration, WristbandConfig};
use crate::observability::metrics::record_metadata_request;
use crate::routes::AppState;
use crate::services::oidc_service;
use axum::{
    extract::State,
    http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, HOST},
    Json,
};
use jsonwebtoken::jwk::JwkSet;
use std::sync::Arc;
use tracing::instrument;

const CACHE_CONTROL_VALUE: &str = "max-age=300";

/// Handle discovery document request
///
/// GET /.well-known/openid-configuration
///
/// Returns the OpenID Connect discovery document of the wristband issuer
/// configured for the request's host.
#[instrument(name = "extauth.oidc.discovery", skip_all, fields(host, status))]
pub async fn handle_get_discovery(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<OidcConfiguration>), AuthzError> {
    let result = with_wristband(&state, &headers, oidc_service::discovery_document).await;
    respond("discovery", result)
}

/// Handle key set request
///
/// GET /.well-known/openid-connect/certs
///
/// Returns the public keys of the wristband issuer configured for the
/// request's host, in configured order.
#[instrument(name = "extauth.oidc.jwks", skip_all, fields(host, status))]
pub async fn handle_get_jwks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<(HeaderMap, Json<JwkSet>), AuthzError> {
    let result = with_wristband(&state, &headers, oidc_service::key_set).await;
    respond("jwks", result)
}

/// Resolve the route's wristband by host and project it with `f`.
async fn with_wristband<T>(
    state: &AppState,
    headers: &HeaderMap,
    f: impl FnOnce(&WristbandConfig) -> T,
) -> Result<T, AuthzError> {
    let host = headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    tracing::Span::current().record("host", host);

    let service = lookup_host(state.cache.as_ref(), host)
        .await
        .ok_or_else(|| AuthzError::RouteNotFound(host.to_string()))?;

    let wristband = service.wristband().ok_or_else(|| {
        tracing::debug!(target: "extauth.oidc", host = %host, "Route has no wristband configured");
        AuthzError::RouteNotFound(host.to_string())
    })?;

    Ok(f(wristband))
}

fn respond<T>(
    document: &'static str,
    result: Result<T, AuthzError>,
) -> Result<(HeaderMap, Json<T>), AuthzError> {
    let status = match &result {
        Ok(_) => "200",
        Err(AuthzError::RouteNotFound(_)) => "404",
        Err(_) => "500",
    };
    tracing::Span::current().record("status", status);
    record_metadata_request(document, status);

    let body = result?;

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL_VALUE));

    Ok((headers, Json(body)))
}
