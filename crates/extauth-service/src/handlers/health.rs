//! Liveness probe for the metadata listener.

use tracing::instrument;

/// Liveness handler.
///
/// GET /health
///
/// Returns `OK` whenever the process is serving HTTP.
#[instrument(skip_all, name = "extauth.health.check")]
pub async fn health_check() -> &'static str {
    "OK"
}
