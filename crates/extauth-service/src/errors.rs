use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Failures while turning PEM input into a signing key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyMaterialError {
    #[error("Failed to decode PEM block")]
    DecodeFailure,

    #[error("Unsupported signing key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Failed to parse signing key: {0}")]
    KeyParseFailure(String),

    #[error("Unsupported signing algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Failure reported by an identity or authorization evaluator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct EvaluationError(pub String);

#[derive(Debug, Error)]
pub enum AuthzError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Key material error: {0}")]
    KeyMaterial(#[from] KeyMaterialError),

    #[error("Signing failure: {0}")]
    Signing(String),

    #[error("Failed to bind {listener} listener on {addr}: {source}")]
    ListenerBind {
        listener: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No route configured for host: {0}")]
    RouteNotFound(String),

    #[error("Server error: {0}")]
    Server(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for AuthzError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AuthzError::RouteNotFound(_) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "No wristband issuer is configured for this host".to_string(),
            ),
            _ => {
                tracing::error!(target: "extauth.errors", error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
            },
        };

        (status, Json(error_response)).into_response()
    }
}
