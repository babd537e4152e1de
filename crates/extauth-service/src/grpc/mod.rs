//! gRPC services.
//!
//! Provides the Envoy external authorization `Check` endpoint.

pub mod auth_service;

pub use auth_service::AuthService;
