//! External Authorization Service Library
//!
//! This library provides the authorization sidecar consulted by an Envoy
//! proxy before requests reach protected services. For each request host it
//! runs the configured identity, authorization and response phases and may
//! mint a short-lived signed "wristband" token. The public keys of every
//! wristband issuer are published as OpenID Connect discovery metadata.
//!
//! # Servers
//!
//! - gRPC external authorization server (default: 0.0.0.0:50051)
//! - HTTP OIDC metadata server (default: 0.0.0.0:8003)
//!
//! # Modules
//!
//! - `cache` - Host-keyed route configuration store
//! - `config` - Service configuration from environment
//! - `crypto` - Signing key loading and wristband signing
//! - `errors` - Error types with HTTP status code mapping
//! - `grpc` - Envoy `Authorization` service
//! - `handlers` - HTTP request handlers
//! - `models` - Wristband and OIDC data models
//! - `observability` - Metrics and log correlation helpers
//! - `pipeline` - Per-route authorization pipeline
//! - `reconciler` - Declarative route document source
//! - `routes` - Axum router setup
//! - `server` - Listener binding and server tasks
//! - `services` - Wristband issuance and OIDC document building

pub mod cache;
pub mod config;
pub mod crypto;
pub mod errors;
pub mod grpc;
pub mod handlers;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod reconciler;
pub mod routes;
pub mod server;
pub mod services;
