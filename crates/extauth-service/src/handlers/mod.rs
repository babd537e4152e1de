//! HTTP request handlers for the metadata listener.

pub mod health;
pub mod oidc_handler;

pub use health::health_check;
pub use oidc_handler::{handle_get_discovery, handle_get_jwks};
