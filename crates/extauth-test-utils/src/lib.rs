//! # ExtAuth Test Utilities
//!
//! Shared test utilities for the external authorization service.
//!
//! This crate provides:
//! - Static crypto fixtures (PEM keys in every supported encoding)
//! - Route builders (wristband and JSON response services)
//! - Pipeline fakes (scripted identity and authorization evaluators)
//! - Check request builders
//! - Server test harness (TestExtAuthServer for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use extauth_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let server = TestExtAuthServer::spawn().await?;
//!     server
//!         .configure("talker-api", TestServiceBuilder::new("talker").anonymous().build()?)
//!         .await;
//!
//!     let request = CheckRequestBuilder::new("talker-api").path("/hello").build();
//!     Ok(())
//! }
//! ```

pub mod check_requests;
pub mod crypto_fixtures;
pub mod pipeline_fakes;
pub mod route_builders;
pub mod server_harness;

// Re-export commonly used items
pub use check_requests::*;
pub use crypto_fixtures::*;
pub use pipeline_fakes::*;
pub use route_builders::*;
pub use server_harness::*;
