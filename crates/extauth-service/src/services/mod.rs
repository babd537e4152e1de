//! Service layer.
//!
//! # Components
//!
//! - `wristband_service` - Claim construction and token signing
//! - `oidc_service` - Discovery document and key set publishing
//! - `value_extractor` - JSON path resolution for claim values

pub mod oidc_service;
pub mod value_extractor;
pub mod wristband_service;

pub use value_extractor::{ClaimResolver, DottedPathExtractor, ValueExtractor};
pub use wristband_service::WristbandIssuer;
