//! OpenID Connect metadata for wristband validators.

use crate::models::{OidcConfiguration, WristbandConfig, SUPPORTED_SIGNING_ALGORITHMS};
use jsonwebtoken::jwk::JwkSet;

/// Path of the key set relative to the issuer.
pub const JWKS_PATH: &str = "/.well-known/openid-connect/certs";

/// Path of the discovery document relative to the issuer.
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// Build the discovery document for a wristband issuer.
///
/// `jwks_uri` is the issuer with the key set path appended as is.
pub fn discovery_document(config: &WristbandConfig) -> OidcConfiguration {
    let issuer = config.issuer().to_string();
    OidcConfiguration {
        jwks_uri: format!("{}{}", issuer, JWKS_PATH),
        issuer,
        id_token_signing_alg_values_supported: SUPPORTED_SIGNING_ALGORITHMS
            .iter()
            .map(|alg| alg.to_string())
            .collect(),
    }
}

/// Build the public key set for a wristband issuer, in configured key order.
pub fn key_set(config: &WristbandConfig) -> JwkSet {
    JwkSet {
        keys: config
            .signing_keys()
            .iter()
            .map(|key| key.public_jwk().clone())
            .collect(),
    }
}
