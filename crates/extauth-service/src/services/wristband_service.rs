use crate::crypto;
use crate::errors::AuthzError;
use crate::models::{ClaimValue, Claims, WristbandConfig};
use crate::observability::metrics::record_wristband_issuance;
use crate::pipeline::AuthPipeline;
use crate::services::value_extractor::ClaimResolver;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::instrument;

/// Mints wristband tokens for allowed requests.
#[derive(Clone, Default)]
pub struct WristbandIssuer {
    resolver: ClaimResolver,
}

impl WristbandIssuer {
    pub fn new(resolver: ClaimResolver) -> Self {
        Self { resolver }
    }

    /// Issue a signed wristband for the current request.
    ///
    /// The token is signed with the first configured key and its header
    /// carries that key's identifier.
    #[instrument(skip_all, target = "extauth.wristband", fields(issuer = %config.issuer(), status))]
    pub fn issue(
        &self,
        pipeline: &dyn AuthPipeline,
        config: &WristbandConfig,
    ) -> Result<String, AuthzError> {
        let result = self
            .build_claims(pipeline, config, Utc::now())
            .and_then(|claims| {
                let signing_key = config.active_signing_key().ok_or_else(|| {
                    AuthzError::Configuration("wristband has no signing key".to_string())
                })?;
                crypto::sign_wristband(&claims, signing_key)
            });

        let status = if result.is_ok() { "success" } else { "error" };
        tracing::Span::current().record("status", status);
        record_wristband_issuance(status);

        result
    }

    /// Build the claim set for one token issued at `now`.
    ///
    /// Seeds `iss`, `iat`, `exp` and `sub`, then applies custom claims in
    /// order. A custom claim with a seeded name replaces the seeded value.
    pub fn build_claims(
        &self,
        pipeline: &dyn AuthPipeline,
        config: &WristbandConfig,
        now: DateTime<Utc>,
    ) -> Result<Claims, AuthzError> {
        let issued_at = DateTime::<Utc>::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        let expires_at = Duration::try_seconds(config.token_duration())
            .and_then(|duration| issued_at.checked_add_signed(duration))
            .ok_or_else(|| {
                AuthzError::Configuration(format!(
                    "wristband token duration out of range: {}",
                    config.token_duration()
                ))
            })?;

        let mut claims = Claims::new();
        claims.set("iss", ClaimValue::String(config.issuer().to_string()));
        claims.set("iat", ClaimValue::Timestamp(issued_at));
        claims.set("exp", ClaimValue::Timestamp(expires_at));
        claims.set(
            "sub",
            ClaimValue::String(subject_for(pipeline.resolved_identity())?),
        );

        if !config.custom_claims().is_empty() {
            let data = pipeline.authorization_data();
            for template in config.custom_claims() {
                claims.set(
                    template.name.clone(),
                    ClaimValue::String(self.resolver.resolve(template, &data)),
                );
            }
        }

        Ok(claims)
    }
}

/// Hex-encoded SHA-256 of the identity's canonical JSON form.
///
/// Object keys are sorted at every level, so equal identities always map to
/// the same subject.
pub fn subject_for(identity: &Value) -> Result<String, AuthzError> {
    let canonical = serde_json::to_vec(&canonicalize(identity))
        .map_err(|e| AuthzError::Signing(format!("identity serialization failed: {}", e)))?;

    Ok(hex::encode(Sha256::digest(&canonical)))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), canonicalize(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}
