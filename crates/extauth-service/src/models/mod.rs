//! Wristband configuration and token models.

use crate::crypto::SigningKey;
use crate::errors::AuthzError;
use chrono::{DateTime, Utc};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};

/// Token lifetime used when a wristband does not configure one.
pub const DEFAULT_WRISTBAND_DURATION_SECONDS: i64 = 300;

/// Algorithms advertised by the discovery document.
///
/// Fixed list; it does not reflect which algorithms are configured.
pub const SUPPORTED_SIGNING_ALGORITHMS: [&str; 6] =
    ["ES256", "ES384", "ES512", "RS256", "RS384", "RS512"];

/// Where a custom claim takes its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimSource {
    /// A literal string.
    Static(String),

    /// A JSON path resolved against the authorization data at request time.
    FromJson(String),
}

/// A named claim with exactly one value source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTemplate {
    pub name: String,
    pub source: ClaimSource,
}

impl ClaimTemplate {
    pub fn static_value(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ClaimSource::Static(value.into()),
        }
    }

    pub fn from_json(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ClaimSource::FromJson(path.into()),
        }
    }

    /// Build a template from optional sources as they appear in route documents.
    ///
    /// Exactly one of `value` and `from_json` must be set, and a JSON path
    /// must not be empty.
    pub fn from_parts(
        name: &str,
        value: Option<String>,
        from_json: Option<String>,
    ) -> Result<Self, AuthzError> {
        if name.is_empty() {
            return Err(AuthzError::Configuration(
                "claim template name must not be empty".to_string(),
            ));
        }

        match (value, from_json) {
            (Some(value), None) => Ok(Self::static_value(name, value)),
            (None, Some(path)) if !path.is_empty() => Ok(Self::from_json(name, path)),
            (None, Some(_)) => Err(AuthzError::Configuration(format!(
                "claim '{}' has an empty JSON path",
                name
            ))),
            (Some(_), Some(_)) => Err(AuthzError::Configuration(format!(
                "claim '{}' must have exactly one value source, found two",
                name
            ))),
            (None, None) => Err(AuthzError::Configuration(format!(
                "claim '{}' has no value source",
                name
            ))),
        }
    }
}

/// Issuer configuration for one route's wristband.
///
/// Holds at least one signing key; the first key signs every token.
#[derive(Debug, Clone)]
pub struct WristbandConfig {
    issuer: String,
    custom_claims: Vec<ClaimTemplate>,
    token_duration: i64,
    signing_keys: Vec<SigningKey>,
}

impl WristbandConfig {
    /// Build a wristband configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Configuration` when `signing_keys` is empty or when
    /// `token_duration` is set but not positive or too large to represent as a
    /// `chrono::Duration`.
    pub fn new(
        issuer: impl Into<String>,
        custom_claims: Vec<ClaimTemplate>,
        token_duration: Option<i64>,
        signing_keys: Vec<SigningKey>,
    ) -> Result<Self, AuthzError> {
        let token_duration = token_duration.unwrap_or(DEFAULT_WRISTBAND_DURATION_SECONDS);
        if token_duration <= 0 {
            return Err(AuthzError::Configuration(format!(
                "wristband token duration must be positive, got {}",
                token_duration
            )));
        }
        if chrono::Duration::try_seconds(token_duration).is_none() {
            return Err(AuthzError::Configuration(format!(
                "wristband token duration out of range, got {}",
                token_duration
            )));
        }

        if signing_keys.is_empty() {
            return Err(AuthzError::Configuration(
                "wristband requires at least one signing key".to_string(),
            ));
        }

        Ok(Self {
            issuer: issuer.into(),
            custom_claims,
            token_duration,
            signing_keys,
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn custom_claims(&self) -> &[ClaimTemplate] {
        &self.custom_claims
    }

    /// Token lifetime in seconds.
    pub fn token_duration(&self) -> i64 {
        self.token_duration
    }

    pub fn signing_keys(&self) -> &[SigningKey] {
        &self.signing_keys
    }

    /// The key that signs tokens: always the first configured key.
    pub fn active_signing_key(&self) -> Option<&SigningKey> {
        self.signing_keys.first()
    }
}

/// A claim value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimValue {
    String(String),
    Integer(i64),
    /// Serialized as seconds since the Unix epoch.
    Timestamp(DateTime<Utc>),
}

impl Serialize for ClaimValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ClaimValue::String(s) => serializer.serialize_str(s),
            ClaimValue::Integer(i) => serializer.serialize_i64(*i),
            ClaimValue::Timestamp(ts) => serializer.serialize_i64(ts.timestamp()),
        }
    }
}

/// Ordered claim set of a single token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Claims {
    entries: Vec<(String, ClaimValue)>,
}

impl Claims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a claim. An existing claim with the same name keeps its position
    /// and has its value replaced.
    pub fn set(&mut self, name: impl Into<String>, value: ClaimValue) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, existing)) => *existing = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }
}

impl Serialize for Claims {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// OpenID Connect discovery document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OidcConfiguration {
    pub issuer: String,
    pub jwks_uri: String,
    pub id_token_signing_alg_values_supported: Vec<String>,
}
