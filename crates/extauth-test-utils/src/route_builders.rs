//! Builders for route configurations used in tests.

use crate::pipeline_fakes::StaticIdentity;
use extauth_service::crypto::{load_signing_key, SigningKey};
use extauth_service::errors::AuthzError;
use extauth_service::models::{ClaimTemplate, WristbandConfig};
use extauth_service::pipeline::{
    Anonymous, AuthorizationEvaluator, IdentityEvaluator, ResponseConfig, ResponseEvaluator,
    ResponseWrapper, ServiceConfig,
};
use serde_json::Value;
use std::sync::Arc;

/// Load a fixture PEM as a signing key.
pub fn test_signing_key(pem: &str, key_id: &str, algorithm: &str) -> SigningKey {
    load_signing_key(pem.as_bytes(), key_id, algorithm).expect("fixture key must load")
}

/// Builder for a wristband configuration.
pub struct TestWristbandBuilder {
    issuer: String,
    claims: Vec<ClaimTemplate>,
    duration: Option<i64>,
    keys: Vec<SigningKey>,
}

impl TestWristbandBuilder {
    pub fn new(issuer: &str) -> Self {
        Self {
            issuer: issuer.to_string(),
            claims: Vec::new(),
            duration: None,
            keys: Vec::new(),
        }
    }

    pub fn static_claim(mut self, name: &str, value: &str) -> Self {
        self.claims.push(ClaimTemplate::static_value(name, value));
        self
    }

    pub fn json_claim(mut self, name: &str, path: &str) -> Self {
        self.claims.push(ClaimTemplate::from_json(name, path));
        self
    }

    pub fn duration(mut self, seconds: i64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn key(mut self, key: SigningKey) -> Self {
        self.keys.push(key);
        self
    }

    pub fn build(self) -> Result<WristbandConfig, AuthzError> {
        WristbandConfig::new(self.issuer, self.claims, self.duration, self.keys)
    }
}

/// Builder for a service configuration.
pub struct TestServiceBuilder {
    name: String,
    identity: Vec<Arc<dyn IdentityEvaluator>>,
    authorization: Vec<Arc<dyn AuthorizationEvaluator>>,
    response: Vec<ResponseConfig>,
}

impl TestServiceBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            identity: Vec::new(),
            authorization: Vec::new(),
            response: Vec::new(),
        }
    }

    pub fn anonymous(self) -> Self {
        self.identity(Arc::new(Anonymous::new("anonymous")))
    }

    pub fn static_identity(self, identity: Value) -> Self {
        self.identity(Arc::new(StaticIdentity::new("static", identity)))
    }

    pub fn identity(mut self, evaluator: Arc<dyn IdentityEvaluator>) -> Self {
        self.identity.push(evaluator);
        self
    }

    pub fn authorization(mut self, evaluator: Arc<dyn AuthorizationEvaluator>) -> Self {
        self.authorization.push(evaluator);
        self
    }

    /// Attach a wristband as the `x-ext-auth-wristband` header.
    pub fn wristband(mut self, wristband: WristbandConfig) -> Self {
        self.response.push(ResponseConfig::new(
            "wristband",
            ResponseWrapper::HttpHeader,
            Some("x-ext-auth-wristband".to_string()),
            ResponseEvaluator::Wristband(Arc::new(wristband)),
        ));
        self
    }

    pub fn json_response(
        mut self,
        name: &str,
        wrapper: ResponseWrapper,
        properties: Vec<ClaimTemplate>,
    ) -> Self {
        self.response.push(ResponseConfig::new(
            name,
            wrapper,
            None,
            ResponseEvaluator::Json(properties),
        ));
        self
    }

    pub fn build(self) -> Result<ServiceConfig, AuthzError> {
        ServiceConfig::new(self.name, self.identity, self.authorization, self.response)
    }
}
