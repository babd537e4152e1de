//! Scripted pipeline evaluators.

use async_trait::async_trait;
use extauth_service::errors::EvaluationError;
use extauth_service::pipeline::{
    AuthPipeline, AuthorizationEvaluator, HttpRequestAttributes, IdentityEvaluator,
};
use serde_json::Value;

/// Identity evaluator that always resolves to a fixed object.
pub struct StaticIdentity {
    name: String,
    identity: Value,
}

impl StaticIdentity {
    pub fn new(name: &str, identity: Value) -> Self {
        Self {
            name: name.to_string(),
            identity,
        }
    }
}

#[async_trait]
impl IdentityEvaluator for StaticIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _request: &HttpRequestAttributes) -> Result<Value, EvaluationError> {
        Ok(self.identity.clone())
    }
}

/// Identity evaluator that always fails with `reason`.
pub struct FailingIdentity {
    name: String,
    reason: String,
}

impl FailingIdentity {
    pub fn new(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl IdentityEvaluator for FailingIdentity {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _request: &HttpRequestAttributes) -> Result<Value, EvaluationError> {
        Err(EvaluationError(self.reason.clone()))
    }
}

/// Authorization evaluator with a fixed verdict.
pub struct StaticPolicy {
    name: String,
    verdict: Result<Value, EvaluationError>,
}

impl StaticPolicy {
    pub fn allow(name: &str, result: Value) -> Self {
        Self {
            name: name.to_string(),
            verdict: Ok(result),
        }
    }

    pub fn deny(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            verdict: Err(EvaluationError(reason.to_string())),
        }
    }
}

#[async_trait]
impl AuthorizationEvaluator for StaticPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _pipeline: &dyn AuthPipeline) -> Result<Value, EvaluationError> {
        self.verdict.clone()
    }
}
