//! Per-route authorization pipeline.
//!
//! A route is configured with three ordered phases:
//!
//! - identity: evaluators tried in order, the first success resolves the caller
//! - authorization: every evaluator must succeed, results are kept by name
//! - response: plugins whose outputs are attached to an allowed response
//!
//! Identity and authorization evaluators are supplied through the
//! [`IdentityEvaluator`] and [`AuthorizationEvaluator`] traits. The response
//! phase is built in: wristband issuance and dynamic JSON objects.

pub mod executor;

use crate::errors::{AuthzError, EvaluationError};
use crate::models::{ClaimTemplate, WristbandConfig};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub use executor::{Decision, Denial, PipelineExecutor, ResponseOutput};

/// HTTP attributes of the request being authorized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpRequestAttributes {
    pub host: String,
    pub method: String,
    pub path: String,
    pub scheme: String,
    pub headers: BTreeMap<String, String>,
}

/// Read access to a pipeline whose identity phase has completed.
pub trait AuthPipeline: Send + Sync {
    /// The identity object resolved by the identity phase.
    fn resolved_identity(&self) -> &Value;

    /// The request context together with identity and authorization results.
    fn authorization_data(&self) -> Value;
}

/// Per-request pipeline state. Discarded once the response is built.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    request: HttpRequestAttributes,
    identity: Value,
    authorization: Map<String, Value>,
}

impl PipelineContext {
    pub fn new(request: HttpRequestAttributes) -> Self {
        Self {
            request,
            identity: Value::Null,
            authorization: Map::new(),
        }
    }

    pub fn request(&self) -> &HttpRequestAttributes {
        &self.request
    }

    pub fn set_identity(&mut self, identity: Value) {
        self.identity = identity;
    }

    pub fn record_authorization(&mut self, name: &str, result: Value) {
        self.authorization.insert(name.to_string(), result);
    }
}

impl AuthPipeline for PipelineContext {
    fn resolved_identity(&self) -> &Value {
        &self.identity
    }

    fn authorization_data(&self) -> Value {
        json!({
            "context": {
                "request": {
                    "http": {
                        "host": self.request.host,
                        "method": self.request.method,
                        "path": self.request.path,
                        "scheme": self.request.scheme,
                        "headers": self.request.headers,
                    }
                }
            },
            "auth": {
                "identity": self.identity,
                "authorization": self.authorization,
            }
        })
    }
}

#[async_trait]
pub trait IdentityEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Resolve the caller's identity from the request.
    async fn evaluate(&self, request: &HttpRequestAttributes) -> Result<Value, EvaluationError>;
}

#[async_trait]
pub trait AuthorizationEvaluator: Send + Sync {
    fn name(&self) -> &str;

    /// Evaluate a policy against the pipeline state gathered so far.
    async fn evaluate(&self, pipeline: &dyn AuthPipeline) -> Result<Value, EvaluationError>;
}

/// Identity evaluator that accepts every request.
#[derive(Debug, Clone)]
pub struct Anonymous {
    name: String,
}

impl Anonymous {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl IdentityEvaluator for Anonymous {
    fn name(&self) -> &str {
        &self.name
    }

    async fn evaluate(&self, _request: &HttpRequestAttributes) -> Result<Value, EvaluationError> {
        Ok(json!({ "anonymous": true }))
    }
}

/// How a response plugin's output is attached to an allowed response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseWrapper {
    /// A header added to the upstream request.
    HttpHeader,
    /// A field of the check response's dynamic metadata.
    EnvoyDynamicMetadata,
}

#[derive(Debug, Clone)]
pub enum ResponseEvaluator {
    Wristband(Arc<WristbandConfig>),
    /// A JSON object whose members are resolved claim templates.
    Json(Vec<ClaimTemplate>),
}

#[derive(Debug, Clone)]
pub struct ResponseConfig {
    pub name: String,
    pub wrapper: ResponseWrapper,
    pub wrapper_key: String,
    pub evaluator: ResponseEvaluator,
}

impl ResponseConfig {
    /// Create a response plugin. An empty or absent wrapper key defaults to
    /// the plugin name.
    pub fn new(
        name: impl Into<String>,
        wrapper: ResponseWrapper,
        wrapper_key: Option<String>,
        evaluator: ResponseEvaluator,
    ) -> Self {
        let name = name.into();
        let wrapper_key = wrapper_key
            .filter(|key| !key.is_empty())
            .unwrap_or_else(|| name.clone());

        Self {
            name,
            wrapper,
            wrapper_key,
            evaluator,
        }
    }
}

/// Immutable configuration of one route.
///
/// Replaced wholesale when the route is reconfigured.
pub struct ServiceConfig {
    name: String,
    identity: Vec<Arc<dyn IdentityEvaluator>>,
    authorization: Vec<Arc<dyn AuthorizationEvaluator>>,
    response: Vec<ResponseConfig>,
}

impl ServiceConfig {
    /// Build a route configuration.
    ///
    /// # Errors
    ///
    /// Returns `AuthzError::Configuration` when response plugin names repeat
    /// or more than one wristband plugin is configured.
    pub fn new(
        name: impl Into<String>,
        identity: Vec<Arc<dyn IdentityEvaluator>>,
        authorization: Vec<Arc<dyn AuthorizationEvaluator>>,
        response: Vec<ResponseConfig>,
    ) -> Result<Self, AuthzError> {
        let name = name.into();

        let mut seen = HashSet::new();
        for plugin in &response {
            if !seen.insert(plugin.name.as_str()) {
                return Err(AuthzError::Configuration(format!(
                    "service '{}' has duplicate response plugin '{}'",
                    name, plugin.name
                )));
            }
        }

        let wristbands = response
            .iter()
            .filter(|plugin| matches!(plugin.evaluator, ResponseEvaluator::Wristband(_)))
            .count();
        if wristbands > 1 {
            return Err(AuthzError::Configuration(format!(
                "service '{}' configures {} wristbands, at most one is allowed",
                name, wristbands
            )));
        }

        Ok(Self {
            name,
            identity,
            authorization,
            response,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &[Arc<dyn IdentityEvaluator>] {
        &self.identity
    }

    pub fn authorization(&self) -> &[Arc<dyn AuthorizationEvaluator>] {
        &self.authorization
    }

    pub fn response(&self) -> &[ResponseConfig] {
        &self.response
    }

    /// The route's wristband issuer configuration, if any.
    pub fn wristband(&self) -> Option<&WristbandConfig> {
        self.response.iter().find_map(|plugin| match &plugin.evaluator {
            ResponseEvaluator::Wristband(config) => Some(config.as_ref()),
            ResponseEvaluator::Json(_) => None,
        })
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("name", &self.name)
            .field(
                "identity",
                &self.identity.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field(
                "authorization",
                &self.authorization.iter().map(|e| e.name()).collect::<Vec<_>>(),
            )
            .field(
                "response",
                &self.response.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            )
            .finish()
    }
}
