use crate::pipeline::{
    AuthPipeline, HttpRequestAttributes, PipelineContext, ResponseEvaluator, ResponseWrapper,
    ServiceConfig,
};
use crate::observability::hash_for_correlation;
use crate::services::{ClaimResolver, WristbandIssuer};
use serde_json::Value;
use tracing::instrument;

/// Why a request was denied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Denial {
    /// No identity evaluator resolved the caller.
    Unauthenticated(String),
    /// An authorization evaluator rejected the request.
    PermissionDenied(String),
}

impl Denial {
    pub fn reason(&self) -> &str {
        match self {
            Denial::Unauthenticated(reason) | Denial::PermissionDenied(reason) => reason,
        }
    }
}

/// Output of one successful response plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOutput {
    pub name: String,
    pub wrapper: ResponseWrapper,
    pub wrapper_key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Allow(Vec<ResponseOutput>),
    Deny(Denial),
}

/// Runs a route's pipeline for one request.
#[derive(Clone, Default)]
pub struct PipelineExecutor {
    issuer: WristbandIssuer,
    resolver: ClaimResolver,
}

impl PipelineExecutor {
    pub fn new(resolver: ClaimResolver) -> Self {
        Self {
            issuer: WristbandIssuer::new(resolver.clone()),
            resolver,
        }
    }

    #[instrument(skip_all, target = "extauth.grpc", fields(service = %service.name()))]
    pub async fn execute(&self, service: &ServiceConfig, request: HttpRequestAttributes) -> Decision {
        let mut ctx = PipelineContext::new(request);

        let mut identity = None;
        let mut last_error = None;
        for evaluator in service.identity() {
            match evaluator.evaluate(ctx.request()).await {
                Ok(resolved) => {
                    tracing::debug!(target: "extauth.grpc", evaluator = %evaluator.name(), "Identity resolved");
                    identity = Some(resolved);
                    break;
                }
                Err(e) => {
                    tracing::debug!(target: "extauth.grpc", evaluator = %evaluator.name(), error = %e, "Identity evaluator failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        let Some(identity) = identity else {
            return Decision::Deny(Denial::Unauthenticated(
                last_error.unwrap_or_else(|| "no identity source configured".to_string()),
            ));
        };
        ctx.set_identity(identity);

        for evaluator in service.authorization() {
            match evaluator.evaluate(&ctx).await {
                Ok(result) => ctx.record_authorization(evaluator.name(), result),
                Err(e) => {
                    tracing::debug!(target: "extauth.grpc", evaluator = %evaluator.name(), error = %e, "Authorization evaluator denied");
                    return Decision::Deny(Denial::PermissionDenied(e.to_string()));
                }
            }
        }

        Decision::Allow(self.run_response_phase(service, &ctx))
    }

    /// Evaluate response plugins in order. A failing plugin is skipped.
    fn run_response_phase(&self, service: &ServiceConfig, ctx: &PipelineContext) -> Vec<ResponseOutput> {
        let mut outputs = Vec::with_capacity(service.response().len());
        let mut data: Option<Value> = None;

        for plugin in service.response() {
            let value = match &plugin.evaluator {
                ResponseEvaluator::Wristband(config) => match self.issuer.issue(ctx, config) {
                    Ok(token) => {
                        tracing::debug!(
                            target: "extauth.wristband",
                            plugin = %plugin.name,
                            token = %hash_for_correlation(&token),
                            "Wristband issued"
                        );
                        Value::String(token)
                    }
                    Err(e) => {
                        tracing::warn!(
                            target: "extauth.wristband",
                            plugin = %plugin.name,
                            error = %e,
                            "Wristband issuance failed, omitting from response"
                        );
                        continue;
                    }
                },
                ResponseEvaluator::Json(properties) => {
                    let data = data.get_or_insert_with(|| ctx.authorization_data());
                    self.resolver.resolve_object(properties, data)
                }
            };

            outputs.push(ResponseOutput {
                name: plugin.name.clone(),
                wrapper: plugin.wrapper,
                wrapper_key: plugin.wrapper_key.clone(),
                value,
            });
        }

        outputs
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use crate::crypto::load_signing_key;
    use crate::errors::EvaluationError;
    use crate::models::{ClaimTemplate, WristbandConfig};
    use crate::pipeline::{
        Anonymous, AuthorizationEvaluator, IdentityEvaluator, ResponseConfig,
    };
    use async_trait::async_trait;
    use extauth_test_utils::crypto_fixtures::{EC_P256_PRIVATE_KEY_PEM, RSA_PRIVATE_KEY_PEM};
    use serde_json::json;
    use std::sync::Arc;

    struct Failing(&'static str);

    #[async_trait]
    impl IdentityEvaluator for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn evaluate(&self, _request: &HttpRequestAttributes) -> Result<Value, EvaluationError> {
            Err(EvaluationError(self.0.to_string()))
        }
    }

    struct HeaderIdentity;

    #[async_trait]
    impl IdentityEvaluator for HeaderIdentity {
        fn name(&self) -> &str {
            "header"
        }

        async fn evaluate(&self, request: &HttpRequestAttributes) -> Result<Value, EvaluationError> {
            request
                .headers
                .get("x-user")
                .map(|user| json!({ "user": user }))
                .ok_or_else(|| EvaluationError("missing x-user".to_string()))
        }
    }

    struct RequireUser(&'static str);

    #[async_trait]
    impl AuthorizationEvaluator for RequireUser {
        fn name(&self) -> &str {
            "require-user"
        }

        async fn evaluate(&self, pipeline: &dyn AuthPipeline) -> Result<Value, EvaluationError> {
            if pipeline.resolved_identity()["user"] == self.0 {
                Ok(json!({ "allowed": true }))
            } else {
                Err(EvaluationError("user not allowed".to_string()))
            }
        }
    }

    fn request(user: Option<&str>) -> HttpRequestAttributes {
        let mut request = HttpRequestAttributes {
            host: "talker-api".to_string(),
            method: "GET".to_string(),
            path: "/hello".to_string(),
            scheme: "http".to_string(),
            ..Default::default()
        };
        if let Some(user) = user {
            request.headers.insert("x-user".to_string(), user.to_string());
        }
        request
    }

    fn wristband(pem: &str, alg: &str) -> ResponseConfig {
        let key = load_signing_key(pem.as_bytes(), "k1", alg).unwrap();
        let config = WristbandConfig::new(
            "https://example.com",
            vec![ClaimTemplate::from_json("user", "auth.identity.user")],
            Some(60),
            vec![key],
        )
        .unwrap();
        ResponseConfig::new(
            "wristband",
            ResponseWrapper::HttpHeader,
            Some("x-wristband".to_string()),
            ResponseEvaluator::Wristband(Arc::new(config)),
        )
    }

    fn json_plugin() -> ResponseConfig {
        ResponseConfig::new(
            "ext-auth-data",
            ResponseWrapper::EnvoyDynamicMetadata,
            None,
            ResponseEvaluator::Json(vec![
                ClaimTemplate::from_json("user", "auth.identity.user"),
                ClaimTemplate::from_json("allowed", "auth.authorization.require-user.allowed"),
                ClaimTemplate::from_json("path", "context.request.http.path"),
            ]),
        )
    }

    #[tokio::test]
    async fn test_no_identity_evaluators_denies() {
        let service = ServiceConfig::new("svc", vec![], vec![], vec![]).unwrap();
        let decision = PipelineExecutor::default().execute(&service, request(None)).await;
        assert!(matches!(decision, Decision::Deny(Denial::Unauthenticated(_))));
    }

    #[tokio::test]
    async fn test_first_successful_identity_wins() {
        let service = ServiceConfig::new(
            "svc",
            vec![Arc::new(Failing("bad credentials")), Arc::new(HeaderIdentity), Arc::new(Anonymous::new("anon"))],
            vec![],
            vec![ResponseConfig::new(
                "identity",
                ResponseWrapper::HttpHeader,
                None,
                ResponseEvaluator::Json(vec![ClaimTemplate::from_json("who", "auth.identity")]),
            )],
        )
        .unwrap();

        let decision = PipelineExecutor::default().execute(&service, request(Some("bob"))).await;
        let Decision::Allow(outputs) = decision else {
            panic!("expected allow");
        };
        assert_eq!(outputs[0].value, json!({"who": r#"{"user":"bob"}"#}));
    }

    #[tokio::test]
    async fn test_all_identity_failures_deny_with_last_reason() {
        let service = ServiceConfig::new(
            "svc",
            vec![Arc::new(Failing("expired")), Arc::new(HeaderIdentity)],
            vec![],
            vec![],
        )
        .unwrap();

        let decision = PipelineExecutor::default().execute(&service, request(None)).await;
        assert_eq!(
            decision,
            Decision::Deny(Denial::Unauthenticated("missing x-user".to_string()))
        );
    }

    #[tokio::test]
    async fn test_authorization_failure_denies() {
        let service = ServiceConfig::new(
            "svc",
            vec![Arc::new(HeaderIdentity)],
            vec![Arc::new(RequireUser("alice"))],
            vec![wristband(RSA_PRIVATE_KEY_PEM, "RS256")],
        )
        .unwrap();

        let decision = PipelineExecutor::default().execute(&service, request(Some("bob"))).await;
        assert_eq!(
            decision,
            Decision::Deny(Denial::PermissionDenied("user not allowed".to_string()))
        );
    }

    #[tokio::test]
    async fn test_allow_runs_all_response_plugins() {
        let service = ServiceConfig::new(
            "svc",
            vec![Arc::new(HeaderIdentity)],
            vec![Arc::new(RequireUser("alice"))],
            vec![wristband(RSA_PRIVATE_KEY_PEM, "RS256"), json_plugin()],
        )
        .unwrap();

        let decision = PipelineExecutor::default().execute(&service, request(Some("alice"))).await;
        let Decision::Allow(outputs) = decision else {
            panic!("expected allow");
        };

        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].wrapper_key, "x-wristband");
        assert!(outputs[0].value.as_str().is_some_and(|t| t.split('.').count() == 3));
        assert_eq!(outputs[1].wrapper_key, "ext-auth-data");
        assert_eq!(
            outputs[1].value,
            json!({"user": "alice", "allowed": "true", "path": "/hello"})
        );
    }

    #[tokio::test]
    async fn test_wristband_failure_keeps_allow_and_other_plugins() {
        let service = ServiceConfig::new(
            "svc",
            vec![Arc::new(HeaderIdentity)],
            vec![Arc::new(RequireUser("alice"))],
            // EC key configured with an RSA algorithm fails at signing time
            vec![wristband(EC_P256_PRIVATE_KEY_PEM, "RS256"), json_plugin()],
        )
        .unwrap();

        let decision = PipelineExecutor::default().execute(&service, request(Some("alice"))).await;
        let Decision::Allow(outputs) = decision else {
            panic!("expected allow");
        };
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "ext-auth-data");
    }
}
