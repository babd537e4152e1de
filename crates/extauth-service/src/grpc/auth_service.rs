//! External authorization check service.
//!
//! Every check resolves the route by the request host, runs the route's
//! pipeline and translates the decision into a `CheckResponse`. Denials are
//! carried in the response body, never as a gRPC error.

use crate::cache::{lookup_host, RouteCache};
use crate::observability::metrics::record_check_decision;
use crate::pipeline::{
    Decision, Denial, HttpRequestAttributes, PipelineExecutor, ResponseOutput, ResponseWrapper,
};
use envoy_types::ext_authz::v3::pb::{Authorization, CheckRequest, CheckResponse};
use envoy_types::ext_authz::v3::CheckResponseExt;
use envoy_types::pb::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use envoy_types::pb::envoy::r#type::v3::{HttpStatus, StatusCode};
use envoy_types::pb::envoy::service::auth::v3::{
    check_response, DeniedHttpResponse, OkHttpResponse,
};
use envoy_types::pb::google::protobuf::{value::Kind, ListValue, Struct, Value as ProtoValue};
use serde_json::Value;
use std::sync::Arc;
use tonic::{Request, Response, Status};
use tracing::instrument;

/// Header carrying the reason of a denial.
pub const DENIAL_REASON_HEADER: &str = "x-ext-auth-reason";

/// Envoy `Authorization` service backed by the route cache.
#[derive(Clone)]
pub struct AuthService {
    cache: Arc<dyn RouteCache>,
    executor: PipelineExecutor,
}

impl AuthService {
    pub fn new(cache: Arc<dyn RouteCache>, executor: PipelineExecutor) -> Self {
        Self { cache, executor }
    }

    /// Evaluate one check request.
    #[instrument(skip_all, target = "extauth.grpc", fields(host, decision))]
    pub async fn evaluate(&self, request: CheckRequest) -> CheckResponse {
        let Some(attributes) = http_attributes(&request) else {
            return self.deny(
                "invalid",
                Status::invalid_argument("missing request attributes"),
                StatusCode::BadRequest,
                "missing request attributes",
            );
        };

        tracing::Span::current().record("host", attributes.host.as_str());

        let Some(service) = lookup_host(self.cache.as_ref(), &attributes.host).await else {
            tracing::debug!(target: "extauth.grpc", host = %attributes.host, "No route configured for host");
            return self.deny(
                "not_found",
                Status::not_found("service not found"),
                StatusCode::NotFound,
                "service not found",
            );
        };

        match self.executor.execute(&service, attributes).await {
            Decision::Allow(outputs) => {
                tracing::Span::current().record("decision", "allow");
                record_check_decision("allow");
                ok_response(&outputs)
            }
            Decision::Deny(denial) => {
                let (status, http_status) = match &denial {
                    Denial::Unauthenticated(reason) => {
                        (Status::unauthenticated(reason.as_str()), StatusCode::Unauthorized)
                    }
                    Denial::PermissionDenied(reason) => {
                        (Status::permission_denied(reason.as_str()), StatusCode::Forbidden)
                    }
                };
                self.deny("deny", status, http_status, denial.reason())
            }
        }
    }

    fn deny(
        &self,
        decision: &'static str,
        status: Status,
        http_status: StatusCode,
        reason: &str,
    ) -> CheckResponse {
        tracing::Span::current().record("decision", decision);
        record_check_decision(decision);
        denied_response(status, http_status, reason)
    }
}

#[tonic::async_trait]
impl Authorization for AuthService {
    async fn check(&self, request: Request<CheckRequest>) -> Result<Response<CheckResponse>, Status> {
        Ok(Response::new(self.evaluate(request.into_inner()).await))
    }
}

/// Extract the HTTP attributes of a check request.
fn http_attributes(request: &CheckRequest) -> Option<HttpRequestAttributes> {
    let http = request.attributes.as_ref()?.request.as_ref()?.http.as_ref()?;

    let host = if http.host.is_empty() {
        http.headers.get(":authority").or_else(|| http.headers.get("host"))?.clone()
    } else {
        http.host.clone()
    };

    Some(HttpRequestAttributes {
        host,
        method: http.method.clone(),
        path: http.path.clone(),
        scheme: http.scheme.clone(),
        headers: http
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    })
}

fn ok_response(outputs: &[ResponseOutput]) -> CheckResponse {
    let mut headers = Vec::new();
    let mut metadata = Vec::new();

    for output in outputs {
        match output.wrapper {
            ResponseWrapper::HttpHeader => {
                let value = match &output.value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                headers.push(header(&output.wrapper_key, value));
            }
            ResponseWrapper::EnvoyDynamicMetadata => {
                metadata.push((output.wrapper_key.clone(), to_proto_value(&output.value)));
            }
        }
    }

    let mut response = CheckResponse::with_status(Status::ok(""));
    response.http_response = Some(check_response::HttpResponse::OkResponse(OkHttpResponse {
        headers,
        ..Default::default()
    }));
    if !metadata.is_empty() {
        response.dynamic_metadata = Some(Struct {
            fields: metadata.into_iter().collect(),
        });
    }
    response
}

fn denied_response(status: Status, http_status: StatusCode, reason: &str) -> CheckResponse {
    let mut response = CheckResponse::with_status(status);
    response.http_response = Some(check_response::HttpResponse::DeniedResponse(
        DeniedHttpResponse {
            status: Some(HttpStatus {
                code: http_status as i32,
            }),
            headers: vec![header(DENIAL_REASON_HEADER, header_safe(reason))],
            ..Default::default()
        },
    ));
    response
}

/// Replace everything outside visible ASCII and space, so evaluator-supplied
/// text cannot break or inject response headers.
fn header_safe(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ' ' || c.is_ascii_graphic() { c } else { ' ' })
        .collect()
}

fn header(key: &str, value: String) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key: key.to_string(),
            value,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Convert a JSON value into a protobuf `Value`.
fn to_proto_value(value: &Value) -> ProtoValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => Kind::NumberValue(n.as_f64().unwrap_or_default()),
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(to_proto_value).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), to_proto_value(v)))
                .collect(),
        }),
    };

    ProtoValue { kind: Some(kind) }
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
    use crate::cache::InMemoryRouteCache;
    use crate::pipeline::{Anonymous, ServiceConfig};
    use envoy_types::pb::envoy::service::auth::v3::{attribute_context, AttributeContext};
    use serde_json::json;

    fn check_request(host: &str) -> CheckRequest {
        CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(attribute_context::Request {
                    http: Some(attribute_context::HttpRequest {
                        host: host.to_string(),
                        method: "GET".to_string(),
                        path: "/hello".to_string(),
                        scheme: "http".to_string(),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }

    fn denied(response: &CheckResponse) -> &DeniedHttpResponse {
        match response.http_response.as_ref() {
            Some(check_response::HttpResponse::DeniedResponse(denied)) => denied,
            other => panic!("expected denied response, got {:?}", other),
        }
    }

    async fn service_with(host: &str, config: ServiceConfig) -> AuthService {
        let cache = Arc::new(InMemoryRouteCache::new());
        cache.set(host, Arc::new(config)).await;
        AuthService::new(cache, PipelineExecutor::default())
    }

    #[tokio::test]
    async fn test_unknown_host_is_not_found() {
        let service = AuthService::new(
            Arc::new(InMemoryRouteCache::new()),
            PipelineExecutor::default(),
        );
        let response = service.evaluate(check_request("unknown")).await;

        assert_eq!(response.status.as_ref().unwrap().code, tonic::Code::NotFound as i32);
        assert_eq!(denied(&response).status.as_ref().unwrap().code, 404);
    }

    #[tokio::test]
    async fn test_missing_attributes_is_invalid_argument() {
        let service = AuthService::new(
            Arc::new(InMemoryRouteCache::new()),
            PipelineExecutor::default(),
        );
        let response = service.evaluate(CheckRequest::default()).await;

        assert_eq!(
            response.status.as_ref().unwrap().code,
            tonic::Code::InvalidArgument as i32
        );
        assert_eq!(denied(&response).status.as_ref().unwrap().code, 400);
    }

    #[tokio::test]
    async fn test_no_identity_is_unauthenticated_with_reason() {
        let service = service_with(
            "talker-api",
            ServiceConfig::new("talker", vec![], vec![], vec![]).unwrap(),
        )
        .await;
        let response = service.evaluate(check_request("talker-api")).await;

        assert_eq!(
            response.status.as_ref().unwrap().code,
            tonic::Code::Unauthenticated as i32
        );
        let denied = denied(&response);
        assert_eq!(denied.status.as_ref().unwrap().code, 401);
        let reason = denied.headers[0].header.as_ref().unwrap();
        assert_eq!(reason.key, DENIAL_REASON_HEADER);
        assert!(!reason.value.is_empty());
    }

    #[test]
    fn test_denial_reason_is_made_header_safe() {
        let response = denied_response(
            Status::permission_denied("denied"),
            StatusCode::Forbidden,
            "bad\r\nx-injected: 1\tcaf\u{e9}\u{7f}",
        );

        let reason = denied(&response).headers[0].header.as_ref().unwrap();
        assert_eq!(reason.value, "bad  x-injected: 1 caf  ");
        assert!(reason.value.chars().all(|c| (' '..='~').contains(&c)));
    }

    #[test]
    fn test_plain_denial_reason_is_unchanged() {
        let response = denied_response(
            Status::unauthenticated("no identity"),
            StatusCode::Unauthorized,
            "no identity source succeeded",
        );

        let reason = denied(&response).headers[0].header.as_ref().unwrap();
        assert_eq!(reason.value, "no identity source succeeded");
    }

    #[tokio::test]
    async fn test_allowed_request_with_port_in_host() {
        let service = service_with(
            "talker-api",
            ServiceConfig::new("talker", vec![Arc::new(Anonymous::new("anon"))], vec![], vec![])
                .unwrap(),
        )
        .await;
        let response = service.evaluate(check_request("talker-api:8000")).await;

        assert_eq!(response.status.as_ref().unwrap().code, tonic::Code::Ok as i32);
        assert!(matches!(
            response.http_response,
            Some(check_response::HttpResponse::OkResponse(_))
        ));
        assert!(response.dynamic_metadata.is_none());
    }

    #[test]
    fn test_ok_response_wraps_outputs() {
        let outputs = vec![
            ResponseOutput {
                name: "wristband".to_string(),
                wrapper: ResponseWrapper::HttpHeader,
                wrapper_key: "x-wristband".to_string(),
                value: json!("a.b.c"),
            },
            ResponseOutput {
                name: "data".to_string(),
                wrapper: ResponseWrapper::HttpHeader,
                wrapper_key: "x-data".to_string(),
                value: json!({"user": "alice"}),
            },
            ResponseOutput {
                name: "meta".to_string(),
                wrapper: ResponseWrapper::EnvoyDynamicMetadata,
                wrapper_key: "ext-auth-data".to_string(),
                value: json!({"user": "alice", "groups": ["a"]}),
            },
        ];

        let response = ok_response(&outputs);
        let Some(check_response::HttpResponse::OkResponse(ok)) = response.http_response else {
            panic!("expected ok response");
        };

        let headers: Vec<_> = ok
            .headers
            .iter()
            .map(|h| {
                let h = h.header.as_ref().unwrap();
                (h.key.as_str(), h.value.as_str())
            })
            .collect();
        assert_eq!(
            headers,
            vec![("x-wristband", "a.b.c"), ("x-data", r#"{"user":"alice"}"#)]
        );

        let metadata = response.dynamic_metadata.unwrap();
        let Some(Kind::StructValue(data)) = metadata.fields["ext-auth-data"].kind.clone() else {
            panic!("expected struct metadata");
        };
        assert_eq!(
            data.fields["user"].kind,
            Some(Kind::StringValue("alice".to_string()))
        );
        assert!(matches!(data.fields["groups"].kind, Some(Kind::ListValue(_))));
    }
}
