//! Builders for Envoy `CheckRequest` messages.

use envoy_types::ext_authz::v3::pb::CheckRequest;
use envoy_types::pb::envoy::service::auth::v3::{attribute_context, AttributeContext};
use std::collections::HashMap;

/// Builder for a check request carrying HTTP attributes.
///
/// Defaults to `GET /` over `http`.
#[derive(Debug, Clone)]
pub struct CheckRequestBuilder {
    host: String,
    method: String,
    path: String,
    scheme: String,
    headers: HashMap<String, String>,
}

impl CheckRequestBuilder {
    pub fn new(host: &str) -> Self {
        Self {
            host: host.to_string(),
            method: "GET".to_string(),
            path: "/".to_string(),
            scheme: "http".to_string(),
            headers: HashMap::new(),
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_string();
        self
    }

    pub fn path(mut self, path: &str) -> Self {
        self.path = path.to_string();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> CheckRequest {
        CheckRequest {
            attributes: Some(AttributeContext {
                request: Some(attribute_context::Request {
                    http: Some(attribute_context::HttpRequest {
                        host: self.host,
                        method: self.method,
                        path: self.path,
                        scheme: self.scheme,
                        headers: self.headers,
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
        }
    }
}
