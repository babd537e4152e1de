//! End-to-end tests for the external authorization gRPC listener.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use envoy_types::ext_authz::v3::pb::{CheckRequest, CheckResponse};
use envoy_types::pb::envoy::service::auth::v3::authorization_client::AuthorizationClient;
use envoy_types::pb::envoy::service::auth::v3::check_response::HttpResponse;
use envoy_types::pb::google::protobuf::value::Kind;
use extauth_service::models::ClaimTemplate;
use extauth_service::pipeline::ResponseWrapper;
use extauth_test_utils::{
    test_signing_key, CheckRequestBuilder, FailingIdentity, StaticPolicy, TestExtAuthServer,
    TestServiceBuilder, TestWristbandBuilder, EC_P256_PRIVATE_KEY_PEM,
};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use std::sync::Arc;
use tonic_health::pb::health_check_response::ServingStatus;
use tonic_health::pb::health_client::HealthClient;
use tonic_health::pb::HealthCheckRequest;

const WRISTBAND_HEADER: &str = "x-ext-auth-wristband";

fn unverified_claims(token: &str) -> Value {
    let payload = token.split('.').nth(1).unwrap();
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(payload).unwrap()).unwrap()
}

async fn check(server: &TestExtAuthServer, request: CheckRequest) -> CheckResponse {
    let channel = tonic::transport::Endpoint::new(server.grpc_url())
        .unwrap()
        .connect()
        .await
        .unwrap();
    let mut client = AuthorizationClient::new(channel);
    client.check(request).await.unwrap().into_inner()
}

fn ok_headers(response: &CheckResponse) -> Vec<(String, String)> {
    match response.http_response.as_ref() {
        Some(HttpResponse::OkResponse(ok)) => ok
            .headers
            .iter()
            .filter_map(|option| option.header.as_ref())
            .map(|h| (h.key.clone(), h.value.clone()))
            .collect(),
        other => panic!("expected ok response, got {:?}", other),
    }
}

fn denied_status(response: &CheckResponse) -> i32 {
    match response.http_response.as_ref() {
        Some(HttpResponse::DeniedResponse(denied)) => denied.status.as_ref().unwrap().code,
        other => panic!("expected denied response, got {:?}", other),
    }
}

#[tokio::test]
async fn test_health_service_reports_serving() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    let channel = tonic::transport::Endpoint::new(server.grpc_url())?
        .connect()
        .await?;
    let mut client = HealthClient::new(channel);

    let response = client
        .check(HealthCheckRequest {
            service: "envoy.service.auth.v3.Authorization".to_string(),
        })
        .await?
        .into_inner();

    assert_eq!(response.status, ServingStatus::Serving as i32);
    Ok(())
}

#[tokio::test]
async fn test_wristband_is_issued_and_verifiable() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    let wristband = TestWristbandBuilder::new("https://talker-api.example.com")
        .static_claim("aud", "internal")
        .json_claim("email", "auth.identity.email")
        .duration(60)
        .key(test_signing_key(EC_P256_PRIVATE_KEY_PEM, "k1", "ES256"))
        .build()?;
    server
        .configure(
            "talker-api",
            TestServiceBuilder::new("talker")
                .static_identity(json!({"email": "alice@example.com", "name": "Alice"}))
                .wristband(wristband)
                .build()?,
        )
        .await;

    let response = check(&server, CheckRequestBuilder::new("talker-api").path("/hello").build()).await;
    assert_eq!(response.status.as_ref().unwrap().code, tonic::Code::Ok as i32);

    let token = ok_headers(&response)
        .into_iter()
        .find(|(key, _)| key == WRISTBAND_HEADER)
        .map(|(_, value)| value)
        .expect("wristband header must be present");

    let header = decode_header(&token)?;
    assert_eq!(header.alg, Algorithm::ES256);
    assert_eq!(header.kid.as_deref(), Some("k1"));

    // Verify against the key set published on the metadata listener
    let jwks: JwkSet = reqwest::Client::new()
        .get(format!("{}/.well-known/openid-connect/certs", server.http_url()))
        .header(reqwest::header::HOST, "talker-api")
        .send()
        .await?
        .json()
        .await?;
    let jwk = jwks.find("k1").expect("signing key must be published");

    let mut validation = Validation::new(Algorithm::ES256);
    validation.set_issuer(&["https://talker-api.example.com"]);
    validation.set_audience(&["internal"]);
    let claims = decode::<Value>(&token, &DecodingKey::from_jwk(jwk)?, &validation)?.claims;

    assert_eq!(claims["iss"], "https://talker-api.example.com");
    assert_eq!(claims["email"], "alice@example.com");
    assert_eq!(claims["aud"], "internal");
    assert_eq!(claims["exp"].as_i64().unwrap() - claims["iat"].as_i64().unwrap(), 60);
    assert_eq!(claims["sub"].as_str().unwrap().len(), 64);
    Ok(())
}

#[tokio::test]
async fn test_same_identity_yields_same_subject() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    let wristband = || {
        TestWristbandBuilder::new("https://issuer")
            .key(test_signing_key(EC_P256_PRIVATE_KEY_PEM, "k1", "ES256"))
            .build()
    };

    // Same identity, members in different order
    server
        .configure(
            "a",
            TestServiceBuilder::new("a")
                .static_identity(json!({"user": "alice", "groups": ["x"]}))
                .wristband(wristband()?)
                .build()?,
        )
        .await;
    server
        .configure(
            "b",
            TestServiceBuilder::new("b")
                .static_identity(json!({"groups": ["x"], "user": "alice"}))
                .wristband(wristband()?)
                .build()?,
        )
        .await;

    let mut subjects = Vec::new();
    for host in ["a", "b"] {
        let response = check(&server, CheckRequestBuilder::new(host).build()).await;
        let (_, token) = ok_headers(&response).remove(0);
        let claims = unverified_claims(&token);
        subjects.push(claims["sub"].as_str().unwrap().to_string());
    }

    assert_eq!(subjects[0], subjects[1]);
    Ok(())
}

#[tokio::test]
async fn test_unknown_host_is_not_found() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;

    let response = check(&server, CheckRequestBuilder::new("unknown-api").build()).await;

    assert_eq!(response.status.as_ref().unwrap().code, tonic::Code::NotFound as i32);
    assert_eq!(denied_status(&response), 404);
    Ok(())
}

#[tokio::test]
async fn test_failed_identity_is_unauthenticated() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    server
        .configure(
            "talker-api",
            TestServiceBuilder::new("talker")
                .identity(Arc::new(FailingIdentity::new("api-key", "credential not found")))
                .build()?,
        )
        .await;

    let response = check(&server, CheckRequestBuilder::new("talker-api").build()).await;

    assert_eq!(
        response.status.as_ref().unwrap().code,
        tonic::Code::Unauthenticated as i32
    );
    assert_eq!(denied_status(&response), 401);
    Ok(())
}

#[tokio::test]
async fn test_denied_policy_is_permission_denied() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    server
        .configure(
            "talker-api",
            TestServiceBuilder::new("talker")
                .anonymous()
                .authorization(Arc::new(StaticPolicy::deny("acl", "not allowed")))
                .build()?,
        )
        .await;

    let response = check(&server, CheckRequestBuilder::new("talker-api").build()).await;

    assert_eq!(
        response.status.as_ref().unwrap().code,
        tonic::Code::PermissionDenied as i32
    );
    assert_eq!(denied_status(&response), 403);
    Ok(())
}

#[tokio::test]
async fn test_json_response_as_dynamic_metadata() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    server
        .configure(
            "talker-api",
            TestServiceBuilder::new("talker")
                .static_identity(json!({"user": "alice"}))
                .authorization(Arc::new(StaticPolicy::allow("acl", json!({"role": "admin"}))))
                .json_response(
                    "ext-auth-data",
                    ResponseWrapper::EnvoyDynamicMetadata,
                    vec![
                        ClaimTemplate::from_json("user", "auth.identity.user"),
                        ClaimTemplate::from_json("role", "auth.authorization.acl.role"),
                        ClaimTemplate::from_json("method", "context.request.http.method"),
                    ],
                )
                .build()?,
        )
        .await;

    let response = check(
        &server,
        CheckRequestBuilder::new("talker-api").method("POST").build(),
    )
    .await;

    let metadata = response.dynamic_metadata.expect("dynamic metadata must be set");
    let Some(Kind::StructValue(data)) = metadata.fields["ext-auth-data"].kind.clone() else {
        panic!("expected struct metadata");
    };
    let field = |name: &str| data.fields[name].kind.clone();
    assert_eq!(field("user"), Some(Kind::StringValue("alice".to_string())));
    assert_eq!(field("role"), Some(Kind::StringValue("admin".to_string())));
    assert_eq!(field("method"), Some(Kind::StringValue("POST".to_string())));
    Ok(())
}
