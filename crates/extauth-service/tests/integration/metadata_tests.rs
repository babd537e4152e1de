//! Integration tests for the OIDC metadata listener.

use extauth_test_utils::{
    test_signing_key, TestExtAuthServer, TestServiceBuilder, TestWristbandBuilder,
    EC_P256_PRIVATE_KEY_PEM, EC_P521_PRIVATE_KEY_PEM, RSA_PRIVATE_KEY_PEM, RSA_SECONDARY_KEY_PEM,
};
use reqwest::{header, StatusCode};
use serde_json::Value;

const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";
const JWKS_PATH: &str = "/.well-known/openid-connect/certs";

async fn server_with_wristband() -> Result<TestExtAuthServer, anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;

    let wristband = TestWristbandBuilder::new("https://talker-api.example.com")
        .key(test_signing_key(EC_P256_PRIVATE_KEY_PEM, "ec-key", "ES256"))
        .key(test_signing_key(RSA_PRIVATE_KEY_PEM, "rsa-key", "RS256"))
        .build()?;
    server
        .configure(
            "talker-api",
            TestServiceBuilder::new("talker")
                .anonymous()
                .wristband(wristband)
                .build()?,
        )
        .await;
    server
        .configure("plain-api", TestServiceBuilder::new("plain").anonymous().build()?)
        .await;

    Ok(server)
}

async fn get(
    server: &TestExtAuthServer,
    path: &str,
    host: &str,
) -> Result<reqwest::Response, anyhow::Error> {
    Ok(reqwest::Client::new()
        .get(format!("{}{}", server.http_url(), path))
        .header(header::HOST, host)
        .send()
        .await?)
}

#[tokio::test]
async fn test_health_endpoint_returns_ok() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;

    let response = reqwest::get(format!("{}/health", server.http_url())).await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, "OK");
    Ok(())
}

#[tokio::test]
async fn test_discovery_document_for_host() -> Result<(), anyhow::Error> {
    let server = server_with_wristband().await?;

    let response = get(&server, DISCOVERY_PATH, "talker-api:8003").await?;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).map(|v| v.as_bytes()),
        Some(b"max-age=300".as_slice())
    );

    let body: Value = response.json().await?;
    assert_eq!(body["issuer"], "https://talker-api.example.com");
    assert_eq!(
        body["jwks_uri"],
        "https://talker-api.example.com/.well-known/openid-connect/certs"
    );

    let algorithms: Vec<&str> = body["id_token_signing_alg_values_supported"]
        .as_array()
        .map(|values| values.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    assert!(algorithms.contains(&"ES256"));
    assert!(algorithms.contains(&"RS256"));
    Ok(())
}

#[tokio::test]
async fn test_jwks_lists_keys_in_configured_order() -> Result<(), anyhow::Error> {
    let server = server_with_wristband().await?;

    let response = get(&server, JWKS_PATH, "talker-api").await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    let keys = body["keys"].as_array().cloned().unwrap_or_default();
    assert_eq!(keys.len(), 2);

    assert_eq!(keys[0]["kid"], "ec-key");
    assert_eq!(keys[0]["kty"], "EC");
    assert_eq!(keys[0]["alg"], "ES256");
    assert!(keys[0].get("d").is_none(), "private scalar must never be published");

    assert_eq!(keys[1]["kid"], "rsa-key");
    assert_eq!(keys[1]["kty"], "RSA");
    assert_eq!(keys[1]["e"], "AQAB");
    Ok(())
}

#[tokio::test]
async fn test_unknown_host_and_host_without_wristband_are_not_found() -> Result<(), anyhow::Error> {
    let server = server_with_wristband().await?;

    for host in ["unknown-api", "plain-api"] {
        for path in [DISCOVERY_PATH, JWKS_PATH] {
            let response = get(&server, path, host).await?;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{} {}", host, path);

            let body: Value = response.json().await?;
            assert_eq!(body["error"]["code"], "NOT_FOUND");
        }
    }
    Ok(())
}

#[tokio::test]
async fn test_non_get_is_rejected() -> Result<(), anyhow::Error> {
    let server = server_with_wristband().await?;

    let response = reqwest::Client::new()
        .post(format!("{}{}", server.http_url(), JWKS_PATH))
        .header(header::HOST, "talker-api")
        .send()
        .await?;

    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    Ok(())
}

#[tokio::test]
async fn test_removed_host_stops_serving_metadata() -> Result<(), anyhow::Error> {
    let server = server_with_wristband().await?;
    assert_eq!(get(&server, JWKS_PATH, "talker-api").await?.status(), StatusCode::OK);

    server.remove("talker-api").await;

    assert_eq!(
        get(&server, JWKS_PATH, "talker-api").await?.status(),
        StatusCode::NOT_FOUND
    );
    Ok(())
}

#[tokio::test]
async fn test_jwks_publishes_rotated_keys_side_by_side() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;

    let wristband = TestWristbandBuilder::new("https://rotating-api.example.com")
        .key(test_signing_key(RSA_SECONDARY_KEY_PEM, "rsa-next", "RS384"))
        .key(test_signing_key(RSA_PRIVATE_KEY_PEM, "rsa-current", "RS256"))
        .key(test_signing_key(EC_P521_PRIVATE_KEY_PEM, "ec-521", "ES512"))
        .build()?;
    server
        .configure(
            "rotating-api",
            TestServiceBuilder::new("rotating")
                .anonymous()
                .wristband(wristband)
                .build()?,
        )
        .await;

    let addr = server.http_addr();
    assert!(addr.ip().is_loopback());
    let response = reqwest::Client::new()
        .get(format!("http://{}{}", addr, JWKS_PATH))
        .header(header::HOST, "rotating-api")
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await?;
    let keys = body["keys"].as_array().cloned().unwrap_or_default();
    let kids: Vec<&str> = keys.iter().filter_map(|k| k["kid"].as_str()).collect();
    assert_eq!(kids, ["rsa-next", "rsa-current", "ec-521"]);

    assert_eq!(keys[0]["alg"], "RS384");
    assert_eq!(keys[1]["alg"], "RS256");
    assert_ne!(keys[0]["n"], keys[1]["n"]);

    assert_eq!(keys[2]["crv"], "P-521");
    assert!(keys[2].get("alg").is_none());
    Ok(())
}
