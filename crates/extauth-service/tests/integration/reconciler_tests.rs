//! Integration tests for the route document reconciler.

use extauth_service::reconciler::Reconciler;
use extauth_test_utils::{TestExtAuthServer, EC_P256_PRIVATE_KEY_PEM, RSA_PRIVATE_KEY_PEM};
use reqwest::{header, StatusCode};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const LABEL_KEY: &str = "extauth.io/managed-by";
const JWKS_PATH: &str = "/.well-known/openid-connect/certs";

fn route_document(key_refs: Value) -> Value {
    json!({
        "services": [{
            "name": "talker-api",
            "hosts": ["talker-api"],
            "identity": [{"name": "anonymous", "anonymous": {}}],
            "response": [{
                "name": "wristband",
                "wristband": {
                    "issuer": "https://talker-api.example.com",
                    "signingKeyRefs": key_refs
                }
            }]
        }],
        "secrets": [
            {"name": "ec-key", "labels": {LABEL_KEY: "extauth"}, "data": {"key.pem": EC_P256_PRIVATE_KEY_PEM}},
            {"name": "rsa-key", "labels": {LABEL_KEY: "extauth"}, "data": {"key.pem": RSA_PRIVATE_KEY_PEM}}
        ]
    })
}

fn temp_route_file(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("extauth-{}-{}.json", name, std::process::id()))
}

async fn jwks_kids(server: &TestExtAuthServer) -> Result<Option<Vec<String>>, anyhow::Error> {
    let response = reqwest::Client::new()
        .get(format!("{}{}", server.http_url(), JWKS_PATH))
        .header(header::HOST, "talker-api")
        .send()
        .await?;
    if response.status() == StatusCode::NOT_FOUND {
        return Ok(None);
    }

    let body: Value = response.json().await?;
    Ok(Some(
        body["keys"]
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| key["kid"].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default(),
    ))
}

async fn wait_for_kids(
    server: &TestExtAuthServer,
    expected: Option<Vec<String>>,
) -> Result<(), anyhow::Error> {
    for _ in 0..200 {
        if jwks_kids(server).await? == expected {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    anyhow::bail!("key set never became {:?}", expected)
}

#[tokio::test]
async fn test_route_document_changes_are_published() -> Result<(), anyhow::Error> {
    let server = TestExtAuthServer::spawn().await?;
    let path = temp_route_file("published");
    tokio::fs::write(
        &path,
        serde_json::to_vec(&route_document(json!([{"name": "ec-key", "algorithm": "ES256"}])))?,
    )
    .await?;

    let token = CancellationToken::new();
    let reconciler = Reconciler::new(server.cache(), LABEL_KEY);
    let task = tokio::spawn(reconciler.run(
        Some(path.clone()),
        Duration::from_millis(20),
        token.clone(),
    ));

    wait_for_kids(&server, Some(vec!["ec-key".to_string()])).await?;

    // Key rotation: the new key signs, the old one stays published
    tokio::fs::write(
        &path,
        serde_json::to_vec(&route_document(json!([
            {"name": "rsa-key", "algorithm": "RS256"},
            {"name": "ec-key", "algorithm": "ES256"}
        ])))?,
    )
    .await?;
    wait_for_kids(&server, Some(vec!["rsa-key".to_string(), "ec-key".to_string()])).await?;

    // A reference to a missing secret takes the service down
    tokio::fs::write(
        &path,
        serde_json::to_vec(&route_document(json!([{"name": "missing", "algorithm": "ES256"}])))?,
    )
    .await?;
    wait_for_kids(&server, None).await?;

    token.cancel();
    task.await??;
    let _ = tokio::fs::remove_file(&path).await;
    Ok(())
}
