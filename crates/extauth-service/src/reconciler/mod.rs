//! Declarative route source.
//!
//! Polls a JSON route document and reconciles the route cache against it.
//! Every service is rebuilt into a fresh `ServiceConfig` and written for each
//! of its hosts. A service that fails to build is fail-closed: its hosts are
//! removed from the cache until a later document builds it successfully.

pub mod document;

use crate::cache::RouteCache;
use crate::crypto::{load_signing_key, SigningKey};
use crate::errors::AuthzError;
use crate::models::{ClaimTemplate, WristbandConfig};
use crate::observability::metrics::record_reconciliation;
use crate::pipeline::{
    Anonymous, IdentityEvaluator, ResponseConfig, ResponseEvaluator, ResponseWrapper,
    ServiceConfig,
};
use document::{
    ClaimSpec, IdentitySpec, ResponseSpec, RouteDocument, SecretSpec, ServiceSpec, WrapperSpec,
    WristbandSpec, SIGNING_KEY_DATA_KEY,
};
use secrecy::ExposeSecret;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Summary of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Hosts written to the cache.
    pub configured: Vec<String>,
    /// Hosts removed from the cache.
    pub removed: Vec<String>,
    /// Services that failed to build.
    pub failed: Vec<String>,
}

pub struct Reconciler {
    cache: Arc<dyn RouteCache>,
    secret_label_key: String,
    last_digest: Option<String>,
    managed_hosts: HashSet<String>,
}

impl Reconciler {
    pub fn new(cache: Arc<dyn RouteCache>, secret_label_key: impl Into<String>) -> Self {
        Self {
            cache,
            secret_label_key: secret_label_key.into(),
            last_digest: None,
            managed_hosts: HashSet::new(),
        }
    }

    /// Poll `source` every `interval` until `shutdown` is cancelled.
    ///
    /// Without a source the cache stays empty and the task only waits for
    /// shutdown. Read and parse failures leave the cache untouched and are
    /// retried on the next tick.
    pub async fn run(
        mut self,
        source: Option<PathBuf>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Result<(), AuthzError> {
        let Some(path) = source else {
            info!(target: "extauth.reconciler", "No route document configured, route cache stays empty");
            shutdown.cancelled().await;
            return Ok(());
        };

        info!(target: "extauth.reconciler", path = %path.display(), interval_secs = interval.as_secs(), "Watching route document");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(target: "extauth.reconciler", "Reconciler shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match tokio::fs::read(&path).await {
                        Ok(bytes) => {
                            if let Err(e) = self.apply_bytes(&bytes).await {
                                warn!(target: "extauth.reconciler", error = %e, "Route document rejected");
                            }
                        }
                        Err(e) => {
                            warn!(target: "extauth.reconciler", error = %e, path = %path.display(), "Failed to read route document");
                            record_reconciliation("error");
                        }
                    }
                }
            }
        }
    }

    /// Parse and apply a route document if its content changed.
    ///
    /// Returns `None` when the content is identical to the last applied one.
    pub async fn apply_bytes(&mut self, bytes: &[u8]) -> Result<Option<ReconcileReport>, AuthzError> {
        let digest = hex::encode(Sha256::digest(bytes));
        if self.last_digest.as_deref() == Some(digest.as_str()) {
            return Ok(None);
        }

        let document: RouteDocument = serde_json::from_slice(bytes).map_err(|e| {
            record_reconciliation("error");
            AuthzError::Configuration(format!("invalid route document: {}", e))
        })?;

        let report = self.reconcile(&document).await;
        self.last_digest = Some(digest);
        Ok(Some(report))
    }

    /// Reconcile the route cache against `document`.
    #[instrument(skip_all, target = "extauth.reconciler", fields(services = document.services.len()))]
    pub async fn reconcile(&mut self, document: &RouteDocument) -> ReconcileReport {
        let secrets: Vec<&SecretSpec> = document
            .secrets
            .iter()
            .filter(|secret| secret.labels.contains_key(&self.secret_label_key))
            .collect();

        let mut report = ReconcileReport::default();
        let mut configured = HashSet::new();

        for spec in &document.services {
            match build_service(spec, &secrets) {
                Ok(config) => {
                    let config = Arc::new(config);
                    for host in &spec.hosts {
                        if !configured.insert(host.clone()) {
                            warn!(target: "extauth.reconciler", host = %host, service = %spec.name, "Host claimed by more than one service, last one wins");
                        }
                        self.cache.set(host, Arc::clone(&config)).await;
                        report.configured.push(host.clone());
                    }
                    info!(target: "extauth.reconciler", service = %spec.name, hosts = spec.hosts.len(), "Service configured");
                }
                Err(e) => {
                    warn!(target: "extauth.reconciler", service = %spec.name, error = %e, "Service configuration rejected, removing its hosts");
                    for host in &spec.hosts {
                        if !configured.contains(host) {
                            self.cache.delete(host).await;
                            report.removed.push(host.clone());
                        }
                    }
                    report.failed.push(spec.name.clone());
                }
            }
        }

        let stale: Vec<String> = self
            .managed_hosts
            .difference(&configured)
            .filter(|host| !report.removed.contains(*host))
            .cloned()
            .collect();
        for host in stale {
            self.cache.delete(&host).await;
            info!(target: "extauth.reconciler", host = %host, "Host removed");
            report.removed.push(host);
        }

        self.managed_hosts = configured;

        record_reconciliation(if report.failed.is_empty() {
            "success"
        } else {
            "error"
        });

        report
    }
}

/// Build a route configuration from its declarative form.
pub fn build_service(
    spec: &ServiceSpec,
    secrets: &[&SecretSpec],
) -> Result<ServiceConfig, AuthzError> {
    let identity = spec
        .identity
        .iter()
        .map(build_identity)
        .collect::<Result<Vec<_>, _>>()?;

    let response = spec
        .response
        .iter()
        .map(|plugin| build_response(plugin, secrets))
        .collect::<Result<Vec<_>, _>>()?;

    ServiceConfig::new(spec.name.clone(), identity, vec![], response)
}

fn build_identity(spec: &IdentitySpec) -> Result<Arc<dyn IdentityEvaluator>, AuthzError> {
    match &spec.anonymous {
        Some(_) => Ok(Arc::new(Anonymous::new(spec.name.clone()))),
        None => Err(AuthzError::Configuration(format!(
            "identity source '{}' has no supported type",
            spec.name
        ))),
    }
}

fn build_response(spec: &ResponseSpec, secrets: &[&SecretSpec]) -> Result<ResponseConfig, AuthzError> {
    let evaluator = match (&spec.wristband, &spec.json) {
        (Some(wristband), None) => {
            ResponseEvaluator::Wristband(Arc::new(build_wristband(wristband, secrets)?))
        }
        (None, Some(json)) => ResponseEvaluator::Json(build_claims(&json.properties)?),
        _ => {
            return Err(AuthzError::Configuration(format!(
                "response '{}' must configure exactly one of wristband or json",
                spec.name
            )))
        }
    };

    let wrapper = match spec.wrapper {
        WrapperSpec::HttpHeader => ResponseWrapper::HttpHeader,
        WrapperSpec::EnvoyDynamicMetadata => ResponseWrapper::EnvoyDynamicMetadata,
    };

    Ok(ResponseConfig::new(
        spec.name.clone(),
        wrapper,
        spec.wrapper_key.clone(),
        evaluator,
    ))
}

fn build_wristband(spec: &WristbandSpec, secrets: &[&SecretSpec]) -> Result<WristbandConfig, AuthzError> {
    let signing_keys = spec
        .signing_key_refs
        .iter()
        .map(|key_ref| {
            let secret = secrets
                .iter()
                .find(|secret| secret.name == key_ref.name)
                .ok_or_else(|| {
                    AuthzError::Configuration(format!(
                        "signing key secret '{}' not found",
                        key_ref.name
                    ))
                })?;
            let pem = secret.data.get(SIGNING_KEY_DATA_KEY).ok_or_else(|| {
                AuthzError::Configuration(format!(
                    "secret '{}' has no '{}' entry",
                    key_ref.name, SIGNING_KEY_DATA_KEY
                ))
            })?;

            load_signing_key(
                pem.expose_secret().as_bytes(),
                &key_ref.name,
                &key_ref.algorithm,
            )
            .map_err(AuthzError::from)
        })
        .collect::<Result<Vec<SigningKey>, _>>()?;

    WristbandConfig::new(
        spec.issuer.clone(),
        build_claims(&spec.custom_claims)?,
        spec.token_duration,
        signing_keys,
    )
}

fn build_claims(specs: &[ClaimSpec]) -> Result<Vec<ClaimTemplate>, AuthzError> {
    specs
        .iter()
        .map(|claim| {
            ClaimTemplate::from_parts(
                &claim.name,
                claim.value.clone(),
                claim.value_from.as_ref().map(|from| from.auth_json.clone()),
            )
        })
        .collect()
}
