//! Shared Kubernetes utilities using kube-rs
//!
//! Client construction with the three TLS verification modes the sidecar is
//! deployed with, plus the manifest apply/delete helpers used by the
//! interception tool. No kubectl binary is needed at runtime.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How the kube client verifies the API server certificate
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum TlsVerification {
    /// Accept any certificate. Development clusters only.
    Disabled,
    /// Whatever the inferred config says (in-cluster CA or kubeconfig CA data)
    #[default]
    Default,
    /// Verify against the PEM bundle at this path
    CaFile(PathBuf),
}

impl std::fmt::Display for TlsVerification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disabled => write!(f, "disabled"),
            Self::Default => write!(f, "default"),
            Self::CaFile(path) => write!(f, "ca-file:{}", path.display()),
        }
    }
}

/// Where the client configuration came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientSource {
    /// ServiceAccount token and CA mounted into the pod
    InCluster,
    /// A kubeconfig file (explicit path, `KUBECONFIG` or `~/.kube/config`)
    Kubeconfig,
}

impl ClientSource {
    fn as_str(&self) -> &'static str {
        match self {
            Self::InCluster => "incluster",
            Self::Kubeconfig => "kubeconfig",
        }
    }
}

/// Options for building a kube client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Explicit kubeconfig; when unset, in-cluster config is tried first
    pub kubeconfig: Option<PathBuf>,
    /// Certificate verification mode
    pub tls: TlsVerification,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-request read timeout
    pub read_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            tls: TlsVerification::Default,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

/// Create a kube client, logging which configuration source was used
pub async fn create_client(options: &ClientOptions) -> Result<Client, Error> {
    let (mut config, source) = load_config(options.kubeconfig.as_deref()).await?;

    config.connect_timeout = Some(options.connect_timeout);
    config.read_timeout = Some(options.read_timeout);
    apply_tls(&mut config, &options.tls).await?;

    let client = Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })?;

    info!(auth_mode = source.as_str(), tls = %options.tls, "kube client ready");
    Ok(client)
}

async fn load_config(kubeconfig: Option<&Path>) -> Result<(Config, ClientSource), Error> {
    if let Some(path) = kubeconfig {
        let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
            Error::ClientConfig(format!("failed to read kubeconfig {}: {}", path.display(), e))
        })?;
        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::ClientConfig(format!("failed to load kubeconfig: {}", e)))?;
        return Ok((config, ClientSource::Kubeconfig));
    }

    match Config::incluster() {
        Ok(config) => Ok((config, ClientSource::InCluster)),
        Err(incluster_err) => {
            debug!(error = %incluster_err, "not running in-cluster, falling back to kubeconfig");
            let config = Config::from_kubeconfig(&KubeConfigOptions::default())
                .await
                .map_err(|e| Error::ClientConfig(format!("failed to load kubeconfig: {}", e)))?;
            Ok((config, ClientSource::Kubeconfig))
        }
    }
}

async fn apply_tls(config: &mut Config, tls: &TlsVerification) -> Result<(), Error> {
    match tls {
        TlsVerification::Disabled => {
            warn!("TLS verification disabled for the kube client");
            config.accept_invalid_certs = true;
        }
        TlsVerification::Default => {}
        TlsVerification::CaFile(path) => {
            config.accept_invalid_certs = false;
            config.root_cert = Some(read_ca_bundle(path).await?);
        }
    }
    Ok(())
}

/// Read a PEM bundle and return the DER bytes of each certificate
pub async fn read_ca_bundle(path: &Path) -> Result<Vec<Vec<u8>>, Error> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        Error::ClientConfig(format!("failed to read CA file {}: {}", path.display(), e))
    })?;
    let certs: Vec<Vec<u8>> = ::pem::parse_many(&data)
        .map_err(|e| Error::ClientConfig(format!("invalid PEM in {}: {}", path.display(), e)))?
        .into_iter()
        .filter(|p| p.tag() == "CERTIFICATE")
        .map(|p| p.into_contents())
        .collect();

    if certs.is_empty() {
        return Err(Error::ClientConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Run a cluster call with a deadline, mapping expiry to [`Error::Timeout`]
pub async fn with_timeout<T, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, Error>
where
    F: Future<Output = Result<T, kube::Error>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::timeout(operation, timeout)),
    }
}

// =============================================================================
// Manifests
// =============================================================================

/// Parsed manifest metadata for applying to Kubernetes
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// The manifest body, with `metadata.namespace` filled in
    pub value: Value,
    /// Resource name
    pub name: String,
    /// Namespace the object lives in
    pub namespace: String,
    /// API resource definition
    pub api_resource: ApiResource,
}

/// Read kind, name and namespace from a manifest, defaulting the namespace
pub fn parse_manifest(mut value: Value, default_namespace: &str) -> Result<ManifestMetadata, Error> {
    let api_version = value
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::manifest("manifest missing apiVersion"))?
        .to_string();
    let kind = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::manifest("manifest missing kind"))?
        .to_string();
    let name = value
        .pointer("/metadata/name")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::manifest_for(&kind, "manifest missing metadata.name"))?
        .to_string();

    let namespace = match value.pointer("/metadata/namespace").and_then(Value::as_str) {
        Some(ns) => ns.to_string(),
        None => {
            if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
                meta.insert(
                    "namespace".to_string(),
                    Value::String(default_namespace.to_string()),
                );
            }
            default_namespace.to_string()
        }
    };

    Ok(ManifestMetadata {
        api_resource: build_api_resource(&api_version, &kind),
        value,
        name,
        namespace,
    })
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use carta_common::kube_utils::parse_api_version;
///
/// assert_eq!(parse_api_version("apps/v1"), ("apps".to_string(), "v1".to_string()));
/// assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from an apiVersion string and kind
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Pluralize a Kubernetes resource kind
///
/// Kinds whose plural does not follow the simple English rules are listed
/// explicitly.
pub fn pluralize_kind(kind: &str) -> String {
    const IRREGULAR: &[(&str, &str)] = &[
        ("ingress", "ingresses"),
        ("endpoints", "endpoints"),
        ("ingressroute", "ingressroutes"),
        ("middleware", "middlewares"),
    ];

    let lower = kind.to_lowercase();
    if let Some((_, plural)) = IRREGULAR.iter().find(|(singular, _)| *singular == lower) {
        return (*plural).to_string();
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

fn dynamic_api(client: &Client, meta: &ManifestMetadata) -> Api<DynamicObject> {
    Api::namespaced_with(client.clone(), &meta.namespace, &meta.api_resource)
}

/// Apply manifests in order using server-side apply. Stops at the first failure.
pub async fn apply_manifests(
    client: &Client,
    manifests: &[ManifestMetadata],
    field_manager: &str,
) -> Result<(), Error> {
    let params = PatchParams::apply(field_manager).force();
    for meta in manifests {
        dynamic_api(client, meta)
            .patch(&meta.name, &params, &Patch::Apply(&meta.value))
            .await
            .map_err(|e| {
                Error::internal_with_context(
                    "apply_manifests",
                    format!("failed to apply {}/{}: {}", meta.api_resource.kind, meta.name, e),
                )
            })?;
        info!(
            kind = %meta.api_resource.kind,
            name = %meta.name,
            namespace = %meta.namespace,
            "applied manifest"
        );
    }
    Ok(())
}

/// Delete manifests in reverse order. Every object is attempted; objects that
/// are already gone count as deleted. Returns the number of failures as an
/// error after the whole list has been processed.
pub async fn delete_manifests(client: &Client, manifests: &[ManifestMetadata]) -> Result<(), Error> {
    let mut failures = Vec::new();
    for meta in manifests.iter().rev() {
        match dynamic_api(client, meta)
            .delete(&meta.name, &DeleteParams::background())
            .await
        {
            Ok(_) => info!(kind = %meta.api_resource.kind, name = %meta.name, "deleted manifest"),
            Err(e) => {
                let err = Error::from(e);
                if err.is_not_found() {
                    debug!(kind = %meta.api_resource.kind, name = %meta.name, "already deleted");
                    continue;
                }
                warn!(
                    kind = %meta.api_resource.kind,
                    name = %meta.name,
                    error = %err,
                    "failed to delete manifest"
                );
                failures.push(format!("{}/{}", meta.api_resource.kind, meta.name));
            }
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(Error::internal_with_context(
            "delete_manifests",
            format!("failed to delete {}", failures.join(", ")),
        ))
    }
}
