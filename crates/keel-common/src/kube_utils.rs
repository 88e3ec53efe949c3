//! Kubernetes helpers shared by the reconciler and the poller
//!
//! There are two ways to get an `ApiResource` here:
//!
//! 1. **`HasApiResource` trait** - for kinds keel looks up by name at compile
//!    time (the Argo CD Application).
//! 2. **`build_api_resource()`** - for documents whose apiVersion/kind is only
//!    known after rendering.

use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};

use crate::Error;

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Types with a known API version and kind
pub trait HasApiResource {
    /// Full API version (e.g., "argoproj.io/v1alpha1", "v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g., "Application")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// Argo CD Application
pub struct ArgoApplication;

impl HasApiResource for ArgoApplication {
    const API_VERSION: &'static str = "argoproj.io/v1alpha1";
    const KIND: &'static str = "Application";
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The version is used exactly as given.
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

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use keel_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("argoproj.io/v1alpha1");
/// assert_eq!(group, "argoproj.io");
/// assert_eq!(version, "v1alpha1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Irregular plurals for kinds keel manages
const KIND_PLURALS: &[(&str, &str)] = &[
    ("appproject", "appprojects"),
    ("applicationset", "applicationsets"),
    ("ingress", "ingresses"),
    ("networkpolicy", "networkpolicies"),
    ("endpoints", "endpoints"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple English
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if let Some((_, plural)) = KIND_PLURALS.iter().find(|(singular, _)| *singular == lower) {
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

/// Whether a kube error is an API 409 (AlreadyExists or a stale resourceVersion)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Check if a condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Create a kube client from kubeconfig bytes with default timeouts.
///
/// The bytes come from whichever provider created the cluster; keel never
/// reads `~/.kube/config` implicitly.
pub async fn client_from_kubeconfig(kubeconfig: &[u8]) -> Result<Client, Error> {
    client_from_kubeconfig_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT)
        .await
}

/// Create a kube client from kubeconfig bytes with custom timeouts
pub async fn client_from_kubeconfig_with_timeout(
    kubeconfig: &[u8],
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let text = std::str::from_utf8(kubeconfig).map_err(|e| {
        Error::config_for_field("kubeconfig", format!("kubeconfig is not UTF-8: {}", e))
    })?;
    let kubeconfig = Kubeconfig::from_yaml(text).map_err(|e| {
        Error::config_for_field("kubeconfig", format!("failed to parse kubeconfig: {}", e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::config_for_field("kubeconfig", format!("failed to load kubeconfig: {}", e))
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}
