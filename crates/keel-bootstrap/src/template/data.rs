//! Input data for the manifest templates

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use keel_common::DEFAULT_ARGOCD_NAMESPACE;
use serde::{Deserialize, Serialize};

use super::catalog;
use super::error::TemplateError;

/// Default Argo CD project name
pub const DEFAULT_PROJECT: &str = "platform";

fn default_argocd_namespace() -> String {
    DEFAULT_ARGOCD_NAMESPACE.to_string()
}

fn default_project() -> String {
    DEFAULT_PROJECT.to_string()
}

/// What to render for one cluster.
///
/// Usually loaded from the `template` section of `keel.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TemplateData {
    /// Cluster name, used in labels and descriptions
    pub cluster_name: String,
    /// Namespace Argo CD runs in
    #[serde(default = "default_argocd_namespace")]
    pub argocd_namespace: String,
    /// Argo CD project every application belongs to
    #[serde(default = "default_project")]
    pub project: String,
    /// Catalog applications to enable
    #[serde(default)]
    pub applications: Vec<AppConfig>,
    /// Extra Secrets to create on the cluster (never committed)
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,
}

/// One enabled catalog application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Catalog name
    pub name: String,
    /// Chart version override
    #[serde(default)]
    pub version: Option<String>,
    /// Helm values
    #[serde(default)]
    pub values: serde_json::Map<String, serde_json::Value>,
}

impl AppConfig {
    /// Enable a catalog application with default version and no values
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            values: serde_json::Map::new(),
        }
    }
}

/// A user Secret created with create-if-absent semantics
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SecretConfig {
    /// Secret name
    pub name: String,
    /// Namespace, defaults to the Argo CD namespace
    #[serde(default)]
    pub namespace: Option<String>,
    /// `stringData` entries
    pub data: BTreeMap<String, String>,
}

impl fmt::Debug for SecretConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretConfig")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("keys", &self.data.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Where the rendered manifests live in git
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoSource {
    /// Remote URL Argo CD pulls from
    pub url: String,
    /// Branch Argo CD tracks
    pub branch: String,
    /// Directory inside the repository, empty for the root
    pub path: String,
}

impl RepoSource {
    /// Repository path of the `apps/` directory the root application syncs
    pub fn apps_path(&self) -> String {
        let base = self.path.trim_matches('/');
        if base.is_empty() {
            "apps".to_string()
        } else {
            format!("{}/apps", base)
        }
    }
}

impl TemplateData {
    /// Data for `cluster_name` with default namespace and project
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            argocd_namespace: default_argocd_namespace(),
            project: default_project(),
            applications: Vec::new(),
            secrets: Vec::new(),
        }
    }

    /// Enable a catalog application
    pub fn with_application(mut self, app: AppConfig) -> Self {
        self.applications.push(app);
        self
    }

    /// Add a Secret
    pub fn with_secret(mut self, secret: SecretConfig) -> Self {
        self.secrets.push(secret);
        self
    }

    /// Check names and catalog references before anything is rendered
    pub fn validate(&self) -> Result<(), TemplateError> {
        validate_dns_label("cluster_name", &self.cluster_name)?;
        validate_dns_label("argocd_namespace", &self.argocd_namespace)?;
        validate_dns_label("project", &self.project)?;

        let mut seen = HashSet::new();
        for app in &self.applications {
            if catalog::lookup(&app.name).is_none() {
                return Err(TemplateError::UnknownApplication {
                    name: app.name.clone(),
                    available: catalog::names(),
                });
            }
            if !seen.insert(app.name.as_str()) {
                return Err(TemplateError::invalid(
                    "applications",
                    format!("{} is enabled twice", app.name),
                ));
            }
        }

        let mut seen = HashSet::new();
        for secret in &self.secrets {
            validate_dns_label("secrets.name", &secret.name)?;
            let namespace = secret.namespace.as_deref().unwrap_or(&self.argocd_namespace);
            validate_dns_label("secrets.namespace", namespace)?;
            if secret.data.is_empty() {
                return Err(TemplateError::invalid(
                    "secrets.data",
                    format!("secret {} has no entries", secret.name),
                ));
            }
            if !seen.insert((namespace, secret.name.as_str())) {
                return Err(TemplateError::invalid(
                    "secrets",
                    format!("secret {}/{} is listed twice", namespace, secret.name),
                ));
            }
        }
        Ok(())
    }
}

/// RFC 1123 label: lowercase alphanumerics and '-', at most 63 characters
fn validate_dns_label(field: &str, value: &str) -> Result<(), TemplateError> {
    if value.is_empty() || value.len() > 63 {
        return Err(TemplateError::invalid(
            field,
            format!("{:?} must be 1 to 63 characters", value),
        ));
    }
    let valid_chars = value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !valid_chars || value.starts_with('-') || value.ends_with('-') {
        return Err(TemplateError::invalid(
            field,
            format!(
                "{:?} must consist of lowercase letters, digits and '-', and start and end with an alphanumeric",
                value
            ),
        ));
    }
    Ok(())
}
