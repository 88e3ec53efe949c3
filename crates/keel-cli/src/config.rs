//! keel configuration file.
//!
//! `--config keel.yaml` supplies the repository and what to render:
//!
//! ```yaml
//! repository:
//!   url: git@github.com:acme/fleet.git
//!   branch: main
//!   path: clusters/dev
//!   ssh_key_env: FLEET_DEPLOY_KEY
//! template:
//!   cluster_name: dev
//!   applications:
//!     - name: cert-manager
//!       values:
//!         installCRDs: true
//! sync_wait_secs: 300
//! ```
//!
//! Command line flags (and their environment variables) override the file.

use std::path::Path;
use std::time::Duration;

use keel_bootstrap::{AppConfig, BootstrapConfig, RepoSource, TemplateData};
use keel_common::convergence::WaitOptions;
use serde::Deserialize;

use crate::{Error, Result};

/// Default branch when neither flag nor file sets one
pub const DEFAULT_BRANCH: &str = "main";

/// Contents of a keel config file
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Where manifests are committed
    #[serde(default)]
    pub repository: RepositoryConfig,
    /// What to render
    #[serde(default)]
    pub template: Option<TemplateData>,
    /// Wait this long for the root application after bootstrapping
    #[serde(default)]
    pub sync_wait_secs: Option<u64>,
}

/// Repository settings; every field may also come from a flag
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Remote URL
    pub url: Option<String>,
    /// Branch to commit to
    pub branch: Option<String>,
    /// Directory inside the repository
    pub path: Option<String>,
    /// Environment variable holding an SSH private key
    pub ssh_key_env: Option<String>,
    /// Environment variable holding a token
    pub token_env: Option<String>,
}

/// Repository settings after flags and file are merged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRepository {
    pub source: RepoSource,
    pub ssh_key_env: Option<String>,
    pub token_env: Option<String>,
}

impl RepositoryConfig {
    /// Layer `overrides` on top of `self`. A credential source given on the
    /// command line replaces both sources from the file.
    pub fn resolve(self, overrides: RepositoryConfig) -> Result<ResolvedRepository> {
        let url = overrides.url.or(self.url).ok_or_else(|| {
            Error::validation("repository URL is required (--repo-url or repository.url)")
        })?;

        let (ssh_key_env, token_env) =
            if overrides.ssh_key_env.is_some() || overrides.token_env.is_some() {
                (overrides.ssh_key_env, overrides.token_env)
            } else {
                (self.ssh_key_env, self.token_env)
            };

        Ok(ResolvedRepository {
            source: RepoSource {
                url,
                branch: overrides
                    .branch
                    .or(self.branch)
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
                path: overrides.path.or(self.path).unwrap_or_default(),
            },
            ssh_key_env,
            token_env,
        })
    }
}

/// Template settings given as flags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOverrides {
    pub cluster_name: Option<String>,
    pub argocd_namespace: Option<String>,
    pub project: Option<String>,
    /// Catalog applications to enable in addition to the file's
    pub applications: Vec<String>,
}

impl TemplateOverrides {
    fn apply(self, template: Option<TemplateData>) -> Result<TemplateData> {
        let mut template = match (template, self.cluster_name) {
            (Some(mut t), Some(name)) => {
                t.cluster_name = name;
                t
            }
            (Some(t), None) => t,
            (None, Some(name)) => TemplateData::new(name),
            (None, None) => {
                return Err(Error::validation(
                    "cluster name is required (--cluster-name or template.cluster_name)",
                ))
            }
        };

        if let Some(namespace) = self.argocd_namespace {
            template.argocd_namespace = namespace;
        }
        if let Some(project) = self.project {
            template.project = project;
        }
        for name in self.applications {
            if !template.applications.iter().any(|app| app.name == name) {
                template.applications.push(AppConfig::new(name));
            }
        }
        Ok(template)
    }
}

/// Read and parse a config file
pub fn load(path: &Path) -> Result<FileConfig> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| Error::ConfigFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `path` if given, otherwise start from an empty config
pub fn load_optional(path: Option<&Path>) -> Result<FileConfig> {
    match path {
        Some(path) => load(path),
        None => Ok(FileConfig::default()),
    }
}

impl FileConfig {
    /// Merge flags into a complete bootstrap configuration
    pub fn into_bootstrap_config(
        self,
        repository: RepositoryConfig,
        template: TemplateOverrides,
        sync_wait_secs: Option<u64>,
        force_render: bool,
    ) -> Result<BootstrapConfig> {
        let repo = self.repository.resolve(repository)?;
        let template = template.apply(self.template)?;

        let mut config = BootstrapConfig::new(repo.source.url, template)
            .with_branch(repo.source.branch)
            .with_path(repo.source.path)
            .with_force_render(force_render);
        config.ssh_key_env = repo.ssh_key_env;
        config.token_env = repo.token_env;

        if let Some(secs) = sync_wait_secs.or(self.sync_wait_secs) {
            config = config.with_sync_wait(WaitOptions::new(Duration::from_secs(secs)));
        }
        Ok(config)
    }
}
