//! CLI commands

use std::path::{Path, PathBuf};

use clap::Args;
use keel_common::kube_utils;
use kube::Client;
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::{Error, Result};

pub mod bootstrap;
pub mod check_auth;
pub mod wait;

/// Repository flags shared by `bootstrap` and `check-auth`
#[derive(Args, Debug, Clone, Default)]
pub struct RepoArgs {
    /// Git repository URL (ssh or https)
    #[arg(long, env = "KEEL_REPO_URL")]
    pub repo_url: Option<String>,

    /// Branch to commit to [default: main]
    #[arg(long, env = "KEEL_BRANCH")]
    pub branch: Option<String>,

    /// Directory inside the repository to write manifests under
    #[arg(long, env = "KEEL_REPO_PATH")]
    pub path: Option<String>,

    /// Name of the environment variable holding an SSH private key
    #[arg(long, env = "KEEL_SSH_KEY_ENV", conflicts_with = "token_env")]
    pub ssh_key_env: Option<String>,

    /// Name of the environment variable holding an access token
    #[arg(long, env = "KEEL_TOKEN_ENV")]
    pub token_env: Option<String>,

    /// Config file providing defaults for these flags
    #[arg(short = 'f', long = "config", env = "KEEL_CONFIG")]
    pub config_file: Option<PathBuf>,
}

impl From<&RepoArgs> for RepositoryConfig {
    fn from(args: &RepoArgs) -> Self {
        RepositoryConfig {
            url: args.repo_url.clone(),
            branch: args.branch.clone(),
            path: args.path.clone(),
            ssh_key_env: args.ssh_key_env.clone(),
            token_env: args.token_env.clone(),
        }
    }
}

/// Build a kube client from a kubeconfig file
pub async fn kube_client(kubeconfig: &Path) -> Result<Client> {
    let bytes = std::fs::read(kubeconfig).map_err(|source| Error::Read {
        path: kubeconfig.to_path_buf(),
        source,
    })?;
    debug!(path = %kubeconfig.display(), "loading kubeconfig");
    Ok(kube_utils::client_from_kubeconfig(&bytes).await?)
}

/// Parse `namespace/name`
pub fn parse_namespaced(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns.to_string(), name.to_string()))
        }
        _ => Err(format!("expected NAMESPACE/NAME, got '{}'", s)),
    }
}
