//! Bootstrap command - render the catalog into git and hand the cluster to Argo CD

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use keel_bootstrap::{BootstrapStatus, Orchestrator};
use keel_common::reconcile::{KubeResourceClient, ResourceClient};
use keel_common::Context;
use tracing::{info, warn};

use super::{kube_client, RepoArgs};
use crate::config::{self, RepositoryConfig, TemplateOverrides};
use crate::Result;

/// Bootstrap a cluster into GitOps
#[derive(Args, Debug)]
pub struct BootstrapArgs {
    #[command(flatten)]
    pub repo: RepoArgs,

    /// Cluster name used in labels and the commit message
    #[arg(long, env = "KEEL_CLUSTER_NAME")]
    pub cluster_name: Option<String>,

    /// Enable a catalog application (repeatable)
    #[arg(long = "app", value_name = "NAME")]
    pub apps: Vec<String>,

    /// Namespace Argo CD runs in [default: argocd]
    #[arg(long)]
    pub argocd_namespace: Option<String>,

    /// Argo CD project for every application [default: platform]
    #[arg(long)]
    pub project: Option<String>,

    /// Kubeconfig of the target cluster; without it only git is touched
    #[arg(long, env = "KEEL_KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Render and push even if the repository is already bootstrapped
    #[arg(long)]
    pub force_render: bool,

    /// Wait up to this many seconds for the root application to sync
    #[arg(long)]
    pub wait_sync_secs: Option<u64>,
}

pub async fn run(args: BootstrapArgs, ctx: &Context) -> Result<()> {
    let file = config::load_optional(args.repo.config_file.as_deref())?;
    let config = file.into_bootstrap_config(
        RepositoryConfig::from(&args.repo),
        TemplateOverrides {
            cluster_name: args.cluster_name,
            argocd_namespace: args.argocd_namespace,
            project: args.project,
            applications: args.apps,
        },
        args.wait_sync_secs,
        args.force_render,
    )?;

    let client: Option<Arc<dyn ResourceClient>> = match &args.kubeconfig {
        Some(path) => Some(Arc::new(KubeResourceClient::new(kube_client(path).await?))),
        None => {
            warn!("no kubeconfig given, cluster resources will not be applied");
            None
        }
    };

    let cluster = config.template.cluster_name.clone();
    let outcome = Orchestrator::new(config, client)?.run(ctx).await?;

    match &outcome.status {
        BootstrapStatus::AlreadyBootstrapped => {
            println!("Cluster {} is already bootstrapped; nothing to do", cluster)
        }
        BootstrapStatus::Bootstrapped { commit: Some(commit) } => {
            println!("Cluster {} bootstrapped at {}", cluster, commit)
        }
        BootstrapStatus::Bootstrapped { commit: None } => {
            println!("Cluster {} bootstrapped; repository already up to date", cluster)
        }
    }
    for warning in &outcome.warnings {
        println!("  warning: {}", warning);
    }
    info!(phases = ?outcome.phases, "bootstrap complete");
    Ok(())
}
