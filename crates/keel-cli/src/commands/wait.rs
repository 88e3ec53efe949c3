//! Wait command - block until the cluster reaches a condition

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use keel_common::convergence::{
    wait_for_application_converged, wait_for_nodes_ready, wait_for_workloads_ready, WaitOptions,
    WorkloadRef,
};
use keel_common::reconcile::KubeResourceClient;
use keel_common::{Context, DEFAULT_ARGOCD_NAMESPACE};

use super::{kube_client, parse_namespaced};
use crate::{Error, Result};

/// Wait for nodes, workloads or an Argo CD application
#[derive(Args, Debug)]
pub struct WaitArgs {
    #[command(subcommand)]
    pub target: WaitTarget,

    /// Kubeconfig of the target cluster
    #[arg(long, env = "KEEL_KUBECONFIG", global = true)]
    pub kubeconfig: Option<PathBuf>,

    /// Give up after this many seconds
    #[arg(long, default_value = "300", global = true)]
    pub timeout_secs: u64,

    /// Seconds between checks
    #[arg(long, default_value = "5", global = true)]
    pub tick_secs: u64,
}

#[derive(Subcommand, Debug)]
pub enum WaitTarget {
    /// At least one node is Ready
    Nodes,
    /// Every listed workload has all replicas ready
    Workloads {
        /// Deployment as NAMESPACE/NAME (repeatable)
        #[arg(long = "deployment", value_name = "NAMESPACE/NAME", value_parser = parse_namespaced)]
        deployments: Vec<(String, String)>,

        /// StatefulSet as NAMESPACE/NAME (repeatable)
        #[arg(long = "statefulset", value_name = "NAMESPACE/NAME", value_parser = parse_namespaced)]
        stateful_sets: Vec<(String, String)>,
    },
    /// An Argo CD Application is Healthy and Synced
    App {
        /// Application name
        #[arg(default_value = "root")]
        name: String,

        /// Namespace Argo CD runs in
        #[arg(long, default_value = DEFAULT_ARGOCD_NAMESPACE)]
        namespace: String,
    },
}

impl WaitArgs {
    fn options(&self) -> Result<WaitOptions> {
        if self.tick_secs == 0 {
            return Err(Error::validation("--tick-secs must be at least 1"));
        }
        Ok(WaitOptions::new(Duration::from_secs(self.timeout_secs))
            .with_tick(Duration::from_secs(self.tick_secs)))
    }
}

pub async fn run(args: WaitArgs, ctx: &Context) -> Result<()> {
    let options = args.options()?;
    let kubeconfig = args
        .kubeconfig
        .as_deref()
        .ok_or_else(|| Error::validation("--kubeconfig is required"))?;
    let client = kube_client(kubeconfig).await?;

    match args.target {
        WaitTarget::Nodes => {
            wait_for_nodes_ready(ctx, &client, options).await?;
            println!("At least one node is Ready");
        }
        WaitTarget::Workloads {
            deployments,
            stateful_sets,
        } => {
            let workloads = workload_refs(deployments, stateful_sets)?;
            wait_for_workloads_ready(ctx, &client, &workloads, options).await?;
            println!("{} workloads ready", workloads.len());
        }
        WaitTarget::App { name, namespace } => {
            let resources = KubeResourceClient::new(client);
            wait_for_application_converged(ctx, &resources, &namespace, &name, options).await?;
            println!("Application {}/{} is Healthy and Synced", namespace, name);
        }
    }
    Ok(())
}

fn workload_refs(
    deployments: Vec<(String, String)>,
    stateful_sets: Vec<(String, String)>,
) -> Result<Vec<WorkloadRef>> {
    let workloads: Vec<WorkloadRef> = deployments
        .into_iter()
        .map(|(ns, name)| WorkloadRef::deployment(ns, name))
        .chain(
            stateful_sets
                .into_iter()
                .map(|(ns, name)| WorkloadRef::stateful_set(ns, name)),
        )
        .collect();
    if workloads.is_empty() {
        return Err(Error::validation(
            "name at least one --deployment or --statefulset",
        ));
    }
    Ok(workloads)
}
