//! Poll-until-ready for systems that converge on their own
//!
//! [`wait_for`] is the single state machine: fetch a fresh snapshot, evaluate
//! a pure predicate, sleep one tick, repeat until the predicate holds, the
//! deadline passes, or the context is cancelled. The condition shapes below
//! (nodes, workloads, Argo CD applications) are thin wrappers that supply a
//! fetch function and a predicate.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DynamicObject, ListParams};
use kube::Client;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::kube_utils::{has_condition, ArgoApplication, HasApiResource, CONDITION_READY};
use crate::reconcile::{ResourceClient, ResourceRef};
use crate::status::StatusEvent;
use crate::{Context, Error, Result};

/// Default delay between two fetches
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

/// Deadline and tick for one wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// Total time to wait before giving up
    pub timeout: Duration,
    /// Delay between fetches
    pub tick: Duration,
}

impl WaitOptions {
    /// Wait up to `timeout` with the default tick
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            tick: DEFAULT_TICK_INTERVAL,
        }
    }

    /// Override the tick
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }
}

/// Poll `fetch` until `is_ready` holds for a snapshot.
///
/// The first fetch happens immediately. Fetch errors are not fatal: they are
/// traced, remembered and retried on the next tick. The last one is reported
/// in the `ConvergenceTimeout` error if the deadline passes.
///
/// Each fetch is raced against the deadline and the context, so a hung
/// request cannot outlive the timeout. A fetch that completes at once still
/// wins over an expired deadline.
pub async fn wait_for<T, E, F, Fut, P>(
    ctx: &Context,
    description: &str,
    options: WaitOptions,
    mut fetch: F,
    is_ready: P,
) -> Result<()>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    P: Fn(&T) -> bool,
{
    let started = Instant::now();
    let deadline = started + options.timeout;
    let waiting = format!("waiting for {}", description);
    let mut last_error: Option<String> = None;
    let mut attempts: u32 = 0;

    ctx.send(StatusEvent::progress(&waiting).with_action("wait"));

    loop {
        ctx.check_cancelled(&waiting)?;

        attempts += 1;
        let fetched = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => {
                return Err(Error::cancelled(waiting));
            }
            fetched = fetch() => fetched,
            _ = tokio::time::sleep_until(deadline) => {
                debug!(description, attempts, "deadline passed during fetch");
                return Err(Error::convergence_timeout(description, options.timeout, last_error));
            }
        };
        match fetched {
            Ok(snapshot) if is_ready(&snapshot) => {
                debug!(description, attempts, elapsed = ?started.elapsed(), "condition met");
                ctx.send(
                    StatusEvent::success(format!("{} is ready", description))
                        .with_action("wait")
                        .with_metadata("attempts", attempts),
                );
                return Ok(());
            }
            Ok(_) => trace!(description, attempts, "condition not yet met, retrying"),
            Err(e) => {
                trace!(description, attempts, error = %e, "fetch failed, retrying");
                last_error = Some(e.to_string());
            }
        }

        tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => {
                return Err(Error::cancelled(waiting));
            }
            _ = tokio::time::sleep_until(deadline) => {
                return Err(Error::convergence_timeout(description, options.timeout, last_error));
            }
            _ = tokio::time::sleep(options.tick) => {}
        }
    }
}

/// True when at least one node reports `Ready=True`
pub fn any_node_ready(nodes: &[Node]) -> bool {
    nodes.iter().any(node_is_ready)
}

/// True when the node reports `Ready=True`
pub fn node_is_ready(node: &Node) -> bool {
    let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
    has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
}

/// Workload kinds with a replica count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkloadKind {
    /// apps/v1 Deployment
    Deployment,
    /// apps/v1 StatefulSet
    StatefulSet,
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkloadKind::Deployment => f.write_str("Deployment"),
            WorkloadKind::StatefulSet => f.write_str("StatefulSet"),
        }
    }
}

/// A named workload to wait for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadRef {
    /// Deployment or StatefulSet
    pub kind: WorkloadKind,
    /// Namespace
    pub namespace: String,
    /// Name
    pub name: String,
}

impl WorkloadRef {
    /// Reference a Deployment
    pub fn deployment(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::Deployment,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Reference a StatefulSet
    pub fn stateful_set(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::StatefulSet,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Replica counts observed for one workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkloadReadiness {
    /// `spec.replicas`; unset means 1
    pub desired: Option<i32>,
    /// `status.readyReplicas`; unset means 0
    pub ready: Option<i32>,
}

impl WorkloadReadiness {
    /// Ready replicas have caught up with the desired count
    pub fn is_ready(&self) -> bool {
        self.ready.unwrap_or(0) >= self.desired.unwrap_or(1)
    }
}

impl From<&Deployment> for WorkloadReadiness {
    fn from(d: &Deployment) -> Self {
        Self {
            desired: d.spec.as_ref().and_then(|s| s.replicas),
            ready: d.status.as_ref().and_then(|s| s.ready_replicas),
        }
    }
}

impl From<&StatefulSet> for WorkloadReadiness {
    fn from(s: &StatefulSet) -> Self {
        Self {
            desired: s.spec.as_ref().and_then(|spec| spec.replicas),
            ready: s.status.as_ref().and_then(|status| status.ready_replicas),
        }
    }
}

/// Argo CD health status meaning "everything is running"
pub const HEALTH_HEALTHY: &str = "Healthy";
/// Argo CD sync status meaning "live state matches git"
pub const SYNC_SYNCED: &str = "Synced";

/// True when an Application body reports Healthy and Synced.
///
/// Missing fields count as not converged.
pub fn application_converged(body: &serde_json::Value) -> bool {
    let status = |pointer: &str| body.pointer(pointer).and_then(|v| v.as_str());
    status("/status/health/status") == Some(HEALTH_HEALTHY)
        && status("/status/sync/status") == Some(SYNC_SYNCED)
}

/// Wait until at least one node is Ready
pub async fn wait_for_nodes_ready(ctx: &Context, client: &Client, options: WaitOptions) -> Result<()> {
    let nodes: Api<Node> = Api::all(client.clone());
    let nodes = &nodes;

    wait_for(
        ctx,
        "nodes ready",
        options,
        move || async move { nodes.list(&ListParams::default()).await.map(|l| l.items) },
        |items: &Vec<Node>| any_node_ready(items),
    )
    .await
}

/// Wait until every listed workload has its desired replicas ready.
///
/// A workload that does not exist yet counts as not ready.
pub async fn wait_for_workloads_ready(
    ctx: &Context,
    client: &Client,
    workloads: &[WorkloadRef],
    options: WaitOptions,
) -> Result<()> {
    let description = format!(
        "workloads ready ({})",
        workloads
            .iter()
            .map(|w| w.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );

    wait_for(
        ctx,
        &description,
        options,
        move || async move {
            let mut observed = Vec::with_capacity(workloads.len());
            for workload in workloads {
                observed.push(fetch_workload(client, workload).await?);
            }
            Ok::<_, kube::Error>(observed)
        },
        |observed: &Vec<WorkloadReadiness>| observed.iter().all(WorkloadReadiness::is_ready),
    )
    .await
}

async fn fetch_workload(
    client: &Client,
    workload: &WorkloadRef,
) -> std::result::Result<WorkloadReadiness, kube::Error> {
    let readiness = match workload.kind {
        WorkloadKind::Deployment => {
            let api: Api<Deployment> = Api::namespaced(client.clone(), &workload.namespace);
            api.get_opt(&workload.name)
                .await?
                .map(|d| WorkloadReadiness::from(&d))
        }
        WorkloadKind::StatefulSet => {
            let api: Api<StatefulSet> = Api::namespaced(client.clone(), &workload.namespace);
            api.get_opt(&workload.name)
                .await?
                .map(|s| WorkloadReadiness::from(&s))
        }
    };

    Ok(readiness.unwrap_or_else(|| {
        trace!(workload = %workload, "workload not found yet");
        WorkloadReadiness {
            desired: None,
            ready: Some(0),
        }
    }))
}

/// Wait until an Argo CD Application is Healthy and Synced
pub async fn wait_for_application_converged(
    ctx: &Context,
    client: &dyn ResourceClient,
    namespace: &str,
    name: &str,
    options: WaitOptions,
) -> Result<()> {
    let target = ResourceRef {
        api_resource: ArgoApplication::api_resource(),
        namespace: Some(namespace.to_string()),
        name: name.to_string(),
    };
    let target = &target;

    wait_for(
        ctx,
        &format!("application {} healthy and synced", target),
        options,
        move || async move {
            match client.get(target).await {
                Ok(Some(app)) => Ok(app),
                Ok(None) => Err(format!("{} not found", target)),
                Err(e) => Err(e.to_string()),
            }
        },
        |app: &DynamicObject| application_converged(&app.data),
    )
    .await
}
