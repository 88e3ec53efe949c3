//! Full bootstrap runs against a local `file://` remote and an in-memory cluster

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use git2::{Repository, Signature};
use keel_bootstrap::{
    AppConfig, BootstrapConfig, BootstrapStatus, Orchestrator, Phase, SecretConfig, TemplateData,
};
use keel_common::convergence::WaitOptions;
use keel_common::reconcile::{ResourceClient, ResourceRef};
use keel_common::{Context, Error, Result, StatusEvent, StatusLevel};
use keel_gitops::{CredentialProvider, Credentials};
use kube::api::DynamicObject;
use kube::core::ErrorResponse;
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc;
use zeroize::Zeroizing;

struct StaticToken;

impl CredentialProvider for StaticToken {
    fn resolve(&self) -> Result<Credentials> {
        Ok(Credentials::Token(Zeroizing::new("ghp_test".to_string())))
    }

    fn describe(&self) -> String {
        "token from test".to_string()
    }
}

/// In-memory API server keyed by `Kind/namespace/name`
#[derive(Default)]
struct FakeCluster {
    objects: Mutex<BTreeMap<String, DynamicObject>>,
    failing_kinds: Vec<&'static str>,
    applications_converge: bool,
}

impl FakeCluster {
    fn failing(kind: &'static str) -> Self {
        Self {
            failing_kinds: vec![kind],
            ..Self::default()
        }
    }

    fn converging() -> Self {
        Self {
            applications_converge: true,
            ..Self::default()
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    fn object(&self, key: &str) -> DynamicObject {
        self.objects
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_else(|| panic!("{key} missing from cluster"))
    }

    fn remove(&self, key: &str) {
        self.objects.lock().unwrap().remove(key);
    }

    fn check(&self, target: &ResourceRef) -> std::result::Result<(), kube::Error> {
        if self.failing_kinds.contains(&target.api_resource.kind.as_str()) {
            return Err(api_error(403, "Forbidden"));
        }
        Ok(())
    }
}

fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: reason.to_string(),
        reason: reason.to_string(),
        code,
    })
}

#[async_trait]
impl ResourceClient for FakeCluster {
    async fn get(&self, target: &ResourceRef) -> std::result::Result<Option<DynamicObject>, kube::Error> {
        self.check(target)?;
        let found = self.objects.lock().unwrap().get(&target.to_string()).cloned();
        Ok(found.map(|mut obj| {
            if self.applications_converge && target.api_resource.kind == "Application" {
                obj.data["status"] = json!({
                    "health": { "status": "Healthy" },
                    "sync": { "status": "Synced" }
                });
            }
            obj
        }))
    }

    async fn create(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error> {
        self.check(target)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&target.to_string()) {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut stored = object.clone();
        stored.metadata.resource_version = Some("1".to_string());
        objects.insert(target.to_string(), stored.clone());
        Ok(stored)
    }

    async fn replace(
        &self,
        target: &ResourceRef,
        object: &DynamicObject,
    ) -> std::result::Result<DynamicObject, kube::Error> {
        self.check(target)?;
        self.objects
            .lock()
            .unwrap()
            .insert(target.to_string(), object.clone());
        Ok(object.clone())
    }
}

/// Bare remote with one seed commit on `main`
fn bare_remote() -> (TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::init_bare(dir.path()).unwrap();

    let blob = repo.blob(b"# fleet\n").unwrap();
    let mut tree = repo.treebuilder(None).unwrap();
    tree.insert("README.md", blob, 0o100644).unwrap();
    let tree = repo.find_tree(tree.write().unwrap()).unwrap();
    let sig = Signature::now("seed", "seed@example.com").unwrap();
    repo.commit(Some("refs/heads/main"), &sig, &sig, "seed", &tree, &[])
        .unwrap();
    repo.set_head("refs/heads/main").unwrap();

    let url = format!("file://{}", dir.path().display());
    (dir, url)
}

fn commit_count(remote: &Path) -> usize {
    let repo = Repository::open_bare(remote).unwrap();
    let mut walk = repo.revwalk().unwrap();
    walk.push_ref("refs/heads/main").unwrap();
    walk.count()
}

fn remote_has(remote: &Path, path: &str) -> bool {
    let repo = Repository::open_bare(remote).unwrap();
    let head = repo
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    let found = head.tree().unwrap().get_path(Path::new(path)).is_ok();
    found
}

fn template() -> TemplateData {
    TemplateData::new("dev")
        .with_application(AppConfig::new("cert-manager"))
        .with_secret(SecretConfig {
            name: "dns-credentials".to_string(),
            namespace: None,
            data: BTreeMap::from([("api-token".to_string(), "cf-123".to_string())]),
        })
}

fn config(url: &str) -> BootstrapConfig {
    BootstrapConfig::new(url, template()).with_path("clusters/dev")
}

fn orchestrator(config: BootstrapConfig, cluster: &Arc<FakeCluster>) -> Orchestrator {
    let client: Arc<dyn ResourceClient> = cluster.clone();
    Orchestrator::with_credentials(config, Arc::new(StaticToken), Some(client)).unwrap()
}

fn drain(rx: &mut mpsc::Receiver<StatusEvent>) -> Vec<StatusEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Story: the first run renders, commits once and creates everything on the
/// cluster. The second run finds the marker and does nothing.
#[tokio::test]
async fn story_second_run_is_a_no_op() {
    let (remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());
    let ctx = Context::new();

    let first = orchestrator(config(&url), &cluster).run(&ctx).await.unwrap();
    let BootstrapStatus::Bootstrapped { commit } = &first.status else {
        panic!("first run should bootstrap, got {:?}", first.status);
    };
    assert!(commit.is_some());
    assert_eq!(
        first.phases,
        vec![
            Phase::NotStarted,
            Phase::AuthValidated,
            Phase::RepoInitialized,
            Phase::ManifestsRendered,
            Phase::MarkerWritten,
            Phase::Committed,
            Phase::NamespaceApplied,
            Phase::ProjectApplied,
            Phase::SecretsApplied,
            Phase::RootAppApplied,
            Phase::Done,
        ]
    );
    assert!(first.warnings.is_empty());
    assert_eq!(commit_count(remote.path()), 2);

    for path in [
        "clusters/dev/.bootstrapped",
        "clusters/dev/root-app.yaml",
        "clusters/dev/projects/platform.yaml",
        "clusters/dev/apps/cert-manager.yaml",
    ] {
        assert!(remote_has(remote.path(), path), "{path} should be committed");
    }

    for key in [
        "Namespace/argocd",
        "AppProject/argocd/platform",
        "Secret/argocd/keel-repository",
        "Secret/argocd/dns-credentials",
        "Application/argocd/root",
    ] {
        assert!(cluster.contains(key), "{key} should exist");
    }

    let (tx, mut rx) = mpsc::channel(100);
    let second = orchestrator(config(&url), &cluster)
        .run(&ctx.with_channel(tx))
        .await
        .unwrap();
    assert!(second.is_skipped());
    assert!(second.phases.contains(&Phase::AlreadyBootstrapped));
    assert!(!second.phases.contains(&Phase::ManifestsRendered));
    assert!(second.warnings.is_empty());
    assert_eq!(commit_count(remote.path()), 2);

    let events = drain(&mut rx);
    let skipped = events
        .iter()
        .find(|e| e.level() == StatusLevel::Info && e.message() == "already bootstrapped, skipping")
        .expect("skip event");
    let stamp = skipped
        .metadata()
        .get("bootstrapped_at")
        .and_then(|v| v.as_str())
        .expect("skip event carries the marker timestamp");
    assert!(chrono::DateTime::parse_from_rfc3339(stamp).is_ok());
}

/// Story: secrets never reach git, only the cluster
#[tokio::test]
async fn story_secrets_are_not_committed() {
    let (remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());

    orchestrator(config(&url), &cluster)
        .run(&Context::new())
        .await
        .unwrap();

    let repo = Repository::open_bare(remote.path()).unwrap();
    let head = repo
        .find_reference("refs/heads/main")
        .unwrap()
        .peel_to_commit()
        .unwrap();
    let mut committed = String::new();
    head.tree()
        .unwrap()
        .walk(git2::TreeWalkMode::PreOrder, |_, entry| {
            if let Ok(blob) = entry.to_object(&repo).and_then(|o| o.peel_to_blob()) {
                committed.push_str(&String::from_utf8_lossy(blob.content()));
            }
            git2::TreeWalkResult::Ok
        })
        .unwrap();
    assert!(!committed.contains("ghp_test"));
    assert!(!committed.contains("cf-123"));

    let repo_secret = cluster.object("Secret/argocd/keel-repository");
    assert_eq!(repo_secret.data["stringData"]["password"], "ghp_test");
}

/// Story: the API server refuses Secrets. The run fails, the root
/// application is never applied and the clone is cleaned up.
#[tokio::test]
async fn story_secret_failure_is_fatal() {
    let (_remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::failing("Secret"));
    let (tx, mut rx) = mpsc::channel(100);
    let ctx = Context::new().with_channel(tx);

    let err = orchestrator(config(&url), &cluster)
        .run(&ctx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Reconcile { .. }), "got {err:?}");
    assert!(cluster.contains("AppProject/argocd/platform"));
    assert!(!cluster.contains("Application/argocd/root"));

    let events = drain(&mut rx);
    let failure = events
        .iter()
        .find(|e| e.level() == StatusLevel::Error && e.action() == Some("bootstrap"))
        .expect("an error event");
    assert_eq!(failure.metadata()["phase"], "project_applied");
}

/// Story: the AppProject cannot be applied. That is reported as a warning
/// and the root application is still created.
#[tokio::test]
async fn story_project_failure_only_warns() {
    let (_remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::failing("AppProject"));

    let outcome = orchestrator(config(&url), &cluster)
        .run(&Context::new())
        .await
        .unwrap();

    assert!(!outcome.phases.contains(&Phase::ProjectApplied));
    assert!(outcome.phases.contains(&Phase::RootAppApplied));
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("platform"));
    assert!(cluster.contains("Application/argocd/root"));
}

/// Story: the cluster was rebuilt but git still has the marker. The run
/// skips and tells the operator how to recover; a forced run recreates the
/// root application without a new commit.
#[tokio::test]
async fn story_rebuilt_cluster_is_detected_and_recovered() {
    let (remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());
    let ctx = Context::new();

    orchestrator(config(&url), &cluster).run(&ctx).await.unwrap();
    cluster.remove("Application/argocd/root");

    let skipped = orchestrator(config(&url), &cluster).run(&ctx).await.unwrap();
    assert!(skipped.is_skipped());
    assert_eq!(skipped.warnings.len(), 1);
    assert!(skipped.warnings[0].contains("--force-render"));

    let forced = orchestrator(config(&url).with_force_render(true), &cluster)
        .run(&ctx)
        .await
        .unwrap();
    assert_eq!(forced.status, BootstrapStatus::Bootstrapped { commit: None });
    assert!(cluster.contains("Application/argocd/root"));
    assert_eq!(commit_count(remote.path()), 2);
}

/// Story: disabling an application and forcing a render removes its file
#[tokio::test]
async fn story_forced_render_prunes_disabled_applications() {
    let (remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());
    let ctx = Context::new();

    let two = BootstrapConfig::new(
        url.as_str(),
        template().with_application(AppConfig::new("ingress-nginx")),
    );
    orchestrator(two, &cluster).run(&ctx).await.unwrap();
    assert!(remote_has(remote.path(), "apps/ingress-nginx.yaml"));

    let one = BootstrapConfig::new(url.as_str(), template()).with_force_render(true);
    let outcome = orchestrator(one, &cluster).run(&ctx).await.unwrap();
    assert!(matches!(
        outcome.status,
        BootstrapStatus::Bootstrapped { commit: Some(_) }
    ));
    assert!(!remote_has(remote.path(), "apps/ingress-nginx.yaml"));
    assert!(remote_has(remote.path(), "apps/cert-manager.yaml"));
    assert!(remote_has(remote.path(), ".bootstrapped"));
    assert_eq!(commit_count(remote.path()), 3);
}

#[tokio::test]
async fn root_application_sync_is_awaited() {
    let (_remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::converging());
    let wait = WaitOptions::new(Duration::from_secs(2)).with_tick(Duration::from_millis(20));

    let outcome = orchestrator(config(&url).with_sync_wait(wait), &cluster)
        .run(&Context::new())
        .await
        .unwrap();
    assert!(outcome.phases.contains(&Phase::RootAppSynced));
    assert!(outcome.warnings.is_empty());
}

#[tokio::test]
async fn sync_timeout_is_a_warning() {
    let (_remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());
    let wait = WaitOptions::new(Duration::from_millis(200)).with_tick(Duration::from_millis(50));

    let outcome = orchestrator(config(&url).with_sync_wait(wait), &cluster)
        .run(&Context::new())
        .await
        .unwrap();
    assert!(!outcome.phases.contains(&Phase::RootAppSynced));
    assert_eq!(outcome.phases.last(), Some(&Phase::Done));
    assert_eq!(outcome.warnings.len(), 1);
    assert!(outcome.warnings[0].contains("not converged"));
}

#[tokio::test]
async fn without_a_cluster_the_run_stops_after_the_push() {
    let (remote, url) = bare_remote();

    let outcome = Orchestrator::with_credentials(config(&url), Arc::new(StaticToken), None)
        .unwrap()
        .run(&Context::new())
        .await
        .unwrap();

    assert_eq!(outcome.phases.last(), Some(&Phase::Done));
    assert!(outcome.phases.contains(&Phase::Committed));
    assert!(!outcome.phases.contains(&Phase::NamespaceApplied));
    assert_eq!(commit_count(remote.path()), 2);
}

#[tokio::test]
async fn cancelled_run_touches_nothing() {
    let (remote, url) = bare_remote();
    let cluster = Arc::new(FakeCluster::default());
    let ctx = Context::new();
    ctx.cancel();

    let err = orchestrator(config(&url), &cluster)
        .run(&ctx)
        .await
        .unwrap_err();
    assert!(err.is_cancelled(), "got {err:?}");
    assert_eq!(commit_count(remote.path()), 1);
    assert!(!cluster.contains("Namespace/argocd"));
}
