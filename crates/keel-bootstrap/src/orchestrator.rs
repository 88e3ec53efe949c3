//! The bootstrap sequence
//!
//! ```text
//! NotStarted -> AuthValidated -> RepoInitialized
//!   -> AlreadyBootstrapped                          (marker present, not forced)
//!   -> ManifestsRendered -> MarkerWritten -> Committed
//!      -> NamespaceApplied -> ProjectApplied -> SecretsApplied -> RootAppApplied
//!      -> RootAppSynced                             (only with a sync wait)
//! -> Done
//! ```
//!
//! Every step is idempotent, so a failed or cancelled run is fixed by running
//! again. The project is best effort; every other failure aborts the run.
//! The repository clone is removed whether the run succeeds or not.

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use keel_common::convergence::{wait_for_application_converged, WaitOptions};
use keel_common::kube_utils::{ArgoApplication, HasApiResource};
use keel_common::reconcile::{self, DeclarativeResource, ResourceClient, ResourceRef};
use keel_common::{Context, Error, Result, StatusEvent};
use keel_gitops::{CommitOutcome, CredentialProvider, EnvCredentialProvider, GitOpsRepository};
use tracing::{debug, error, info, instrument, warn};

use crate::template::{
    ManifestRenderer, RenderedFile, RepoSource, TemplateData, PROJECTS_DIR, ROOT_APP_FILE,
    ROOT_APP_NAME,
};

/// Default branch
pub const DEFAULT_BRANCH: &str = "main";

/// Steps of a bootstrap run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing done yet
    NotStarted,
    /// Credentials can list the remote
    AuthValidated,
    /// The repository is cloned and up to date
    RepoInitialized,
    /// The marker was found; nothing else was done
    AlreadyBootstrapped,
    /// Catalog files were written to the work directory
    ManifestsRendered,
    /// The bootstrap marker exists in the work directory
    MarkerWritten,
    /// Changes are pushed (or there were none)
    Committed,
    /// The Argo CD namespace exists
    NamespaceApplied,
    /// The AppProject was applied
    ProjectApplied,
    /// Repository and user Secrets exist
    SecretsApplied,
    /// The root App-of-Apps was applied
    RootAppApplied,
    /// The root application reported Healthy and Synced
    RootAppSynced,
    /// The run finished
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::NotStarted => "not_started",
            Phase::AuthValidated => "auth_validated",
            Phase::RepoInitialized => "repo_initialized",
            Phase::AlreadyBootstrapped => "already_bootstrapped",
            Phase::ManifestsRendered => "manifests_rendered",
            Phase::MarkerWritten => "marker_written",
            Phase::Committed => "committed",
            Phase::NamespaceApplied => "namespace_applied",
            Phase::ProjectApplied => "project_applied",
            Phase::SecretsApplied => "secrets_applied",
            Phase::RootAppApplied => "root_app_applied",
            Phase::RootAppSynced => "root_app_synced",
            Phase::Done => "done",
        };
        f.write_str(s)
    }
}

/// Everything one run needs
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Repository URL, branch and sub-path
    pub source: RepoSource,
    /// Environment variable holding an SSH private key
    pub ssh_key_env: Option<String>,
    /// Environment variable holding a bearer token
    pub token_env: Option<String>,
    /// What to render
    pub template: TemplateData,
    /// Render and push even if the marker exists
    pub force_render: bool,
    /// Wait for the root application to converge after applying it
    pub sync_wait: Option<WaitOptions>,
}

impl BootstrapConfig {
    /// Config for `repo_url` on the default branch at the repository root
    pub fn new(repo_url: impl Into<String>, template: TemplateData) -> Self {
        Self {
            source: RepoSource {
                url: repo_url.into(),
                branch: DEFAULT_BRANCH.to_string(),
                path: String::new(),
            },
            ssh_key_env: None,
            token_env: None,
            template,
            force_render: false,
            sync_wait: None,
        }
    }

    /// Use another branch
    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.source.branch = branch.into();
        self
    }

    /// Write under a directory of the repository
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.source.path = path.into();
        self
    }

    /// Read an SSH private key from `name`
    pub fn with_ssh_key_env(mut self, name: impl Into<String>) -> Self {
        self.ssh_key_env = Some(name.into());
        self
    }

    /// Read a token from `name`
    pub fn with_token_env(mut self, name: impl Into<String>) -> Self {
        self.token_env = Some(name.into());
        self
    }

    /// Render and push even when already bootstrapped
    pub fn with_force_render(mut self, force: bool) -> Self {
        self.force_render = force;
        self
    }

    /// Wait for the root application after applying it
    pub fn with_sync_wait(mut self, options: WaitOptions) -> Self {
        self.sync_wait = Some(options);
        self
    }

    /// Message of the bootstrap commit
    pub fn commit_message(&self) -> String {
        format!("keel: bootstrap cluster {}", self.template.cluster_name)
    }
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapStatus {
    /// Manifests were rendered and applied
    Bootstrapped {
        /// Pushed commit, `None` if the tree was already up to date
        commit: Option<String>,
    },
    /// The marker was present; the run skipped everything
    AlreadyBootstrapped,
}

/// Result of a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// How the run ended
    pub status: BootstrapStatus,
    /// Phases visited, in order
    pub phases: Vec<Phase>,
    /// Best-effort failures reported as warnings
    pub warnings: Vec<String>,
}

impl BootstrapOutcome {
    /// Whether the run skipped because the repository was already bootstrapped
    pub fn is_skipped(&self) -> bool {
        self.status == BootstrapStatus::AlreadyBootstrapped
    }
}

/// Runs one bootstrap
pub struct Orchestrator {
    config: BootstrapConfig,
    repository: GitOpsRepository,
    credentials: Arc<dyn CredentialProvider>,
    client: Option<Arc<dyn ResourceClient>>,
    renderer: ManifestRenderer,
    phases: Vec<Phase>,
    warnings: Vec<String>,
}

impl Orchestrator {
    /// Build an orchestrator reading credentials from the configured
    /// environment variables.
    ///
    /// Without a cluster client the run stops after the push.
    pub fn new(config: BootstrapConfig, client: Option<Arc<dyn ResourceClient>>) -> Result<Self> {
        let credentials: Arc<dyn CredentialProvider> = Arc::new(EnvCredentialProvider::new(
            config.ssh_key_env.as_deref(),
            config.token_env.as_deref(),
        )?);
        Self::with_credentials(config, credentials, client)
    }

    /// Build an orchestrator with an explicit credential provider
    pub fn with_credentials(
        config: BootstrapConfig,
        credentials: Arc<dyn CredentialProvider>,
        client: Option<Arc<dyn ResourceClient>>,
    ) -> Result<Self> {
        config.template.validate()?;
        let repository = GitOpsRepository::new(
            config.source.url.as_str(),
            config.source.branch.as_str(),
            Some(config.source.path.as_str()),
            Arc::clone(&credentials),
        )?;

        Ok(Self {
            config,
            repository,
            credentials,
            client,
            renderer: ManifestRenderer::new()?,
            phases: vec![Phase::NotStarted],
            warnings: Vec::new(),
        })
    }

    /// Run the sequence to completion. The clone is removed on every path.
    #[instrument(
        skip(self, ctx),
        fields(cluster = %self.config.template.cluster_name, remote = %self.repository.display_url())
    )]
    pub async fn run(mut self, ctx: &Context) -> Result<BootstrapOutcome> {
        let result = self.execute(ctx).await;
        if let Err(e) = self.repository.cleanup() {
            warn!(error = %e, "failed to remove repository clone");
        }

        match result {
            Ok(status) => {
                self.enter(Phase::Done);
                info!(phases = self.phases.len(), warnings = self.warnings.len(), "bootstrap finished");
                let message = match &status {
                    BootstrapStatus::AlreadyBootstrapped => "bootstrap skipped".to_string(),
                    BootstrapStatus::Bootstrapped { .. } => {
                        format!("cluster {} bootstrapped", self.config.template.cluster_name)
                    }
                };
                ctx.send(
                    StatusEvent::success(message)
                        .with_action("bootstrap")
                        .with_metadata("warnings", self.warnings.len()),
                );
                Ok(BootstrapOutcome {
                    status,
                    phases: self.phases,
                    warnings: self.warnings,
                })
            }
            Err(e) => {
                let phase = self.current_phase();
                error!(phase = %phase, error = %e, "bootstrap failed");
                ctx.send(
                    StatusEvent::error(format!("bootstrap failed after {}: {}", phase, e))
                        .with_action("bootstrap")
                        .with_metadata("phase", phase.to_string()),
                );
                Err(e)
            }
        }
    }

    /// Phases visited so far
    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    fn current_phase(&self) -> Phase {
        self.phases.last().copied().unwrap_or(Phase::NotStarted)
    }

    fn enter(&mut self, phase: Phase) {
        debug!(phase = %phase, "entered phase");
        self.phases.push(phase);
    }

    fn warn(&mut self, ctx: &Context, message: String) {
        warn!("{}", message);
        ctx.send(StatusEvent::warning(&message).with_action("bootstrap"));
        self.warnings.push(message);
    }

    async fn execute(&mut self, ctx: &Context) -> Result<BootstrapStatus> {
        self.repository.validate_auth(ctx).await?;
        self.enter(Phase::AuthValidated);

        self.repository.init(ctx).await?;
        self.enter(Phase::RepoInitialized);

        let marker = self.repository.bootstrap_marker(ctx)?;
        let bootstrapped = marker.is_some();
        if let (Some(marker), false) = (marker, self.config.force_render) {
            let at = marker.bootstrapped_at().to_rfc3339();
            info!(bootstrapped_at = %at, "already bootstrapped, skipping");
            ctx.send(
                StatusEvent::info("already bootstrapped, skipping")
                    .with_resource(self.repository.display_url())
                    .with_metadata("bootstrapped_at", at),
            );
            self.enter(Phase::AlreadyBootstrapped);
            self.check_root_app(ctx).await;
            return Ok(BootstrapStatus::AlreadyBootstrapped);
        }

        let files = self
            .renderer
            .render_catalog(&self.config.template, &self.config.source)?;
        let work_dir = self.repository.work_dir()?.to_path_buf();
        self.renderer.write_files(&work_dir, &files)?;
        ctx.send(
            StatusEvent::success(format!("rendered {} manifests", files.len()))
                .with_action("render")
                .with_metadata("files", files.len()),
        );
        self.enter(Phase::ManifestsRendered);

        if !bootstrapped {
            self.repository.write_bootstrap_marker(ctx)?;
        }
        self.enter(Phase::MarkerWritten);

        let message = self.config.commit_message();
        let commit = match self.repository.commit_and_push(ctx, &message).await? {
            CommitOutcome::Clean => None,
            CommitOutcome::Pushed { commit } => Some(commit),
        };
        self.enter(Phase::Committed);

        let Some(client) = self.client.clone() else {
            ctx.send(StatusEvent::info(
                "no cluster client configured, skipping cluster resources",
            ));
            return Ok(BootstrapStatus::Bootstrapped { commit });
        };
        self.apply_cluster_resources(ctx, client.as_ref(), &files)
            .await?;

        Ok(BootstrapStatus::Bootstrapped { commit })
    }

    async fn apply_cluster_resources(
        &mut self,
        ctx: &Context,
        client: &dyn ResourceClient,
        files: &[RenderedFile],
    ) -> Result<()> {
        let namespace = self.renderer.namespace(&self.config.template)?;
        reconcile::apply(ctx, client, &namespace).await?;
        self.enter(Phase::NamespaceApplied);

        let project_path = Path::new(PROJECTS_DIR).join(format!("{}.yaml", self.config.template.project));
        let project = self.resource_at(files, &project_path)?;
        match reconcile::apply(ctx, client, &project).await {
            Ok(_) => self.enter(Phase::ProjectApplied),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => self.warn(ctx, format!("project {} was not applied: {}", project.name(), e)),
        }

        let repo_secret = {
            let credentials = self.credentials.resolve()?;
            self.renderer
                .repository_secret(&self.config.template, &self.config.source, &credentials)?
        };
        reconcile::create_if_absent(ctx, client, &repo_secret).await?;
        for secret in self.renderer.secrets(&self.config.template)? {
            reconcile::create_if_absent(ctx, client, &secret).await?;
        }
        self.enter(Phase::SecretsApplied);

        let root_app = self.resource_at(files, Path::new(ROOT_APP_FILE))?;
        reconcile::apply(ctx, client, &root_app).await?;
        self.enter(Phase::RootAppApplied);

        if let Some(options) = self.config.sync_wait {
            let namespace = self.config.template.argocd_namespace.clone();
            match wait_for_application_converged(ctx, client, &namespace, ROOT_APP_NAME, options).await {
                Ok(()) => self.enter(Phase::RootAppSynced),
                Err(e) if !e.is_fatal_for_bootstrap() => {
                    self.warn(ctx, format!("root application has not converged yet: {}", e))
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn resource_at(&self, files: &[RenderedFile], path: &Path) -> Result<DeclarativeResource> {
        let file = files.iter().find(|f| f.path == path).ok_or_else(|| {
            Error::internal_with_context("render", format!("{} was not rendered", path.display()))
        })?;
        self.renderer.resource_from_file(file)
    }

    /// The marker says bootstrapped; warn if the cluster disagrees
    async fn check_root_app(&mut self, ctx: &Context) {
        let Some(client) = self.client.clone() else {
            return;
        };
        let target = ResourceRef {
            api_resource: ArgoApplication::api_resource(),
            namespace: Some(self.config.template.argocd_namespace.clone()),
            name: ROOT_APP_NAME.to_string(),
        };

        match client.get(&target).await {
            Ok(Some(_)) => debug!(resource = %target, "root application present"),
            Ok(None) => self.warn(
                ctx,
                format!(
                    "bootstrap marker is present but root application {} does not exist; \
                     re-run with --force-render to recreate it",
                    target
                ),
            ),
            Err(e) => self.warn(
                ctx,
                format!("could not check root application {}: {}", target, e),
            ),
        }
    }
}

/// Build an [`Orchestrator`] from `config` and run it
pub async fn bootstrap(
    ctx: &Context,
    config: BootstrapConfig,
    client: Option<Arc<dyn ResourceClient>>,
) -> Result<BootstrapOutcome> {
    Orchestrator::new(config, client)?.run(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::AppConfig;

    fn config() -> BootstrapConfig {
        BootstrapConfig::new(
            "https://github.com/acme/fleet.git",
            TemplateData::new("dev").with_application(AppConfig::new("cert-manager")),
        )
    }

    #[test]
    fn config_defaults() {
        let config = config();
        assert_eq!(config.source.branch, "main");
        assert_eq!(config.source.path, "");
        assert!(!config.force_render);
        assert!(config.sync_wait.is_none());
        assert_eq!(config.commit_message(), "keel: bootstrap cluster dev");
    }

    #[test]
    fn credential_sources_are_checked_at_construction() {
        let err = Orchestrator::new(config(), None).err().expect("no credential source");
        assert!(matches!(err, Error::Auth { .. }));

        let both = config().with_ssh_key_env("GIT_SSH_KEY").with_token_env("GIT_TOKEN");
        assert!(matches!(Orchestrator::new(both, None), Err(Error::Auth { .. })));
    }

    #[test]
    fn invalid_template_data_is_rejected_before_any_git_work() {
        let bad = BootstrapConfig::new(
            "https://github.com/acme/fleet.git",
            TemplateData::new("dev").with_application(AppConfig::new("istio")),
        )
        .with_token_env("GIT_TOKEN");
        assert!(matches!(Orchestrator::new(bad, None), Err(Error::Render { .. })));
    }

    #[test]
    fn new_orchestrator_has_not_started() {
        let orchestrator = Orchestrator::new(config().with_token_env("GIT_TOKEN"), None).unwrap();
        assert_eq!(orchestrator.phases(), &[Phase::NotStarted]);
    }

    #[test]
    fn phases_display_in_snake_case() {
        assert_eq!(Phase::RepoInitialized.to_string(), "repo_initialized");
        assert_eq!(Phase::RootAppSynced.to_string(), "root_app_synced");
    }
}
