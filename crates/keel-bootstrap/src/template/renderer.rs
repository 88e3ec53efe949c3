//! Renders the catalog into files and cluster resources

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use keel_common::reconcile::DeclarativeResource;
use keel_common::{Error, Result, SERVICE_NAME};
use keel_gitops::Credentials;
use serde::Serialize;
use tracing::debug;

use super::catalog;
use super::data::{RepoSource, TemplateData};
use super::engine::{self, TemplateEngine};
use super::error::TemplateError;

/// Name of the root App-of-Apps
pub const ROOT_APP_NAME: &str = "root";

/// Name of the Argo CD repository credential Secret
pub const REPO_SECRET_NAME: &str = "keel-repository";

/// Directory, relative to the work dir, holding one file per application
pub const APPS_DIR: &str = "apps";

/// Directory, relative to the work dir, holding project definitions
pub const PROJECTS_DIR: &str = "projects";

/// File name of the root application
pub const ROOT_APP_FILE: &str = "root-app.yaml";

/// A rendered file, relative to the work directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    /// Path relative to the work directory
    pub path: PathBuf,
    /// File contents
    pub contents: String,
}

#[derive(Serialize)]
struct ManifestContext<'a> {
    cluster_name: &'a str,
    argocd_namespace: &'a str,
    project: &'a str,
    managed_by: &'a str,
    root_app_name: &'a str,
    repo_url: &'a str,
    branch: &'a str,
    apps_path: String,
    source_repos: Vec<&'a str>,
    applications: Vec<ApplicationContext<'a>>,
}

#[derive(Serialize)]
struct ApplicationContext<'a> {
    name: &'a str,
    chart: &'a str,
    chart_repo: &'a str,
    version: &'a str,
    namespace: &'a str,
    values: &'a serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize)]
struct SingleApplication<'a> {
    #[serde(flatten)]
    manifest: &'a ManifestContext<'a>,
    app: &'a ApplicationContext<'a>,
}

#[derive(Serialize)]
struct RepoSecretContext<'a> {
    secret_name: &'a str,
    argocd_namespace: &'a str,
    managed_by: &'a str,
    repo_url: &'a str,
    ssh_private_key: Option<&'a str>,
    username: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct SecretContext<'a> {
    managed_by: &'a str,
    secret: SecretValues<'a>,
}

#[derive(Serialize)]
struct SecretValues<'a> {
    name: &'a str,
    namespace: &'a str,
    data: &'a std::collections::BTreeMap<String, String>,
}

/// Renders manifests for one cluster
pub struct ManifestRenderer {
    engine: TemplateEngine,
}

impl ManifestRenderer {
    /// Create a renderer with the built-in templates
    pub fn new() -> Result<Self> {
        Ok(Self {
            engine: TemplateEngine::new()?,
        })
    }

    /// Render the repository layout: root app, project, one file per app
    pub fn render_catalog(&self, data: &TemplateData, source: &RepoSource) -> Result<Vec<RenderedFile>> {
        data.validate()?;
        let ctx = manifest_context(data, source);

        let mut files = Vec::with_capacity(ctx.applications.len() + 2);
        files.push(RenderedFile {
            path: PathBuf::from(ROOT_APP_FILE),
            contents: self.engine.render(engine::ROOT_APP, &ctx)?,
        });
        files.push(RenderedFile {
            path: Path::new(PROJECTS_DIR).join(format!("{}.yaml", data.project)),
            contents: self.engine.render(engine::PROJECT, &ctx)?,
        });
        for app in &ctx.applications {
            let single = SingleApplication {
                manifest: &ctx,
                app,
            };
            files.push(RenderedFile {
                path: Path::new(APPS_DIR).join(format!("{}.yaml", app.name)),
                contents: self.engine.render(engine::APPLICATION, &single)?,
            });
        }

        for file in &files {
            parse(&file.path.display().to_string(), &file.contents)?;
        }
        Ok(files)
    }

    /// Write rendered files under `work_dir`.
    ///
    /// Application files no longer in `files` are removed, so disabling an
    /// application prunes it on the next forced render.
    pub fn write_files(&self, work_dir: &Path, files: &[RenderedFile]) -> Result<Vec<PathBuf>> {
        let wanted: BTreeSet<&Path> = files.iter().map(|f| f.path.as_path()).collect();
        prune_stale_apps(work_dir, &wanted)?;

        let mut written = Vec::with_capacity(files.len());
        for file in files {
            let path = work_dir.join(&file.path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            std::fs::write(&path, &file.contents).map_err(|e| Error::io(&path, e))?;
            debug!(path = %file.path.display(), "rendered");
            written.push(path);
        }
        Ok(written)
    }

    /// The Argo CD namespace
    pub fn namespace(&self, data: &TemplateData) -> Result<DeclarativeResource> {
        #[derive(Serialize)]
        struct NamespaceContext<'a> {
            argocd_namespace: &'a str,
            managed_by: &'a str,
        }
        let text = self.engine.render(
            engine::NAMESPACE,
            NamespaceContext {
                argocd_namespace: &data.argocd_namespace,
                managed_by: SERVICE_NAME,
            },
        )?;
        parse(engine::NAMESPACE, &text)
    }

    /// Parse a rendered file back into a cluster resource
    pub fn resource_from_file(&self, file: &RenderedFile) -> Result<DeclarativeResource> {
        parse(&file.path.display().to_string(), &file.contents)
    }

    /// Argo CD repository Secret for `credentials`. Rendered in memory only.
    pub fn repository_secret(
        &self,
        data: &TemplateData,
        source: &RepoSource,
        credentials: &Credentials,
    ) -> Result<DeclarativeResource> {
        let (ssh_private_key, password) = match credentials {
            Credentials::SshKey(key) => (Some(key.as_str()), ""),
            Credentials::Token(token) => (None, token.as_str()),
        };
        let text = zeroize::Zeroizing::new(self.engine.render(
            engine::REPO_SECRET,
            RepoSecretContext {
                secret_name: REPO_SECRET_NAME,
                argocd_namespace: &data.argocd_namespace,
                managed_by: SERVICE_NAME,
                repo_url: &source.url,
                ssh_private_key,
                username: keel_gitops::credentials::DEFAULT_TOKEN_USERNAME,
                password,
            },
        )?);
        parse(engine::REPO_SECRET, &text)
    }

    /// User Secrets from the template data. Rendered in memory only.
    pub fn secrets(&self, data: &TemplateData) -> Result<Vec<DeclarativeResource>> {
        data.secrets
            .iter()
            .map(|secret| {
                let text = zeroize::Zeroizing::new(self.engine.render(
                    engine::SECRET,
                    SecretContext {
                        managed_by: SERVICE_NAME,
                        secret: SecretValues {
                            name: &secret.name,
                            namespace: secret
                                .namespace
                                .as_deref()
                                .unwrap_or(&data.argocd_namespace),
                            data: &secret.data,
                        },
                    },
                )?);
                parse(engine::SECRET, &text)
            })
            .collect()
    }
}

fn manifest_context<'a>(data: &'a TemplateData, source: &'a RepoSource) -> ManifestContext<'a> {
    let applications: Vec<ApplicationContext<'a>> = data
        .applications
        .iter()
        .filter_map(|app| {
            catalog::lookup(&app.name).map(|entry| ApplicationContext {
                name: entry.name,
                chart: entry.chart,
                chart_repo: entry.chart_repo,
                version: app.version.as_deref().unwrap_or(entry.version),
                namespace: entry.namespace,
                values: &app.values,
            })
        })
        .collect();

    let mut source_repos = vec![source.url.as_str()];
    for app in &applications {
        if !source_repos.contains(&app.chart_repo) {
            source_repos.push(app.chart_repo);
        }
    }

    ManifestContext {
        cluster_name: &data.cluster_name,
        argocd_namespace: &data.argocd_namespace,
        project: &data.project,
        managed_by: SERVICE_NAME,
        root_app_name: ROOT_APP_NAME,
        repo_url: &source.url,
        branch: &source.branch,
        apps_path: source.apps_path(),
        source_repos,
        applications,
    }
}

fn parse(template: &str, text: &str) -> Result<DeclarativeResource> {
    let body: serde_json::Value = serde_yaml::from_str(text).map_err(|e| TemplateError::InvalidOutput {
        template: template.to_string(),
        message: e.to_string(),
    })?;
    DeclarativeResource::from_value(body).map_err(|e| {
        TemplateError::InvalidOutput {
            template: template.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

fn prune_stale_apps(work_dir: &Path, wanted: &BTreeSet<&Path>) -> Result<()> {
    let apps_dir = work_dir.join(APPS_DIR);
    let entries = match std::fs::read_dir(&apps_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(Error::io(&apps_dir, e)),
    };

    for entry in entries {
        let entry = entry.map_err(|e| Error::io(&apps_dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yaml") {
            continue;
        }
        let relative = Path::new(APPS_DIR).join(entry.file_name());
        if !wanted.contains(relative.as_path()) {
            debug!(path = %relative.display(), "removing disabled application");
            std::fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
    }
    Ok(())
}
