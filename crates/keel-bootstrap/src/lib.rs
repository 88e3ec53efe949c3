//! Bootstrap orchestration for keel
//!
//! Renders the platform catalog into the configuration repository, commits
//! it once, then creates the Argo CD project, credentials and root
//! App-of-Apps on the cluster.

#![deny(missing_docs)]

pub mod orchestrator;
pub mod template;

pub use orchestrator::{
    bootstrap, BootstrapConfig, BootstrapOutcome, BootstrapStatus, Orchestrator, Phase,
};
pub use template::{
    AppConfig, ManifestRenderer, RenderedFile, RepoSource, SecretConfig, TemplateData,
    TemplateEngine, TemplateError,
};
