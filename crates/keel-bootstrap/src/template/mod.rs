//! Manifest templates
//!
//! A fixed catalog of platform applications, rendered with minijinja into
//! the working tree layout Argo CD expects:
//!
//! ```text
//! <work dir>/
//!   root-app.yaml          App-of-Apps pointing at apps/
//!   projects/<project>.yaml
//!   apps/<application>.yaml
//! ```
//!
//! Secrets use the same engine but are rendered in memory only; they are
//! applied to the cluster and never written to the repository.

pub mod catalog;
mod data;
mod engine;
mod error;
mod renderer;

pub use data::{AppConfig, RepoSource, SecretConfig, TemplateData};
pub use engine::TemplateEngine;
pub use error::TemplateError;
pub use renderer::{
    ManifestRenderer, RenderedFile, APPS_DIR, PROJECTS_DIR, REPO_SECRET_NAME, ROOT_APP_FILE,
    ROOT_APP_NAME,
};
