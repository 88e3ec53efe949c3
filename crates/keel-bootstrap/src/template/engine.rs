//! minijinja environment holding the built-in manifest templates
//!
//! Undefined variables are errors. Output is never auto-escaped; templates
//! pass user-supplied values through the `json` filter instead, which yields
//! a valid YAML scalar, sequence or mapping for any input.

use minijinja::{AutoEscape, Environment, ErrorKind, UndefinedBehavior, Value};
use serde::Serialize;

use super::error::TemplateError;

/// App-of-Apps
pub const ROOT_APP: &str = "root-app.yaml";
/// Argo CD AppProject
pub const PROJECT: &str = "project.yaml";
/// One catalog Application
pub const APPLICATION: &str = "application.yaml";
/// The Argo CD namespace
pub const NAMESPACE: &str = "namespace.yaml";
/// Argo CD repository credentials
pub const REPO_SECRET: &str = "repo-secret.yaml";
/// A user Secret
pub const SECRET: &str = "secret.yaml";

const TEMPLATES: &[(&str, &str)] = &[
    (ROOT_APP, include_str!("../../templates/root-app.yaml.j2")),
    (PROJECT, include_str!("../../templates/project.yaml.j2")),
    (APPLICATION, include_str!("../../templates/application.yaml.j2")),
    (NAMESPACE, include_str!("../../templates/namespace.yaml.j2")),
    (REPO_SECRET, include_str!("../../templates/repo-secret.yaml.j2")),
    (SECRET, include_str!("../../templates/secret.yaml.j2")),
];

/// Template engine with the manifest catalog loaded
pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    /// Load the built-in templates
    pub fn new() -> Result<Self, TemplateError> {
        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Strict);
        env.set_keep_trailing_newline(true);
        env.set_auto_escape_callback(|_| AutoEscape::None);
        env.add_filter("json", json);

        for (name, source) in TEMPLATES {
            env.add_template(name, source)
                .map_err(|source| TemplateError::Render {
                    template: (*name).to_string(),
                    source,
                })?;
        }

        Ok(Self { env })
    }

    /// Render a built-in template
    pub fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String, TemplateError> {
        let render_error = |source| TemplateError::Render {
            template: name.to_string(),
            source,
        };
        self.env
            .get_template(name)
            .map_err(render_error)?
            .render(ctx)
            .map_err(render_error)
    }
}

/// Serialize any value as JSON, which is also valid flow-style YAML.
///
/// Filters receive undefined values even in strict mode, so they are
/// rejected here rather than rendered as `null`.
fn json(value: Value) -> Result<String, minijinja::Error> {
    if value.is_undefined() {
        return Err(minijinja::Error::new(
            ErrorKind::UndefinedError,
            "undefined value passed to json",
        ));
    }
    serde_json::to_string(&value).map_err(|e| {
        minijinja::Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot serialize value: {}", e),
        )
    })
}
