//! Template error types

use thiserror::Error;

/// Errors from rendering the manifest catalog
#[derive(Debug, Error)]
pub enum TemplateError {
    /// minijinja failed to load or render a template
    #[error("template {template}: {source}")]
    Render {
        /// Template name
        template: String,
        /// The underlying minijinja error
        #[source]
        source: minijinja::Error,
    },

    /// An enabled application is not in the catalog
    #[error("unknown application {name:?} (available: {available})")]
    UnknownApplication {
        /// Requested name
        name: String,
        /// Comma-separated catalog names
        available: String,
    },

    /// Template data failed validation
    #[error("invalid {field}: {message}")]
    InvalidData {
        /// Offending field
        field: String,
        /// What is wrong with it
        message: String,
    },

    /// Rendered text is not a usable resource document
    #[error("{template} rendered an invalid document: {message}")]
    InvalidOutput {
        /// Template name
        template: String,
        /// Parse failure
        message: String,
    },
}

impl TemplateError {
    /// Create an invalid data error
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidData {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Template or field the error is about
    pub fn subject(&self) -> &str {
        match self {
            Self::Render { template, .. } => template,
            Self::UnknownApplication { name, .. } => name,
            Self::InvalidData { field, .. } => field,
            Self::InvalidOutput { template, .. } => template,
        }
    }
}

impl From<TemplateError> for keel_common::Error {
    fn from(err: TemplateError) -> Self {
        keel_common::Error::render(err.subject().to_string(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_into_render_error() {
        let err = TemplateError::UnknownApplication {
            name: "istio".to_string(),
            available: "cert-manager, ingress-nginx".to_string(),
        };
        let core: keel_common::Error = err.into();
        assert!(matches!(core, keel_common::Error::Render { .. }));
        assert!(core.to_string().contains("istio"));
        assert!(core.to_string().contains("cert-manager"));
    }

    #[test]
    fn invalid_data_names_the_field() {
        let err = TemplateError::invalid("cluster_name", "must not be empty");
        assert_eq!(err.to_string(), "invalid cluster_name: must not be empty");
        assert_eq!(err.subject(), "cluster_name");
    }
}
