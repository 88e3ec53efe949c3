//! Error types for keel
//!
//! Errors are structured with fields to aid debugging. Each variant carries
//! the operation or resource it failed on. Credential values never appear in
//! any message; remote URLs are redacted before they are stored here.

use std::time::Duration;

use thiserror::Error;

/// Main error type for keel operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Credential resolution or remote authentication failed
    #[error("auth error [{context}]: {message}")]
    Auth {
        /// Where authentication failed (e.g. "resolve", "ls-remote")
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Initial clone of the remote failed
    #[error("clone error for {remote}: {message}")]
    Clone {
        /// Redacted remote URL
        remote: String,
        /// Description of what failed
        message: String,
    },

    /// Refreshing an existing clone failed
    #[error("pull error for {remote}: {message}")]
    Pull {
        /// Redacted remote URL
        remote: String,
        /// Description of what failed
        message: String,
    },

    /// Pushing a commit to the remote failed
    #[error("push error for {remote}: {message}")]
    Push {
        /// Redacted remote URL
        remote: String,
        /// Description of what failed
        message: String,
        /// Remote moved underneath us; caller should pull and re-run
        non_fast_forward: bool,
    },

    /// Local working tree operation failed (status, index, commit, marker)
    #[error("repository error [{context}]: {message}")]
    Repository {
        /// Operation that failed
        context: String,
        /// Description of what failed
        message: String,
    },

    /// Template rendering failed (invalid template data)
    #[error("render error for {template}: {message}")]
    Render {
        /// Template name
        template: String,
        /// Description of what failed
        message: String,
    },

    /// Create-or-update of a cluster resource failed
    #[error("reconcile error for {resource}: {message}")]
    Reconcile {
        /// `kind/namespace/name` of the resource
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// A polled condition was not observed before the deadline
    #[error("timed out after {timeout:?} waiting for {description}{}", last_error.as_ref().map(|e| format!(" (last error: {e})")).unwrap_or_default())]
    ConvergenceTimeout {
        /// What was being waited for
        description: String,
        /// The configured timeout
        timeout: Duration,
        /// Last fetch error observed, if any
        last_error: Option<String>,
    },

    /// The operation observed a cancelled context
    #[error("cancelled while {context}")]
    Cancelled {
        /// What was in progress
        context: String,
    },

    /// Filesystem error outside of git (marker, rendered files)
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being read or written
        path: String,
        /// The underlying I/O error
        source: std::io::Error,
    },

    /// Invalid configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
        /// The offending field, if known
        field: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Context where the error occurred
        context: String,
        /// Description of what failed
        message: String,
    },
}

impl Error {
    /// Create an auth error
    pub fn auth(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Auth {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a clone error
    pub fn clone_failed(remote: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Clone {
            remote: remote.into(),
            message: msg.into(),
        }
    }

    /// Create a pull error
    pub fn pull(remote: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Pull {
            remote: remote.into(),
            message: msg.into(),
        }
    }

    /// Create a push error
    pub fn push(remote: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Push {
            remote: remote.into(),
            message: msg.into(),
            non_fast_forward: false,
        }
    }

    /// Create a push error for a rejected non-fast-forward update
    pub fn push_non_fast_forward(remote: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Push {
            remote: remote.into(),
            message: msg.into(),
            non_fast_forward: true,
        }
    }

    /// Create a local repository error
    pub fn repository(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Repository {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Create a render error
    pub fn render(template: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Render {
            template: template.into(),
            message: msg.into(),
        }
    }

    /// Create a reconcile error for a resource
    pub fn reconcile(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Reconcile {
            resource: resource.into(),
            message: msg.into(),
        }
    }

    /// Create a convergence timeout error
    pub fn convergence_timeout(
        description: impl Into<String>,
        timeout: Duration,
        last_error: Option<String>,
    ) -> Self {
        Self::ConvergenceTimeout {
            description: description.into(),
            timeout,
            last_error,
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an I/O error for a path
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: None,
        }
    }

    /// Create a configuration error for a specific field
    pub fn config_for_field(field: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Check if re-running the failed operation may succeed
    ///
    /// Auth, render and configuration errors need a fix from the operator.
    /// Network-bound failures and timeouts may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                !matches!(source, kube::Error::Api(ae) if (400..500).contains(&ae.code))
            }
            Error::Auth { .. } => false,
            Error::Clone { .. } => true,
            Error::Pull { .. } => true,
            Error::Push { .. } => true,
            Error::Repository { .. } => false,
            Error::Render { .. } => false,
            Error::Reconcile { .. } => true,
            Error::ConvergenceTimeout { .. } => true,
            Error::Cancelled { .. } => false,
            Error::Io { .. } => false,
            Error::Config { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Whether this error must abort a bootstrap run
    ///
    /// Convergence timeouts are the only best-effort failure: the GitOps
    /// controller keeps converging after keel exits.
    pub fn is_fatal_for_bootstrap(&self) -> bool {
        !self.is_timeout()
    }

    /// Whether this is a convergence timeout
    ///
    /// Callers may downgrade these to warnings: the external system keeps
    /// converging in the background.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ConvergenceTimeout { .. })
    }

    /// Whether this error came from a cancelled context
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Auth { context, .. } => Some(context),
            Error::Repository { context, .. } => Some(context),
            Error::Cancelled { context } => Some(context),
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}
