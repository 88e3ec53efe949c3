//! Common types for keel: errors, the status bus, the resource reconciler and
//! the convergence poller.

#![deny(missing_docs)]

pub mod context;
pub mod convergence;
pub mod error;
pub mod kube_utils;
pub mod reconcile;
pub mod status;

pub use context::Context;
pub use error::Error;
pub use status::{StatusEvent, StatusLevel};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the GitOps controller (Argo CD) runs in
pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";

/// Field manager / service identity used for everything keel writes
pub const SERVICE_NAME: &str = "keel-bootstrap";
