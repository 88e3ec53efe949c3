//! GitOps repository handling for keel
//!
//! A [`GitOpsRepository`] owns a private clone of the configuration
//! repository for the duration of one bootstrap run: clone-or-pull, a
//! marker file that records a completed bootstrap, and a commit-and-push
//! that does nothing on a clean tree.

#![deny(missing_docs)]

pub mod credentials;
pub mod marker;
pub mod repository;

pub use credentials::{redact_url, CredentialProvider, Credentials, EnvCredentialProvider};
pub use marker::{BootstrapMarker, MARKER_FILE};
pub use repository::{CommitOutcome, GitOpsRepository, AUTHOR_EMAIL, AUTHOR_NAME};
