//! Check-auth command - verify the credentials can read the repository

use std::sync::Arc;

use clap::Args;
use keel_common::Context;
use keel_gitops::{EnvCredentialProvider, GitOpsRepository};

use super::RepoArgs;
use crate::config::{self, RepositoryConfig};
use crate::Result;

/// Verify repository credentials without cloning
#[derive(Args, Debug)]
pub struct CheckAuthArgs {
    #[command(flatten)]
    pub repo: RepoArgs,
}

pub async fn run(args: CheckAuthArgs, ctx: &Context) -> Result<()> {
    let file = config::load_optional(args.repo.config_file.as_deref())?;
    let repo = file.repository.resolve(RepositoryConfig::from(&args.repo))?;

    let credentials = EnvCredentialProvider::new(repo.ssh_key_env.as_deref(), repo.token_env.as_deref())?;
    let repository = GitOpsRepository::new(
        repo.source.url.as_str(),
        repo.source.branch.as_str(),
        Some(repo.source.path.as_str()),
        Arc::new(credentials),
    )?;

    repository.validate_auth(ctx).await?;
    println!(
        "Credentials can read {} (branch {})",
        repository.display_url(),
        repository.branch()
    );
    Ok(())
}
