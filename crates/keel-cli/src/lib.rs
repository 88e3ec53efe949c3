//! keel CLI library

pub mod commands;
pub mod config;
pub mod error;

pub use error::{Error, Result};

use clap::{Parser, Subcommand, ValueEnum};
use keel_common::Context;

/// keel - bootstrap Kubernetes clusters into GitOps
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true, env = "KEEL_LOG_FORMAT")]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// How log lines are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human readable
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Render the platform catalog into git and apply the root application
    Bootstrap(commands::bootstrap::BootstrapArgs),
    /// Check that the configured credentials can read the repository
    CheckAuth(commands::check_auth::CheckAuthArgs),
    /// Wait for the cluster to converge
    Wait(commands::wait::WaitArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, ctx: &Context) -> Result<()> {
        match self.command {
            Commands::Bootstrap(args) => commands::bootstrap::run(args, ctx).await,
            Commands::CheckAuth(args) => commands::check_auth::run(args, ctx).await,
            Commands::Wait(args) => commands::wait::run(args, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn bootstrap_flags_parse() {
        let cli = Cli::try_parse_from([
            "keel",
            "--log-format",
            "json",
            "bootstrap",
            "--repo-url",
            "https://github.com/acme/fleet.git",
            "--token-env",
            "GIT_TOKEN",
            "--cluster-name",
            "dev",
            "--app",
            "cert-manager",
            "--app",
            "metrics-server",
            "--force-render",
        ])
        .unwrap();

        assert_eq!(cli.log_format, LogFormat::Json);
        let Commands::Bootstrap(args) = cli.command else {
            panic!("expected bootstrap");
        };
        assert_eq!(args.apps, vec!["cert-manager", "metrics-server"]);
        assert_eq!(args.repo.token_env.as_deref(), Some("GIT_TOKEN"));
        assert!(args.force_render);
        assert!(args.kubeconfig.is_none());
    }

    #[test]
    fn ssh_key_and_token_conflict() {
        let parsed = Cli::try_parse_from([
            "keel",
            "check-auth",
            "--repo-url",
            "git@github.com:acme/fleet.git",
            "--ssh-key-env",
            "DEPLOY_KEY",
            "--token-env",
            "GIT_TOKEN",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn wait_workloads_parse_namespaced_names() {
        let cli = Cli::try_parse_from([
            "keel",
            "wait",
            "workloads",
            "--deployment",
            "argocd/argocd-server",
            "--timeout-secs",
            "60",
        ])
        .unwrap();

        let Commands::Wait(args) = cli.command else {
            panic!("expected wait");
        };
        assert_eq!(args.timeout_secs, 60);
        let commands::wait::WaitTarget::Workloads { deployments, .. } = args.target else {
            panic!("expected workloads");
        };
        assert_eq!(
            deployments,
            vec![("argocd".to_string(), "argocd-server".to_string())]
        );
    }

    #[test]
    fn wait_app_defaults_to_root() {
        let cli = Cli::try_parse_from(["keel", "wait", "app"]).unwrap();
        let Commands::Wait(args) = cli.command else {
            panic!("expected wait");
        };
        let commands::wait::WaitTarget::App { name, namespace } = args.target else {
            panic!("expected app");
        };
        assert_eq!(name, "root");
        assert_eq!(namespace, "argocd");
    }
}
