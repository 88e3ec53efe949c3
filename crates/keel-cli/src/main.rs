//! keel CLI
//!
//! Bootstraps a cluster into GitOps and waits for it to converge.

use std::process::ExitCode;

use clap::Parser;
use keel_common::status::{log_event, start_handler, HandlerOptions};
use keel_common::Context;
use tracing::{error, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use keel_cli::{Cli, LogFormat};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match cli.log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(false))
            .init(),
    }

    let root = Context::new();
    let interrupt = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let (ctx, status) = start_handler(&root, HandlerOptions::default(), log_event);
    let result = cli.run(&ctx).await;
    drop(ctx);
    status.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "keel failed");
            ExitCode::from(e.exit_code())
        }
    }
}
