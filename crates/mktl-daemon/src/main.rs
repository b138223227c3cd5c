//! mktld - generic mKTL store daemon
//!
//! Serves whatever items a store's configuration file declares, with no
//! custom item classes. Intended as a reference implementation and for
//! exercising a store's configuration; instrument-specific daemons should
//! depend on this crate as a library and supply their own `DaemonHooks`.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use mktl_daemon::{Daemon, DefaultHooks};
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod cli;
use cli::Cli;

/// Bring up the daemon, wrapping its typed error in `anyhow` so this
/// outermost edge can report a chain of "why" rather than just the
/// innermost cause.
async fn run_daemon(cli: &Cli) -> anyhow::Result<Arc<Daemon>> {
    Daemon::start(&cli.store, &cli.config, &cli.address, cli.discovery_port, Arc::new(DefaultHooks))
        .await
        .with_context(|| format!("starting daemon for store '{}'", cli.store))
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let registry = tracing_subscriber::registry().with(EnvFilter::from_default_env().add_directive("mktl=info".parse().unwrap()));
    if cli.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    let daemon = match run_daemon(&cli).await {
        Ok(d) => d,
        Err(e) => {
            error!(error = format!("{e:#}"), "failed to start daemon");
            return ExitCode::FAILURE;
        }
    };

    // The daemon's background tasks (REP/PUB listeners, discovery
    // responder, persistence flusher) keep it alive independently of this
    // task; block here until Ctrl-C is pressed, then shut down cleanly.
    tokio::signal::ctrl_c().await.ok();
    drop(daemon);
    ExitCode::SUCCESS
}
