pub mod commands;
pub mod core;

use tracing_subscriber::EnvFilter;

use crate::commands::Cli;
use crate::core::cancel::cancel_pair;
use crate::core::orchestrator::RunOutcome;

/// Structured logging to stderr; `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tabg_provisioner_lib=debug")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Run one command line. Ctrl-C flips the shared cancellation signal.
pub async fn run(cli: Cli) -> RunOutcome {
    tracing::info!("tabg-provisioner {} starting", env!("CARGO_PKG_VERSION"));

    let (handle, signal) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            handle.cancel();
        }
    });

    let outcome = commands::execute(cli, signal).await;
    interrupt.abort();

    match &outcome {
        RunOutcome::Done(_) => tracing::info!("Finished"),
        RunOutcome::Cancelled { phase } => tracing::warn!("Cancelled during {}", phase),
        RunOutcome::Failed { phase, error } => {
            tracing::error!("Failed in {}: {}", phase, error)
        }
    }
    outcome
}
