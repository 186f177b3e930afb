//! `run`: the reconciliation service.

use anyhow::{Context, Result};
use tokio::sync::watch;

use crate::cli::RunArgs;
use crate::db::Database;
use crate::services::ServiceLoop;

pub async fn run(args: &RunArgs) -> Result<()> {
    let registry_path = args.registry.path();
    let registry = Database::open(&registry_path)
        .with_context(|| format!("opening ownership registry {}", registry_path.display()))?;
    tracing::info!("Ownership registry: {}", registry_path.display());

    let service = ServiceLoop::new(&args.config, registry)
        .context("failed to load initial configuration")?;

    // Observed between cycles only; a cycle in progress always completes.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, finishing current cycle");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::warn!("Unable to listen for Ctrl-C: {e}");
                // Keep the sender alive so the loop does not read a closed channel as shutdown.
                std::future::pending::<()>().await;
            }
        }
    });

    service.run(shutdown_rx).await;
    Ok(())
}
