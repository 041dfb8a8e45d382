use anyhow::{Context, Result};
use tokio::sync::watch;

use siaran::api::ApiServer;
use siaran::config::Config;
use siaran::metrics;
use siaran::storage::Stores;
use siaran::BroadcastEngine;

use super::{build_sender, ctrl_c};

/// Run the engine with its supervisor behind the HTTP API
pub async fn serve(config: Config, dry_run: bool) -> Result<()> {
    println!("Starting siaran broadcast engine");
    println!("================================");
    println!("  Bind address: {}", config.server.bind_address);
    println!(
        "  Plan tier: {} ({} recipients max)",
        config.plan.tier, config.plan.max_recipients
    );
    if config.database.in_memory {
        println!("  Database: in-memory");
    } else {
        println!("  Database: {}", config.database.sqlite_path.display());
    }
    println!();

    metrics::init_metrics().map_err(|e| anyhow::anyhow!("Failed to initialize metrics: {e}"))?;

    let stores = Stores::open(&config.database).context("Failed to open campaign store")?;
    let sender = build_sender(&config, dry_run)?;
    let engine = BroadcastEngine::builder(config.clone(), stores, sender).build();

    let recovered = engine.recover().await.context("Failed to recover campaigns")?;
    if recovered > 0 {
        tracing::info!(recovered, "Recovered campaigns from previous run");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_supervisor(shutdown_rx).await })
    };

    let server = ApiServer::new(config.server.clone(), engine.clone());
    let served = server.start_with_shutdown(ctrl_c()).await;

    shutdown_tx.send_replace(true);
    match supervisor.await {
        Ok(Err(e)) => tracing::error!(error = %e, "Supervisor failed"),
        Err(e) => tracing::error!(error = %e, "Supervisor task panicked"),
        Ok(Ok(())) => {}
    }
    engine.shutdown().await;

    served.context("API server failed")?;
    println!("Shutdown complete");
    Ok(())
}
