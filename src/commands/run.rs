use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::sync::watch;

use siaran::config::Config;
use siaran::models::{BroadcastDraft, CampaignState, CampaignStatus, PauseReason};
use siaran::storage::Stores;
use siaran::BroadcastEngine;

use super::{build_sender, ctrl_c};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Create a campaign from a draft file and drive it in the foreground
///
/// Ctrl+C stops the workers without changing the campaign state, so a later
/// `serve` picks the campaign up where it left off.
pub async fn run(config: Config, draft_path: &Path, dry_run: bool) -> Result<()> {
    let content = tokio::fs::read_to_string(draft_path)
        .await
        .with_context(|| format!("Failed to read draft: {}", draft_path.display()))?;
    let draft: BroadcastDraft = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse draft: {}", draft_path.display()))?;

    let stores = if dry_run {
        Stores::in_memory()
    } else {
        Stores::open(&config.database).context("Failed to open campaign store")?
    };
    let sender = build_sender(&config, dry_run)?;
    let engine = BroadcastEngine::builder(config, stores, sender).build();

    println!("Creating campaign: {}", draft.name);
    let created = engine.create_campaign(draft).await?;
    println!("  Campaign id: {}", created.id);
    println!("  Recipients: {}", created.recipients);
    if !created.invalid.is_empty() {
        println!("  Invalid tokens ({}):", created.invalid.len());
        for token in &created.invalid {
            println!("    {token}");
        }
    }

    if created.state == CampaignState::Scheduled {
        println!("  Waiting for scheduled start");
    } else {
        engine.start(created.id).await?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let supervisor = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run_supervisor(shutdown_rx).await })
    };

    let outcome = tokio::select! {
        status = follow(&engine, created.id) => status.map(Some),
        _ = ctrl_c() => Ok(None),
    };

    shutdown_tx.send_replace(true);
    if let Err(e) = supervisor.await {
        tracing::error!(error = %e, "Supervisor task panicked");
    }
    engine.shutdown().await;

    match outcome? {
        Some(status) => print_summary(&status),
        None => println!("\nInterrupted; campaign {} left as persisted", created.id),
    }
    Ok(())
}

/// Print progress until the campaign is terminal or manually paused
async fn follow(engine: &BroadcastEngine, id: uuid::Uuid) -> Result<CampaignStatus> {
    let mut last = None;

    loop {
        let status = engine.status(id)?;
        let snapshot = (status.cursor, status.state.clone());
        if last.as_ref() != Some(&snapshot) {
            println!(
                "  [{}] {}/{} ({:.1}%)",
                status.state,
                status.cursor,
                status.total,
                status.progress_percentage()
            );
            if let Some(at) = status.resume_at {
                println!("    resumes at {at}");
            }
            last = Some(snapshot);
        }

        let manual = status.state == CampaignState::Paused(PauseReason::ManualPause);
        if status.state.is_terminal() || manual {
            return Ok(status);
        }
        tokio::time::sleep(PROGRESS_INTERVAL).await;
    }
}

fn print_summary(status: &CampaignStatus) {
    println!("\nCampaign Summary");
    println!("================");
    println!("State: {}", status.state);
    println!("Sent: {}", status.counts.sent);
    println!("Failed: {}", status.counts.failed);
    println!("Skipped (replied): {}", status.counts.skipped_reply);
    println!("Pending: {}", status.counts.pending + status.counts.skipped_limit);
}
