use anyhow::{Context, Result};
use uuid::Uuid;

use siaran::config::Config;
use siaran::models::CampaignStatus;
use siaran::storage::Stores;

/// Show one campaign, or all of them when no id is given
pub fn status(config: &Config, id: Option<Uuid>, json: bool) -> Result<()> {
    let stores = Stores::open(&config.database).context("Failed to open campaign store")?;

    let statuses = match id {
        Some(id) => {
            let status = stores
                .campaigns
                .status(id)?
                .with_context(|| format!("Campaign not found: {id}"))?;
            vec![status]
        }
        None => stores.campaigns.list_statuses()?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }

    if statuses.is_empty() {
        println!("No campaigns");
        return Ok(());
    }

    for status in &statuses {
        print_status(status);
    }
    Ok(())
}

fn print_status(status: &CampaignStatus) {
    println!("{} ({})", status.name, status.id);
    println!("  State: {}", status.state);
    println!(
        "  Progress: {}/{} ({:.1}%)",
        status.cursor,
        status.total,
        status.progress_percentage()
    );
    println!(
        "  Sent: {}  Failed: {}  Skipped (replied): {}  Waiting: {}",
        status.counts.sent,
        status.counts.failed,
        status.counts.skipped_reply,
        status.counts.skipped_limit
    );
    println!("  Sent today: {}", status.sent_today);
    if let Some(at) = status.resume_at {
        println!("  Resumes at: {at}");
    }
    println!("  Updated: {}", status.updated_at);
}
