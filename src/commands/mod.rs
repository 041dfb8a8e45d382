pub mod normalize;
pub mod run;
pub mod serve;
pub mod status;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

use siaran::config::Config;
use siaran::transport::{DryRunSender, MessageSender, WebhookSender, WebhookSenderConfig};

// Re-export command functions for convenience
pub use normalize::normalize;
pub use run::run;
pub use serve::serve;
pub use status::status;

/// Load the config file when given, environment otherwise, and validate it
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Webhook sender when a gateway is configured, dry-run sender otherwise
pub fn build_sender(config: &Config, dry_run: bool) -> Result<Arc<dyn MessageSender>> {
    if dry_run {
        return Ok(Arc::new(DryRunSender::new()));
    }

    match WebhookSenderConfig::from_transport(&config.transport) {
        Some(webhook) => {
            let sender = WebhookSender::new(webhook).context("Failed to create webhook sender")?;
            tracing::info!(url = %sender.url(), "Using webhook transport");
            Ok(Arc::new(sender))
        }
        None => {
            tracing::warn!("No webhook_url configured, messages will only be logged");
            Ok(Arc::new(DryRunSender::new()))
        }
    }
}

/// Resolves once Ctrl+C is received
pub async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
        }
        Err(e) => {
            tracing::error!("Failed to wait for Ctrl+C: {}", e);
        }
    }
}
