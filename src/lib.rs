//! siaran - Paced, resumable broadcast dispatch engine
//!
//! Sends one message to a large audience through a single messaging channel,
//! one recipient at a time, under plan and trust-based daily limits, human-like
//! pacing, broadcast-hours windows and stop-if-reply rules. Campaigns survive
//! restarts: progress is persisted after every recipient and resumes from the
//! cursor.
//!
//! # Architecture
//!
//! - [`audience`] - Recipient normalization and deduplication
//! - [`limiter`] - Plan ceilings and per-channel daily windows
//! - [`pacing`] - Inter-message delays and broadcast-hours windows
//! - [`campaign`] - Lifecycle state machine and progress bookkeeping
//! - [`dispatch`] - One send step: checks, render, send, record
//! - [`engine`] - Public lifecycle surface, workers and the supervisor
//! - [`reply`] - Inbound reply log for stop-if-reply
//! - [`storage`] - SQLite and in-memory repositories
//! - [`transport`] - Outbound message senders
//! - [`api`] - REST API over the engine
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use siaran::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let stores = Stores::open(&config.database)?;
//!     let engine = BroadcastEngine::builder(config, stores, Arc::new(DryRunSender::new())).build();
//!     engine.recover().await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod audience;
pub mod campaign;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod limiter;
pub mod metrics;
pub mod models;
pub mod pacing;
pub mod reply;
pub mod storage;
pub mod transport;
pub mod utils;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::audience::{Audience, AudienceNormalizer};
    pub use crate::config::Config;
    pub use crate::engine::{BroadcastEngine, CreatedCampaign};
    pub use crate::error::{BroadcastErrorTrait, Error, ErrorCategory, Result};
    pub use crate::models::{
        BroadcastDraft, BroadcastSettings, Campaign, CampaignState, CampaignStatus, PauseReason,
        RecipientAddress, RecipientOutcome,
    };
    pub use crate::storage::Stores;
    pub use crate::transport::{DryRunSender, MessageSender, SendError};
}

// Direct re-exports for convenience
pub use engine::BroadcastEngine;
pub use models::{BroadcastDraft, CampaignState, CampaignStatus};
