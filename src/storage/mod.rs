//! Campaign persistence
//!
//! SQLite is the durable store; the in-memory repository mirrors its
//! semantics for tests and dry runs.

pub mod memory;
pub mod repository;

use std::sync::Arc;

use anyhow::Result;

use crate::config::DatabaseConfig;
use crate::limiter::DailyCounterStore;

pub use memory::InMemoryRepository;
pub use repository::{CampaignRepository, ReplyLog, SqliteRepository, StateUpdate};

/// The three storage seams the engine needs, usually backed by one store
#[derive(Clone)]
pub struct Stores {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub replies: Arc<dyn ReplyLog>,
    pub counters: Arc<dyn DailyCounterStore>,
}

impl Stores {
    /// Open the configured SQLite database (or an in-memory one)
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let sqlite = if config.in_memory {
            SqliteRepository::in_memory()?
        } else {
            SqliteRepository::new(&config.sqlite_path)?
        };
        Ok(Self::from_sqlite(Arc::new(sqlite)))
    }

    pub fn from_sqlite(repo: Arc<SqliteRepository>) -> Self {
        Self {
            campaigns: repo.clone(),
            replies: repo.clone(),
            counters: repo,
        }
    }

    /// Fully in-process stores
    pub fn in_memory() -> Self {
        let repo = Arc::new(InMemoryRepository::new());
        Self {
            campaigns: repo.clone(),
            replies: repo,
            counters: Arc::new(crate::limiter::InMemoryDailyCounter::new()),
        }
    }
}
