//! In-memory repository for tests and dry runs

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::repository::{is_due, CampaignRepository, ReplyLog, StateUpdate};
use crate::models::{Campaign, CampaignState, CampaignStatus, RecipientAddress};

/// Process-local store with the same semantics as the SQLite one
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    campaigns: RwLock<HashMap<Uuid, Campaign>>,
    replies: RwLock<HashMap<(String, RecipientAddress), DateTime<Utc>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow!("in-memory repository lock poisoned")
}

impl CampaignRepository for InMemoryRepository {
    fn insert(&self, campaign: &Campaign) -> Result<()> {
        let mut campaigns = self.campaigns.write().map_err(|_| poisoned())?;
        if campaigns.contains_key(&campaign.id) {
            anyhow::bail!("Campaign {} already exists", campaign.id);
        }
        campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Campaign>> {
        let campaigns = self.campaigns.read().map_err(|_| poisoned())?;
        Ok(campaigns.get(&id).cloned())
    }

    fn load_state(&self, id: Uuid) -> Result<Option<CampaignState>> {
        let campaigns = self.campaigns.read().map_err(|_| poisoned())?;
        Ok(campaigns.get(&id).map(|c| c.state.clone()))
    }

    fn compare_and_set_state(
        &self,
        id: Uuid,
        expected: &CampaignState,
        update: &StateUpdate,
    ) -> Result<bool> {
        let mut campaigns = self.campaigns.write().map_err(|_| poisoned())?;
        let Some(stored) = campaigns.get_mut(&id) else {
            return Ok(false);
        };
        if stored.state != *expected {
            return Ok(false);
        }

        stored.state = update.state.clone();
        stored.resume_at = update.resume_at;
        stored.schedule_at = update.schedule_at;
        stored.updated_at = update.updated_at;
        Ok(true)
    }

    fn record_progress(&self, campaign: &Campaign, position: usize) -> Result<()> {
        let mut campaigns = self.campaigns.write().map_err(|_| poisoned())?;
        let stored = campaigns
            .get_mut(&campaign.id)
            .with_context(|| format!("Campaign {} not found", campaign.id))?;
        let outcome = campaign
            .outcomes
            .get(position)
            .with_context(|| format!("No recipient at position {position}"))?;

        stored.outcomes[position] = *outcome;
        stored.cursor = campaign.cursor;
        stored.counters = campaign.counters.clone();
        stored.updated_at = campaign.updated_at;
        Ok(())
    }

    fn status(&self, id: Uuid) -> Result<Option<CampaignStatus>> {
        let campaigns = self.campaigns.read().map_err(|_| poisoned())?;
        Ok(campaigns.get(&id).map(CampaignStatus::from))
    }

    fn list_statuses(&self) -> Result<Vec<CampaignStatus>> {
        let campaigns = self.campaigns.read().map_err(|_| poisoned())?;
        let mut all: Vec<&Campaign> = campaigns.values().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all.into_iter().map(CampaignStatus::from).collect())
    }

    fn due_for_resume(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let campaigns = self.campaigns.read().map_err(|_| poisoned())?;
        let mut due: Vec<&Campaign> = campaigns
            .values()
            .filter(|c| is_due(&c.state, c.schedule_at, c.resume_at, now))
            .collect();
        due.sort_by_key(|c| c.created_at);
        Ok(due.into_iter().map(|c| c.id).collect())
    }
}

impl ReplyLog for InMemoryRepository {
    fn record_reply(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut replies = self.replies.write().map_err(|_| poisoned())?;
        match replies.entry((channel_id.to_string(), from.clone())) {
            Entry::Vacant(slot) => {
                slot.insert(at);
                Ok(true)
            }
            Entry::Occupied(mut slot) if at > *slot.get() => {
                slot.insert(at);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
        }
    }

    fn has_replied_since(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let replies = self.replies.read().map_err(|_| poisoned())?;
        Ok(replies
            .get(&(channel_id.to_string(), from.clone()))
            .is_some_and(|at| *at >= since))
    }
}
