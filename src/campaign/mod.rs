//! Campaign lifecycle and progress bookkeeping
//!
//! The cursor only moves forward: every position below it holds a final
//! outcome, every position at or above it is pending (or waiting on the
//! daily limit).

pub mod state;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics;
use crate::models::{
    Attachment, BroadcastSettings, Campaign, CampaignCounters, CampaignState, ChannelRef,
    MessageContent, RecipientAddress, RecipientOutcome,
};
use crate::storage::{CampaignRepository, StateUpdate};

pub use state::{CampaignEvent, LifecycleAction};

/// Everything needed to freeze a draft into a campaign
#[derive(Debug, Clone)]
pub struct CampaignSeed {
    pub draft_id: Uuid,
    pub name: String,
    pub channel: ChannelRef,
    pub recipients: Vec<RecipientAddress>,
    pub content: MessageContent,
    pub attachments: Vec<Attachment>,
    pub settings: BroadcastSettings,
    pub schedule_at: Option<DateTime<Utc>>,
    pub template_seed: u64,
}

impl Campaign {
    /// New campaign in `Draft` with every recipient pending
    pub fn from_seed(seed: CampaignSeed, now: DateTime<Utc>) -> Self {
        let outcomes = vec![RecipientOutcome::Pending; seed.recipients.len()];
        Self {
            id: Uuid::new_v4(),
            draft_id: seed.draft_id,
            name: seed.name,
            channel: seed.channel,
            recipients: seed.recipients,
            content: seed.content,
            attachments: seed.attachments,
            settings: seed.settings,
            schedule_at: seed.schedule_at,
            state: CampaignState::Draft,
            cursor: 0,
            outcomes,
            counters: CampaignCounters::default(),
            resume_at: None,
            template_seed: seed.template_seed,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event. Returns whether the state changed.
    pub fn apply(&mut self, event: &CampaignEvent, now: DateTime<Utc>) -> Result<bool> {
        let next = self.state.on(event)?;

        if let CampaignEvent::Schedule(at) = event {
            self.schedule_at = Some(*at);
        }

        let Some(next) = next else {
            return Ok(false);
        };

        self.resume_at = match (event, &next) {
            (CampaignEvent::Pause { until, reason }, CampaignState::Paused(_)) if reason.auto_resumes() => {
                *until
            }
            _ => None,
        };
        self.state = next;
        self.updated_at = now;
        Ok(true)
    }

    /// Recipient under the cursor
    pub fn current_recipient(&self) -> Option<&RecipientAddress> {
        self.recipients.get(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.recipients.len()
    }

    pub fn remaining(&self) -> usize {
        self.recipients.len().saturating_sub(self.cursor)
    }

    /// Record a final outcome for the recipient under the cursor and advance
    pub fn record_attempt(
        &mut self,
        position: usize,
        outcome: RecipientOutcome,
        day: NaiveDate,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if position != self.cursor || self.is_exhausted() {
            return Err(Error::other(format!(
                "attempt at position {position} does not match cursor {} of {}",
                self.cursor,
                self.recipients.len()
            )));
        }

        match outcome {
            RecipientOutcome::Sent => self.counters.count_sent(day),
            RecipientOutcome::Failed => self.counters.failed += 1,
            RecipientOutcome::SkippedReply => self.counters.skipped_reply += 1,
            RecipientOutcome::Pending | RecipientOutcome::SkippedLimit => {
                return Err(Error::other(format!(
                    "{} is not a final outcome",
                    outcome.as_str()
                )))
            }
        }

        self.outcomes[position] = outcome;
        self.cursor += 1;
        self.updated_at = now;
        Ok(())
    }

    /// Mark the recipient under the cursor as held back by the daily limit
    pub fn mark_waiting(&mut self, now: DateTime<Utc>) {
        if let Some(slot) = self.outcomes.get_mut(self.cursor) {
            *slot = RecipientOutcome::SkippedLimit;
            self.updated_at = now;
        }
    }

    /// Messages sent on `day`
    pub fn sent_on(&self, day: NaiveDate) -> u32 {
        if self.counters.sent_day == Some(day) {
            self.counters.sent_today
        } else {
            0
        }
    }
}

/// Load, apply `event` and compare-and-set the new state
///
/// Retries from a fresh load when the stored state moved underneath, up to
/// `max_retries` times. Returns the campaign as persisted and whether the
/// state changed.
pub fn transition(
    repo: &dyn CampaignRepository,
    id: Uuid,
    event: &CampaignEvent,
    max_retries: u32,
) -> Result<(Campaign, bool)> {
    for attempt in 0..=max_retries {
        let mut campaign = repo.load(id)?.ok_or(Error::NotFound(id))?;
        let expected = campaign.state.clone();

        if !campaign.apply(event, Utc::now())? {
            return Ok((campaign, false));
        }

        if repo.compare_and_set_state(id, &expected, &StateUpdate::from(&campaign))? {
            tracing::info!(
                campaign_id = %id,
                from = %expected,
                to = %campaign.state,
                "Campaign state changed"
            );
            metrics::record_transition(campaign.state.label());
            return Ok((campaign, true));
        }

        tracing::debug!(
            campaign_id = %id,
            attempt,
            action = %event.action(),
            "State changed concurrently, retrying"
        );
    }

    Err(Error::ConcurrencyConflict(id))
}
