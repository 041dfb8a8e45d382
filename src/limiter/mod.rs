//! Server-side plan enforcement
//!
//! Two caps apply to every campaign:
//!
//! - **max recipients** from the subscription tier, checked once at launch
//! - **daily sends** per channel, derived from the channel trust score and
//!   counted in a single shared record per `(channel, UTC day)`
//!
//! The daily window rolls over at UTC midnight. Client-supplied limits are
//! advisory and never consulted.

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

use crate::config::{PlanConfig, TrustConfig};
use crate::models::{Campaign, ChannelRef};

/// Trust bands: (minimum score, daily ceiling)
const TRUST_BANDS: &[(u8, u32)] = &[(80, 1000), (60, 600), (40, 300), (20, 150), (0, 50)];

/// Why the limiter refused
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DenyReason {
    #[error("campaign has {count} recipients but the plan allows {ceiling}")]
    MaxRecipientsExceeded { count: usize, ceiling: usize },

    #[error("daily limit of {limit} reached ({used} used), resets at {resets_at}")]
    DailyLimitExceeded {
        limit: u32,
        used: u32,
        resets_at: DateTime<Utc>,
    },
}

impl DenyReason {
    /// Daily denials clear on rollover; the recipient ceiling needs a draft edit
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DailyLimitExceeded { .. })
    }
}

/// Limiter verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimitDecision {
    Allowed { remaining_today: u32 },
    Denied(DenyReason),
}

impl LimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Subscription tier caps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanTier {
    pub name: String,
    pub max_recipients: usize,
    pub max_daily_sends: u32,
}

impl From<&PlanConfig> for PlanTier {
    fn from(config: &PlanConfig) -> Self {
        Self {
            name: config.tier.clone(),
            max_recipients: config.max_recipients,
            max_daily_sends: config.max_daily_sends,
        }
    }
}

/// Daily ceiling for a trust score, before the tier cap
pub fn daily_limit_for_trust(score: u8) -> u32 {
    TRUST_BANDS
        .iter()
        .find(|(min, _)| score >= *min)
        .map(|(_, limit)| *limit)
        .unwrap_or(TRUST_BANDS[TRUST_BANDS.len() - 1].1)
}

/// UTC day a timestamp counts against, and the instant that day ends
pub fn day_window(now: DateTime<Utc>) -> (NaiveDate, DateTime<Utc>) {
    let day = now.date_naive();
    let next = day
        .checked_add_days(Days::new(1))
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    (day, next)
}

// ============================================================================
// Collaborators
// ============================================================================

/// Source of channel trust scores (0..=100)
#[async_trait]
pub trait TrustScoreProvider: Send + Sync {
    async fn trust_score(&self, channel: &ChannelRef) -> anyhow::Result<u8>;
}

/// Trust scores read from configuration
#[derive(Debug, Clone)]
pub struct ConfiguredTrustScores {
    default_score: u8,
    channels: HashMap<String, u8>,
}

impl ConfiguredTrustScores {
    pub fn new(config: &TrustConfig) -> Self {
        Self {
            default_score: config.default_score.min(100),
            channels: config.channels.clone(),
        }
    }

    pub fn with_score(mut self, channel_id: impl Into<String>, score: u8) -> Self {
        self.channels.insert(channel_id.into(), score.min(100));
        self
    }
}

#[async_trait]
impl TrustScoreProvider for ConfiguredTrustScores {
    async fn trust_score(&self, channel: &ChannelRef) -> anyhow::Result<u8> {
        Ok(self
            .channels
            .get(&channel.id)
            .copied()
            .unwrap_or(self.default_score))
    }
}

/// Shared per-channel daily send counter
///
/// Implementations must make `try_add` a single atomic increment-and-check.
pub trait DailyCounterStore: Send + Sync {
    /// Add `amount` if the total stays within `limit`; returns the new total
    fn try_add(
        &self,
        channel_id: &str,
        day: NaiveDate,
        amount: u32,
        limit: u32,
    ) -> anyhow::Result<Option<u32>>;

    /// Current total for the day
    fn current(&self, channel_id: &str, day: NaiveDate) -> anyhow::Result<u32>;
}

/// Process-local counter store
#[derive(Debug, Default)]
pub struct InMemoryDailyCounter {
    counts: Mutex<HashMap<(String, NaiveDate), u32>>,
}

impl InMemoryDailyCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DailyCounterStore for InMemoryDailyCounter {
    fn try_add(
        &self,
        channel_id: &str,
        day: NaiveDate,
        amount: u32,
        limit: u32,
    ) -> anyhow::Result<Option<u32>> {
        let mut counts = self
            .counts
            .lock()
            .map_err(|_| anyhow::anyhow!("daily counter lock poisoned"))?;
        let entry = counts.entry((channel_id.to_string(), day)).or_insert(0);
        if entry.saturating_add(amount) > limit {
            return Ok(None);
        }
        *entry += amount;
        Ok(Some(*entry))
    }

    fn current(&self, channel_id: &str, day: NaiveDate) -> anyhow::Result<u32> {
        let counts = self
            .counts
            .lock()
            .map_err(|_| anyhow::anyhow!("daily counter lock poisoned"))?;
        Ok(counts
            .get(&(channel_id.to_string(), day))
            .copied()
            .unwrap_or(0))
    }
}

// ============================================================================
// Plan Limiter
// ============================================================================

/// Authoritative plan and daily-limit enforcement
pub struct PlanLimiter {
    tier: PlanTier,
    trust: Arc<dyn TrustScoreProvider>,
    counters: Arc<dyn DailyCounterStore>,
}

impl PlanLimiter {
    pub fn new(
        tier: PlanTier,
        trust: Arc<dyn TrustScoreProvider>,
        counters: Arc<dyn DailyCounterStore>,
    ) -> Self {
        Self {
            tier,
            trust,
            counters,
        }
    }

    pub fn tier(&self) -> &PlanTier {
        &self.tier
    }

    /// Launch-time recipient ceiling; never re-checked per send
    pub fn check_recipients(&self, campaign: &Campaign) -> Result<(), DenyReason> {
        let count = campaign.recipients.len();
        if count > self.tier.max_recipients {
            return Err(DenyReason::MaxRecipientsExceeded {
                count,
                ceiling: self.tier.max_recipients,
            });
        }
        Ok(())
    }

    /// Server-side daily limit for a channel
    pub async fn daily_limit(&self, channel: &ChannelRef) -> u32 {
        let score = match self.trust.trust_score(channel).await {
            Ok(score) => score.min(100),
            Err(e) => {
                tracing::warn!(channel = %channel.id, error = %e, "Trust score unavailable, using lowest band");
                0
            }
        };
        daily_limit_for_trust(score).min(self.tier.max_daily_sends)
    }

    /// Sends already counted today on the campaign's channel
    pub fn used_today(&self, channel: &ChannelRef, now: DateTime<Utc>) -> anyhow::Result<u32> {
        let (day, _) = day_window(now);
        self.counters.current(&channel.id, day)
    }

    /// Check whether `pending_count` more sends fit today, without reserving
    pub async fn check(
        &self,
        campaign: &Campaign,
        pending_count: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<LimitDecision> {
        let limit = self.effective_limit(campaign).await;
        let (day, resets_at) = day_window(now);
        let used = self.counters.current(&campaign.channel.id, day)?;

        if used.saturating_add(pending_count) > limit {
            return Ok(LimitDecision::Denied(DenyReason::DailyLimitExceeded {
                limit,
                used,
                resets_at,
            }));
        }

        Ok(LimitDecision::Allowed {
            remaining_today: limit - used,
        })
    }

    /// Atomically reserve `pending_count` sends on the channel's daily counter
    pub async fn check_and_reserve(
        &self,
        campaign: &Campaign,
        pending_count: u32,
        now: DateTime<Utc>,
    ) -> anyhow::Result<LimitDecision> {
        let limit = self.effective_limit(campaign).await;
        let (day, resets_at) = day_window(now);

        match self
            .counters
            .try_add(&campaign.channel.id, day, pending_count, limit)?
        {
            Some(total) => Ok(LimitDecision::Allowed {
                remaining_today: limit.saturating_sub(total),
            }),
            None => {
                let used = self.counters.current(&campaign.channel.id, day)?;
                Ok(LimitDecision::Denied(DenyReason::DailyLimitExceeded {
                    limit,
                    used,
                    resets_at,
                }))
            }
        }
    }

    async fn effective_limit(&self, campaign: &Campaign) -> u32 {
        let limit = self.daily_limit(&campaign.channel).await;
        if let Some(hint) = campaign.settings.daily_limit_hint {
            if hint != limit {
                tracing::debug!(
                    campaign_id = %campaign.id,
                    hint,
                    limit,
                    "Ignoring client daily limit hint"
                );
            }
        }
        limit
    }
}
