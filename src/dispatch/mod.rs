//! Per-recipient dispatch step
//!
//! One [`Dispatcher::run_once`] call attempts at most one recipient:
//!
//! 1. cursor past the end: `Exhausted`
//! 2. recipient replied and `stop_if_reply`: `SkippedReply`, cursor advances
//! 3. daily limit reached: `SkippedLimit`, cursor stays
//! 4. outside broadcast hours: `Blocked(until)`, cursor stays
//! 5. pacing delay (interruptible), persisted state re-check, render, atomic
//!    daily reservation, send with retry: `Sent` / `Failed`, or `Aborted` on a
//!    fatal channel error
//!
//! Progress is persisted after every recorded outcome. State transitions are
//! left to the caller.

pub mod template;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::error::{Error, Result};
use crate::limiter::{DenyReason, LimitDecision, PlanLimiter};
use crate::metrics;
use crate::models::{Campaign, RecipientAddress, RecipientOutcome};
use crate::pacing::{PacingDecision, PacingPolicy};
use crate::reply::ReplyWatcher;
use crate::storage::CampaignRepository;
use crate::transport::{MessageSender, SendError};
use crate::utils::retry::{with_retry_if, RetryConfig};
use crate::utils::truncate_text;

pub use template::MessageRenderer;

const MAX_REASON_CHARS: usize = 500;

/// What one dispatch step did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    Sent(RecipientAddress),
    Failed(RecipientAddress),
    SkippedReply(RecipientAddress),
    /// Daily limit reached; nothing sent until `resets_at`
    SkippedLimit { resets_at: DateTime<Utc> },
    /// Outside broadcast hours until the given instant
    Blocked(DateTime<Utc>),
    /// Every recipient has a final outcome
    Exhausted,
    /// The channel is unusable
    Aborted {
        address: RecipientAddress,
        reason: String,
    },
    /// Halted during the pacing delay, or the campaign is not running
    Interrupted,
}

/// Drives campaigns one recipient at a time
pub struct Dispatcher {
    sender: Arc<dyn MessageSender>,
    limiter: Arc<PlanLimiter>,
    pacing: PacingPolicy,
    replies: Arc<ReplyWatcher>,
    repo: Arc<dyn CampaignRepository>,
    retry: RetryConfig,
    renderer: MessageRenderer,
}

impl Dispatcher {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        limiter: Arc<PlanLimiter>,
        pacing: PacingPolicy,
        replies: Arc<ReplyWatcher>,
        repo: Arc<dyn CampaignRepository>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            sender,
            limiter,
            pacing,
            replies,
            repo,
            retry,
            renderer: MessageRenderer::new(),
        }
    }

    /// Attempt the recipient under the cursor
    pub async fn run_once(
        &self,
        campaign: &mut Campaign,
        halt: &mut watch::Receiver<bool>,
    ) -> Result<StepResult> {
        if !campaign.state.is_running() || *halt.borrow() {
            return Ok(StepResult::Interrupted);
        }

        let position = campaign.cursor;
        let Some(recipient) = campaign.current_recipient().cloned() else {
            return Ok(StepResult::Exhausted);
        };

        // Step 2: reply suppression
        if campaign.settings.stop_if_reply
            && self
                .replies
                .is_flagged(&campaign.channel, &recipient, campaign.created_at)?
        {
            tracing::info!(
                campaign_id = %campaign.id,
                recipient = %recipient,
                position,
                "Recipient replied, skipping"
            );
            self.record(campaign, position, RecipientOutcome::SkippedReply)?;
            return Ok(StepResult::SkippedReply(recipient));
        }

        // Step 3: daily limit, without reserving
        let decision = self.limiter.check(campaign, 1, Utc::now()).await?;
        if let Some(resets_at) = self.hold_for_limit(campaign, position, decision)? {
            return Ok(StepResult::SkippedLimit { resets_at });
        }

        // Step 4: pacing and broadcast hours
        let decision = {
            let mut rng = rand::thread_rng();
            self.pacing
                .next_delay(&campaign.settings, Utc::now(), &mut rng)
        };
        let delay = match decision {
            PacingDecision::BlockedUntil(until) => {
                tracing::info!(
                    campaign_id = %campaign.id,
                    until = %until,
                    "Outside broadcast hours"
                );
                return Ok(StepResult::Blocked(until));
            }
            PacingDecision::Delay(delay) => delay,
        };

        // Step 5: wait, re-read state, render, reserve, send
        if !wait_or_halt(delay, halt).await {
            tracing::debug!(campaign_id = %campaign.id, position, "Halted during pacing delay");
            return Ok(StepResult::Interrupted);
        }

        // Another process may have paused or cancelled during the delay
        match self.repo.load_state(campaign.id)? {
            Some(state) if state.is_running() => {}
            stored => {
                tracing::debug!(
                    campaign_id = %campaign.id,
                    position,
                    state = ?stored,
                    "Campaign left Running during pacing delay"
                );
                return Ok(StepResult::Interrupted);
            }
        }

        let message = match self.renderer.render(campaign, position) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    campaign_id = %campaign.id,
                    recipient = %recipient,
                    error = %e,
                    "Failed to render message"
                );
                self.record(campaign, position, RecipientOutcome::Failed)?;
                return Ok(StepResult::Failed(recipient));
            }
        };

        let decision = self.limiter.check_and_reserve(campaign, 1, Utc::now()).await?;
        if let Some(resets_at) = self.hold_for_limit(campaign, position, decision)? {
            return Ok(StepResult::SkippedLimit { resets_at });
        }

        let sent = {
            let _timer = metrics::start_send_timer(&campaign.channel.channel_type);
            let channel = &campaign.channel;
            with_retry_if(
                &self.retry,
                || self.sender.send_message(channel, &recipient, &message),
                SendError::is_retryable,
            )
            .await
        };

        match sent {
            Ok(()) => {
                tracing::info!(
                    campaign_id = %campaign.id,
                    recipient = %recipient,
                    position,
                    template = ?message.template,
                    "Message sent"
                );
                self.record(campaign, position, RecipientOutcome::Sent)?;
                Ok(StepResult::Sent(recipient))
            }
            Err(e) if e.is_fatal() => {
                tracing::error!(
                    campaign_id = %campaign.id,
                    recipient = %recipient,
                    error = %e,
                    "Channel failure, aborting campaign"
                );
                self.record(campaign, position, RecipientOutcome::Failed)?;
                Ok(StepResult::Aborted {
                    address: recipient,
                    reason: truncate_text(&e.to_string(), MAX_REASON_CHARS),
                })
            }
            Err(e) => {
                tracing::warn!(
                    campaign_id = %campaign.id,
                    recipient = %recipient,
                    error = %e,
                    "Send failed"
                );
                self.record(campaign, position, RecipientOutcome::Failed)?;
                Ok(StepResult::Failed(recipient))
            }
        }
    }

    /// Record a final outcome, advance and persist
    fn record(
        &self,
        campaign: &mut Campaign,
        position: usize,
        outcome: RecipientOutcome,
    ) -> Result<()> {
        let now = Utc::now();
        campaign.record_attempt(position, outcome, now.date_naive(), now)?;
        self.repo.record_progress(campaign, position)?;
        metrics::record_send(outcome.as_str());
        Ok(())
    }

    /// On a daily-limit denial mark the recipient as waiting and return the reset time
    fn hold_for_limit(
        &self,
        campaign: &mut Campaign,
        position: usize,
        decision: LimitDecision,
    ) -> Result<Option<DateTime<Utc>>> {
        match decision {
            LimitDecision::Allowed { .. } => Ok(None),
            LimitDecision::Denied(DenyReason::DailyLimitExceeded {
                limit,
                used,
                resets_at,
            }) => {
                tracing::info!(
                    campaign_id = %campaign.id,
                    limit,
                    used,
                    resets_at = %resets_at,
                    "Daily limit reached"
                );
                campaign.mark_waiting(Utc::now());
                self.repo.record_progress(campaign, position)?;
                metrics::record_send(RecipientOutcome::SkippedLimit.as_str());
                Ok(Some(resets_at))
            }
            LimitDecision::Denied(reason) => Err(Error::LimitExceeded(reason)),
        }
    }
}

/// Sleep for `delay` unless a halt arrives first. Returns `false` when halted.
async fn wait_or_halt(delay: Duration, halt: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = halted(halt) => false,
    }
}

async fn halted(halt: &mut watch::Receiver<bool>) {
    loop {
        if *halt.borrow_and_update() {
            return;
        }
        if halt.changed().await.is_err() {
            // Sender gone: nobody can halt us any more
            std::future::pending::<()>().await;
        }
    }
}
