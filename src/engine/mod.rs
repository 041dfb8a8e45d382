//! Broadcast engine
//!
//! Public lifecycle surface (`create_campaign`, `schedule`, `start`, `pause`,
//! `resume`, `cancel`, `status`, `list`, `on_reply`) plus the background
//! pieces: one worker task per running campaign and a supervisor loop that
//! fires due schedules, lifts automatic pauses and recovers orphaned
//! campaigns after a restart.

pub mod directory;
mod worker;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::sync::watch;
use uuid::Uuid;

use crate::audience::{Audience, AudienceNormalizer};
use crate::campaign::{self, CampaignEvent, CampaignSeed};
use crate::config::Config;
use crate::dispatch::{Dispatcher, MessageRenderer};
use crate::error::{Error, Result};
use crate::limiter::{ConfiguredTrustScores, PlanLimiter, PlanTier, TrustScoreProvider};
use crate::metrics;
use crate::models::{
    AudienceSpec, BroadcastDraft, BroadcastSettings, Campaign, CampaignState, CampaignStatus,
    RecipientAddress,
};
use crate::pacing::PacingPolicy;
use crate::reply::ReplyWatcher;
use crate::storage::{CampaignRepository, Stores};
use crate::transport::MessageSender;
use crate::utils::retry::RetryConfig;

pub use directory::{Contact, ContactDirectory, StaticContactDirectory};
use worker::WorkerHandle;

/// Result of `create_campaign`
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CreatedCampaign {
    pub id: Uuid,
    pub recipients: usize,
    /// Tokens that could not be normalized, each reported once
    pub invalid: Vec<String>,
    pub state: CampaignState,
}

/// Builder for [`BroadcastEngine`]
pub struct EngineBuilder {
    config: Config,
    stores: Stores,
    sender: Arc<dyn MessageSender>,
    trust: Option<Arc<dyn TrustScoreProvider>>,
    directory: Option<Arc<dyn ContactDirectory>>,
}

impl EngineBuilder {
    pub fn trust_provider(mut self, trust: Arc<dyn TrustScoreProvider>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn contact_directory(mut self, directory: Arc<dyn ContactDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn build(self) -> BroadcastEngine {
        let config = self.config;
        let normalizer = AudienceNormalizer::new(&config.audience);
        let trust = self
            .trust
            .unwrap_or_else(|| Arc::new(ConfiguredTrustScores::new(&config.trust)));
        let limiter = Arc::new(PlanLimiter::new(
            PlanTier::from(&config.plan),
            trust,
            self.stores.counters.clone(),
        ));
        let replies = Arc::new(ReplyWatcher::new(
            self.stores.replies.clone(),
            normalizer.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            self.sender,
            limiter.clone(),
            PacingPolicy::new(&config.pacing),
            replies.clone(),
            self.stores.campaigns.clone(),
            RetryConfig::from(&config.engine),
        ));

        BroadcastEngine {
            inner: Arc::new(EngineInner {
                poll_interval: config.poll_interval(),
                max_state_retries: config.engine.max_state_retries,
                repo: self.stores.campaigns,
                dispatcher,
                limiter,
                normalizer,
                replies,
                directory: self.directory,
                workers: Mutex::new(HashMap::new()),
                control: tokio::sync::Mutex::new(()),
            }),
        }
    }
}

struct EngineInner {
    poll_interval: Duration,
    max_state_retries: u32,
    repo: Arc<dyn CampaignRepository>,
    dispatcher: Arc<Dispatcher>,
    limiter: Arc<PlanLimiter>,
    normalizer: AudienceNormalizer,
    replies: Arc<ReplyWatcher>,
    directory: Option<Arc<dyn ContactDirectory>>,
    workers: Mutex<HashMap<Uuid, WorkerHandle>>,
    /// Serializes lifecycle requests
    control: tokio::sync::Mutex<()>,
}

/// Cheaply cloneable handle to the engine
#[derive(Clone)]
pub struct BroadcastEngine {
    inner: Arc<EngineInner>,
}

impl BroadcastEngine {
    pub fn builder(config: Config, stores: Stores, sender: Arc<dyn MessageSender>) -> EngineBuilder {
        EngineBuilder {
            config,
            stores,
            sender,
            trust: None,
            directory: None,
        }
    }

    pub fn normalizer(&self) -> &AudienceNormalizer {
        &self.inner.normalizer
    }

    // ------------------------------------------------------------------------
    // Creation
    // ------------------------------------------------------------------------

    /// Validate a draft, freeze its audience and store it as a campaign
    ///
    /// A draft with a future `schedule_at` is scheduled right away.
    pub async fn create_campaign(&self, draft: BroadcastDraft) -> Result<CreatedCampaign> {
        let now = Utc::now();

        let channel = draft
            .channel
            .filter(|c| !c.id.trim().is_empty())
            .ok_or_else(|| Error::validation("A sending channel is required"))?;
        let content = draft
            .content
            .ok_or_else(|| Error::validation("Message content is required"))?;
        MessageRenderer::validate(&content)?;
        validate_settings(&draft.settings)?;

        if let Some(at) = draft.schedule_at {
            if at <= now {
                return Err(Error::validation(format!(
                    "Schedule time {at} is not in the future"
                )));
            }
        }

        let audience = self.resolve_audience(&draft.audience).await?;
        if audience.valid.is_empty() {
            return Err(Error::validation("Audience has no valid recipients"));
        }
        if !audience.invalid.is_empty() {
            tracing::info!(
                draft_id = %draft.id,
                invalid = audience.invalid.len(),
                "Dropped invalid recipient tokens"
            );
        }

        let mut campaign = Campaign::from_seed(
            CampaignSeed {
                draft_id: draft.id,
                name: draft.name,
                channel,
                recipients: audience.valid,
                content,
                attachments: draft.attachments,
                settings: draft.settings,
                schedule_at: None,
                template_seed: rand::random(),
            },
            now,
        );

        if let Some(at) = draft.schedule_at {
            self.inner
                .limiter
                .check_recipients(&campaign)
                .map_err(Error::LimitExceeded)?;
            campaign.apply(&CampaignEvent::Schedule(at), now)?;
        }

        self.inner.repo.insert(&campaign)?;
        metrics::record_transition(campaign.state.label());

        tracing::info!(
            campaign_id = %campaign.id,
            recipients = campaign.recipients.len(),
            state = %campaign.state,
            "Campaign created"
        );

        Ok(CreatedCampaign {
            id: campaign.id,
            recipients: campaign.recipients.len(),
            invalid: audience.invalid,
            state: campaign.state,
        })
    }

    async fn resolve_audience(&self, spec: &AudienceSpec) -> Result<Audience> {
        let normalizer = &self.inner.normalizer;
        match spec {
            AudienceSpec::List(tokens) => Ok(normalizer.normalize_list(tokens)),
            AudienceSpec::Raw(text) => Ok(normalizer.normalize_text(text)),
            AudienceSpec::Query(query) => {
                let directory = self.inner.directory.as_ref().ok_or_else(|| {
                    Error::validation("Audience queries need a contact directory")
                })?;
                let tokens = directory.resolve(query).await?;
                Ok(normalizer.normalize_list(&tokens))
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Schedule a draft (or reschedule a scheduled campaign) for a future time
    pub async fn schedule(&self, id: Uuid, at: DateTime<Utc>) -> Result<CampaignStatus> {
        let _guard = self.inner.control.lock().await;
        if at <= Utc::now() {
            return Err(Error::validation(format!(
                "Schedule time {at} is not in the future"
            )));
        }

        let campaign = self.load(id)?;
        if !campaign.state.is_terminal() {
            self.inner
                .limiter
                .check_recipients(&campaign)
                .map_err(Error::LimitExceeded)?;
        }

        self.apply(id, CampaignEvent::Schedule(at))?;
        self.status(id)
    }

    /// Start sending now. No-op on running or paused campaigns.
    pub async fn start(&self, id: Uuid) -> Result<CampaignStatus> {
        let _guard = self.inner.control.lock().await;
        let campaign = self.load(id)?;

        if matches!(campaign.state, CampaignState::Draft | CampaignState::Scheduled) {
            self.inner
                .limiter
                .check_recipients(&campaign)
                .map_err(Error::LimitExceeded)?;
        }

        let (campaign, _) = self.apply(id, CampaignEvent::Start)?;
        if campaign.state.is_running() {
            self.ensure_worker(id);
        }
        self.status(id)
    }

    /// Manual pause; only an explicit `resume` lifts it
    pub async fn pause(&self, id: Uuid) -> Result<CampaignStatus> {
        let _guard = self.inner.control.lock().await;
        self.apply(id, CampaignEvent::manual_pause())?;
        self.halt_worker(id);
        self.status(id)
    }

    pub async fn resume(&self, id: Uuid) -> Result<CampaignStatus> {
        let _guard = self.inner.control.lock().await;
        let (campaign, _) = self.apply(id, CampaignEvent::Resume)?;
        if campaign.state.is_running() {
            self.ensure_worker(id);
        }
        self.status(id)
    }

    /// Cancel; cursor and outcomes are frozen as they are
    pub async fn cancel(&self, id: Uuid) -> Result<CampaignStatus> {
        let _guard = self.inner.control.lock().await;
        self.apply(id, CampaignEvent::Cancel)?;
        self.halt_worker(id);
        self.status(id)
    }

    pub fn status(&self, id: Uuid) -> Result<CampaignStatus> {
        self.inner.repo.status(id)?.ok_or(Error::NotFound(id))
    }

    pub fn list(&self) -> Result<Vec<CampaignStatus>> {
        Ok(self.inner.repo.list_statuses()?)
    }

    /// Record an inbound reply for stop-if-reply. Safe to call more than once.
    pub fn on_reply(
        &self,
        channel_id: &str,
        from: &str,
        at: DateTime<Utc>,
    ) -> Result<RecipientAddress> {
        self.inner.replies.on_reply(channel_id, from, at)
    }

    fn load(&self, id: Uuid) -> Result<Campaign> {
        self.inner.repo.load(id)?.ok_or(Error::NotFound(id))
    }

    fn apply(&self, id: Uuid, event: CampaignEvent) -> Result<(Campaign, bool)> {
        campaign::transition(
            self.inner.repo.as_ref(),
            id,
            &event,
            self.inner.max_state_retries,
        )
    }

    // ------------------------------------------------------------------------
    // Supervision
    // ------------------------------------------------------------------------

    /// Act on every due campaign once. Returns how many were handled.
    pub async fn supervise_once(&self) -> Result<usize> {
        let now = Utc::now();
        let due = self.inner.repo.due_for_resume(now)?;
        let mut handled = 0;

        for id in due {
            let Some(state) = self.inner.repo.load_state(id)? else {
                continue;
            };

            let outcome = match state {
                CampaignState::Scheduled => {
                    tracing::info!(campaign_id = %id, "Scheduled time reached, starting");
                    self.start(id).await.map(|_| ())
                }
                CampaignState::Paused(reason) if reason.auto_resumes() => {
                    tracing::info!(campaign_id = %id, reason = ?reason, "Blocking condition cleared, resuming");
                    self.resume(id).await.map(|_| ())
                }
                CampaignState::Running => self.ensure_running_worker(id).await,
                _ => continue,
            };

            match outcome {
                Ok(()) => handled += 1,
                Err(e) => tracing::warn!(campaign_id = %id, error = %e, "Supervisor action failed"),
            }
        }

        Ok(handled)
    }

    /// Keep a worker on a Running campaign, re-reading the state under the
    /// control lock so a concurrent pause or cancel is never un-halted
    async fn ensure_running_worker(&self, id: Uuid) -> Result<()> {
        let _guard = self.inner.control.lock().await;
        let state = self.inner.repo.load_state(id)?;
        if !state.as_ref().is_some_and(CampaignState::is_running) {
            tracing::debug!(campaign_id = %id, state = ?state, "Campaign left Running before recovery");
            return Ok(());
        }

        if !self.has_worker(id) {
            tracing::info!(campaign_id = %id, "Recovering running campaign");
        }
        self.ensure_worker(id);
        Ok(())
    }

    /// Resume work left running by a previous process
    pub async fn recover(&self) -> Result<usize> {
        self.supervise_once().await
    }

    /// Poll for due campaigns until `shutdown` flips to `true`
    pub async fn run_supervisor(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        tracing::info!(
            poll_interval_secs = self.inner.poll_interval.as_secs(),
            "Supervisor started"
        );

        loop {
            if let Err(e) = self.supervise_once().await {
                tracing::error!(error = %e, "Supervisor tick failed");
            }

            tokio::select! {
                _ = tokio::time::sleep(self.inner.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Supervisor stopped");
        Ok(())
    }

    /// Wait until the campaign is no longer running and its worker has exited
    pub async fn wait_until_settled(&self, id: Uuid) -> Result<CampaignStatus> {
        loop {
            let status = self.status(id)?;
            if !status.state.is_running() && !self.has_worker(id) {
                return Ok(status);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Halt every worker and wait for them to exit; campaigns stay as persisted
    pub async fn shutdown(&self) {
        let handles: Vec<_> = match self.inner.workers.lock() {
            Ok(mut workers) => workers.drain().map(|(_, w)| w).collect(),
            Err(_) => return,
        };

        for handle in &handles {
            handle.halt();
        }
        let stopped = handles.len();
        join_all(handles.into_iter().map(WorkerHandle::join)).await;
        tracing::info!(workers = stopped, "All campaign workers stopped");
    }
}

fn validate_settings(settings: &BroadcastSettings) -> Result<()> {
    if let (Some(min), Some(max)) = (settings.delay_min_secs, settings.delay_max_secs) {
        if min > max {
            return Err(Error::validation(format!(
                "delay_min_secs ({min}) exceeds delay_max_secs ({max})"
            )));
        }
    }
    Ok(())
}
