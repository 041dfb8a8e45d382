//! Campaign workers
//!
//! At most one worker task per campaign. A worker re-reads the persisted state
//! before every step and retires once the campaign is no longer running or it
//! has been halted. Retirement happens under the registry lock, so a
//! concurrent `resume` either revives the retiring worker or spawns a new one.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::BroadcastEngine;
use crate::campaign::CampaignEvent;
use crate::dispatch::StepResult;
use crate::error::{Error, Result};
use crate::metrics;
use crate::models::PauseReason;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

pub(super) struct WorkerHandle {
    generation: u64,
    halt: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub(super) fn halt(&self) {
        self.halt.send_replace(true);
    }

    pub(super) async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::warn!(error = %e, "Campaign worker ended abnormally");
        }
    }

    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

impl BroadcastEngine {
    /// Spawn a worker unless a live one exists; a live one is un-halted
    pub(super) fn ensure_worker(&self, id: Uuid) {
        let Ok(mut workers) = self.inner.workers.lock() else {
            tracing::error!(campaign_id = %id, "Worker registry lock poisoned");
            return;
        };

        if let Some(existing) = workers.get(&id) {
            if existing.is_alive() {
                existing.halt.send_replace(false);
                return;
            }
        }

        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let (halt_tx, halt_rx) = watch::channel(false);
        let engine = self.clone();
        let task = tokio::spawn(async move {
            engine.run_worker(id, generation, halt_rx).await;
        });

        workers.insert(
            id,
            WorkerHandle {
                generation,
                halt: halt_tx,
                task,
            },
        );
        tracing::debug!(campaign_id = %id, generation, "Worker spawned");
    }

    pub(super) fn halt_worker(&self, id: Uuid) {
        if let Ok(workers) = self.inner.workers.lock() {
            if let Some(worker) = workers.get(&id) {
                worker.halt();
            }
        }
    }

    pub(super) fn has_worker(&self, id: Uuid) -> bool {
        self.inner
            .workers
            .lock()
            .map(|w| w.get(&id).is_some_and(WorkerHandle::is_alive))
            .unwrap_or(false)
    }

    async fn run_worker(&self, id: Uuid, generation: u64, mut halt: watch::Receiver<bool>) {
        metrics::worker_started();
        tracing::info!(campaign_id = %id, "Worker started");

        if let Err(e) = self.drive(id, generation, &mut halt).await {
            tracing::error!(campaign_id = %id, error = %e, "Worker stopped on error");
            self.deregister(id, generation);
        }

        metrics::worker_stopped();
        tracing::info!(campaign_id = %id, "Worker stopped");
    }

    async fn drive(
        &self,
        id: Uuid,
        generation: u64,
        halt: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        let mut campaign = self.inner.repo.load(id)?.ok_or(Error::NotFound(id))?;

        loop {
            campaign.state = self.inner.repo.load_state(id)?.ok_or(Error::NotFound(id))?;
            if !campaign.state.is_running() || *halt.borrow() {
                if self.try_retire(id, generation, halt)? {
                    return Ok(());
                }
                continue;
            }

            let step = self.inner.dispatcher.run_once(&mut campaign, halt).await?;
            tracing::debug!(campaign_id = %id, cursor = campaign.cursor, step = ?step, "Step finished");

            let event = match step {
                StepResult::Sent(_)
                | StepResult::Failed(_)
                | StepResult::SkippedReply(_)
                | StepResult::Interrupted => continue,
                StepResult::Exhausted => CampaignEvent::Complete,
                StepResult::SkippedLimit { resets_at } => CampaignEvent::Pause {
                    reason: PauseReason::DailyLimitExceeded,
                    until: Some(resets_at),
                },
                StepResult::Blocked(until) => CampaignEvent::Pause {
                    reason: PauseReason::OutsideHoursWindow,
                    until: Some(until),
                },
                StepResult::Aborted { address, reason } => {
                    tracing::error!(campaign_id = %id, recipient = %address, reason = %reason, "Campaign aborted");
                    CampaignEvent::Fail(reason)
                }
            };

            match self.apply(id, event) {
                Ok(_) => {}
                // An operator got there first (cancel, manual pause); their state stands
                Err(Error::InvalidTransition { from, action }) => {
                    tracing::debug!(campaign_id = %id, from = %from, action = %action, "Worker transition superseded");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Deregister unless the campaign was resumed meanwhile. Returns whether retired.
    fn try_retire(&self, id: Uuid, generation: u64, halt: &watch::Receiver<bool>) -> Result<bool> {
        let mut workers = self
            .inner
            .workers
            .lock()
            .map_err(|_| Error::other("Worker registry lock poisoned"))?;

        let state = self.inner.repo.load_state(id)?;
        let revived = state.as_ref().is_some_and(|s| s.is_running()) && !*halt.borrow();
        if revived {
            return Ok(false);
        }

        if workers.get(&id).is_some_and(|w| w.generation == generation) {
            workers.remove(&id);
        }
        Ok(true)
    }

    fn deregister(&self, id: Uuid, generation: u64) {
        if let Ok(mut workers) = self.inner.workers.lock() {
            if workers.get(&id).is_some_and(|w| w.generation == generation) {
                workers.remove(&id);
            }
        }
    }
}
