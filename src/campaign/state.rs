//! Lifecycle transitions
//!
//! ```text
//!   Draft ──schedule──▶ Scheduled
//!     │                    │
//!     └──────start─────────┴──▶ Running ◀──resume── Paused
//!                                 │ │ └──pause/limit/hours──▶ Paused
//!                                 │ └──complete──▶ Completed
//!                                 └──fail──▶ Failed
//!   any non-terminal ──cancel──▶ Cancelled
//! ```
//!
//! Transitions that would leave the state unchanged (a second `start`, a
//! `resume` on a running campaign, a repeated `cancel`) are accepted as
//! no-ops so lifecycle calls stay idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};
use crate::models::{CampaignState, PauseReason};

/// Lifecycle action names, used in errors and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Schedule,
    Start,
    Pause,
    Resume,
    Complete,
    Fail,
    Cancel,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Start => "start",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CampaignEvent {
    Schedule(DateTime<Utc>),
    Start,
    Pause {
        reason: PauseReason,
        until: Option<DateTime<Utc>>,
    },
    Resume,
    Complete,
    Fail(String),
    Cancel,
}

impl CampaignEvent {
    pub fn manual_pause() -> Self {
        Self::Pause {
            reason: PauseReason::ManualPause,
            until: None,
        }
    }

    pub fn action(&self) -> LifecycleAction {
        match self {
            Self::Schedule(_) => LifecycleAction::Schedule,
            Self::Start => LifecycleAction::Start,
            Self::Pause { .. } => LifecycleAction::Pause,
            Self::Resume => LifecycleAction::Resume,
            Self::Complete => LifecycleAction::Complete,
            Self::Fail(_) => LifecycleAction::Fail,
            Self::Cancel => LifecycleAction::Cancel,
        }
    }
}

impl CampaignState {
    /// Next state for `event`; `Ok(None)` means accepted without change
    pub fn on(&self, event: &CampaignEvent) -> Result<Option<CampaignState>> {
        use CampaignState as S;

        let next = match (self, event) {
            (S::Draft | S::Scheduled, CampaignEvent::Schedule(_)) => Some(S::Scheduled),

            (S::Draft | S::Scheduled, CampaignEvent::Start) => Some(S::Running),
            (S::Running | S::Paused(_), CampaignEvent::Start) => None,

            (S::Running, CampaignEvent::Pause { reason, .. }) => Some(S::Paused(*reason)),
            // A manual pause pins an automatically paused campaign
            (S::Paused(current), CampaignEvent::Pause { reason, .. }) => {
                if *reason == PauseReason::ManualPause && *current != PauseReason::ManualPause {
                    Some(S::Paused(PauseReason::ManualPause))
                } else {
                    None
                }
            }

            (S::Paused(_), CampaignEvent::Resume) => Some(S::Running),
            (S::Running, CampaignEvent::Resume) => None,

            (S::Running, CampaignEvent::Complete) => Some(S::Completed),
            (S::Running, CampaignEvent::Fail(reason)) => Some(S::Failed(reason.clone())),

            (S::Cancelled, CampaignEvent::Cancel) => None,
            (s, CampaignEvent::Cancel) if !s.is_terminal() => Some(S::Cancelled),

            (from, event) => {
                return Err(Error::InvalidTransition {
                    from: from.clone(),
                    action: event.action(),
                })
            }
        };

        Ok(next)
    }
}
