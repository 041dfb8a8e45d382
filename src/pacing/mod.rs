//! Inter-message pacing
//!
//! Each speed tier maps to a delay range (defaults: slow 45-90s, normal
//! 20-45s, fast 8-20s). Operator bounds can only narrow that range. With
//! `simulate_human` the delay is drawn uniformly from the range, otherwise the
//! midpoint is used. Outside the broadcast-hours window the policy reports the
//! next opening instant instead of a delay.

use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, NaiveTime, Offset, TimeZone, Utc};
use rand::Rng;
use std::time::Duration;

use crate::config::{DelayRange, PacingConfig};
use crate::models::{BroadcastHours, BroadcastSettings, Speed};

/// What the dispatcher should do before the next send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacingDecision {
    Delay(Duration),
    BlockedUntil(DateTime<Utc>),
}

/// Delay calculator for one deployment
#[derive(Debug, Clone)]
pub struct PacingPolicy {
    slow: DelayRange,
    normal: DelayRange,
    fast: DelayRange,
    offset: FixedOffset,
}

impl Default for PacingPolicy {
    fn default() -> Self {
        Self::new(&PacingConfig::default())
    }
}

impl PacingPolicy {
    pub fn new(config: &PacingConfig) -> Self {
        let offset = FixedOffset::east_opt(config.utc_offset_minutes * 60)
            .unwrap_or_else(|| Utc.fix());
        Self {
            slow: config.slow,
            normal: config.normal,
            fast: config.fast,
            offset,
        }
    }

    /// Base range for a speed tier
    pub fn tier_range(&self, speed: Speed) -> DelayRange {
        match speed {
            Speed::Slow => self.slow,
            Speed::Normal => self.normal,
            Speed::Fast => self.fast,
        }
    }

    /// Tier range intersected with the operator's bounds
    pub fn effective_range(&self, settings: &BroadcastSettings) -> DelayRange {
        let tier = self.tier_range(settings.speed);
        let lo = settings
            .delay_min_secs
            .map_or(tier.min_secs, |m| m.max(tier.min_secs))
            .min(tier.max_secs);
        let hi = settings
            .delay_max_secs
            .map_or(tier.max_secs, |m| m.min(tier.max_secs))
            .max(lo);
        DelayRange::new(lo, hi)
    }

    /// Delay before the next send, or the instant sending may resume
    pub fn next_delay<R: Rng + ?Sized>(
        &self,
        settings: &BroadcastSettings,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> PacingDecision {
        if let Some(opening) = self.blocked_until(&settings.broadcast_hours, now) {
            return PacingDecision::BlockedUntil(opening);
        }

        let range = self.effective_range(settings);
        let (lo_ms, hi_ms) = (range.min_secs * 1000, range.max_secs * 1000);
        let delay_ms = if settings.simulate_human && hi_ms > lo_ms {
            rng.gen_range(lo_ms..=hi_ms)
        } else {
            (lo_ms + hi_ms) / 2
        };

        PacingDecision::Delay(Duration::from_millis(delay_ms))
    }

    /// `None` when `now` is inside the window, otherwise its next opening
    pub fn blocked_until(&self, hours: &BroadcastHours, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let (start, end) = match *hours {
            BroadcastHours::Always => return None,
            BroadcastHours::Window { start, end } if start == end => return None,
            BroadcastHours::Window { start, end } => (start, end),
        };

        let local = now.with_timezone(&self.offset);
        let t = local.time();
        let inside = if start < end {
            t >= start && t < end
        } else {
            t >= start || t < end
        };
        if inside {
            return None;
        }

        Some(self.next_opening(local, start))
    }

    fn next_opening(&self, local: DateTime<FixedOffset>, start: NaiveTime) -> DateTime<Utc> {
        let today = local.date_naive().and_time(start);
        let candidate = self
            .offset
            .from_local_datetime(&today)
            .single()
            .unwrap_or(local);
        let opening = if candidate > local {
            candidate
        } else {
            candidate + ChronoDuration::days(1)
        };
        opening.with_timezone(&Utc)
    }
}
