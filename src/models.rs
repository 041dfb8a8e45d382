// Core data structures for siaran broadcasts

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use uuid::Uuid;

// ============================================================================
// Recipient Address
// ============================================================================

/// Canonical recipient address: `+` followed by 10 to 15 digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecipientAddress(String);

fn canonical_shape() -> &'static Regex {
    static SHAPE: OnceLock<Regex> = OnceLock::new();
    SHAPE.get_or_init(|| Regex::new(r"^\+[1-9][0-9]{9,14}$").expect("Invalid regex pattern"))
}

impl RecipientAddress {
    /// Wrap an already-canonical address, rejecting anything off-shape
    pub fn parse(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if canonical_shape().is_match(&value) {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Digits without the leading `+`
    pub fn digits(&self) -> &str {
        &self.0[1..]
    }

    /// Check the canonical shape of an arbitrary string
    pub fn is_canonical(value: &str) -> bool {
        canonical_shape().is_match(value)
    }
}

impl fmt::Display for RecipientAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for RecipientAddress {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value.clone()).ok_or_else(|| format!("not a canonical address: {value}"))
    }
}

impl From<RecipientAddress> for String {
    fn from(addr: RecipientAddress) -> Self {
        addr.0
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Reference to the sending identity (a WhatsApp number, an SMS sender id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRef {
    pub id: String,

    #[serde(default = "default_channel_type")]
    pub channel_type: String,

    /// Trust score as reported by the client. Never used for limits.
    #[serde(default)]
    pub trust_score: Option<u8>,
}

fn default_channel_type() -> String {
    String::from("whatsapp")
}

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel_type: default_channel_type(),
            trust_score: None,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Sending speed tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speed {
    Slow,
    #[default]
    Normal,
    Fast,
}

impl Speed {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Slow => "slow",
            Self::Normal => "normal",
            Self::Fast => "fast",
        }
    }
}

/// Time-of-day window in which sends are allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum BroadcastHours {
    #[default]
    Always,
    Window {
        #[serde(with = "hhmm")]
        start: NaiveTime,
        #[serde(with = "hhmm")]
        end: NaiveTime,
    },
}

mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

/// Per-broadcast delivery settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastSettings {
    #[serde(default)]
    pub speed: Speed,

    #[serde(default)]
    pub broadcast_hours: BroadcastHours,

    #[serde(default = "default_true")]
    pub simulate_human: bool,

    #[serde(default = "default_true")]
    pub stop_if_reply: bool,

    /// Lower bound supplied by the operator (narrows the speed range)
    #[serde(default)]
    pub delay_min_secs: Option<u64>,

    /// Upper bound supplied by the operator (narrows the speed range)
    #[serde(default)]
    pub delay_max_secs: Option<u64>,

    /// Client-side daily limit; advisory only
    #[serde(default)]
    pub daily_limit_hint: Option<u32>,
}

fn default_true() -> bool {
    true
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            speed: Speed::Normal,
            broadcast_hours: BroadcastHours::Always,
            simulate_human: true,
            stop_if_reply: true,
            delay_min_secs: None,
            delay_max_secs: None,
            daily_limit_hint: None,
        }
    }
}

// ============================================================================
// Draft
// ============================================================================

/// Rule-based audience selection, resolved by a contact directory
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceQuery {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
}

/// How the recipients of a draft are specified
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum AudienceSpec {
    /// Explicit tokens, one address each
    List(Vec<String>),
    /// Pasted text block separated by newlines, commas or whitespace
    Raw(String),
    /// Tag query against the contact directory
    Query(AudienceQuery),
}

/// One template variant with its rotation weight
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedTemplate {
    pub name: String,
    pub body: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
}

fn default_weight() -> u32 {
    1
}

/// Message body: a single text or weighted template variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum MessageContent {
    Single(String),
    Weighted(Vec<WeightedTemplate>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Pre-launch broadcast description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BroadcastDraft {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub channel: Option<ChannelRef>,
    pub audience: AudienceSpec,
    #[serde(default)]
    pub content: Option<MessageContent>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub schedule_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub settings: BroadcastSettings,
}

// ============================================================================
// Campaign
// ============================================================================

/// Why a running campaign was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    DailyLimitExceeded,
    ManualPause,
    OutsideHoursWindow,
}

impl PauseReason {
    /// Automatic pauses are lifted by the supervisor; manual ones are not
    pub fn auto_resumes(&self) -> bool {
        !matches!(self, Self::ManualPause)
    }
}

/// Campaign lifecycle state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum CampaignState {
    Draft,
    Scheduled,
    Running,
    Paused(PauseReason),
    Completed,
    Failed(String),
    Cancelled,
}

impl CampaignState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed(_) | Self::Cancelled)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Short label without the reason payload
    pub fn label(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Paused(_) => "paused",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for CampaignState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paused(reason) => write!(f, "paused({reason:?})"),
            Self::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Delivery outcome of one recipient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecipientOutcome {
    #[default]
    Pending,
    Sent,
    Failed,
    SkippedReply,
    SkippedLimit,
}

impl RecipientOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
            Self::SkippedReply => "skipped-reply",
            Self::SkippedLimit => "skipped-limit",
        }
    }
}

impl std::str::FromStr for RecipientOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "failed" => Ok(Self::Failed),
            "skipped-reply" => Ok(Self::SkippedReply),
            "skipped-limit" => Ok(Self::SkippedLimit),
            other => Err(format!("unknown outcome: {other}")),
        }
    }
}

/// Running totals persisted alongside the cursor
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub sent: u64,
    pub failed: u64,
    pub skipped_reply: u64,
    pub sent_today: u32,
    pub sent_day: Option<NaiveDate>,
}

impl CampaignCounters {
    /// Count one sent message against `day`, resetting the daily tally on rollover
    pub fn count_sent(&mut self, day: NaiveDate) {
        if self.sent_day != Some(day) {
            self.sent_day = Some(day);
            self.sent_today = 0;
        }
        self.sent += 1;
        self.sent_today += 1;
    }
}

/// A launched broadcast with its frozen recipient list and mutable progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub draft_id: Uuid,
    pub name: String,
    pub channel: ChannelRef,
    pub recipients: Vec<RecipientAddress>,
    pub content: MessageContent,
    pub attachments: Vec<Attachment>,
    pub settings: BroadcastSettings,
    pub schedule_at: Option<DateTime<Utc>>,
    pub state: CampaignState,
    pub cursor: usize,
    pub outcomes: Vec<RecipientOutcome>,
    pub counters: CampaignCounters,
    pub resume_at: Option<DateTime<Utc>>,
    pub template_seed: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-outcome tallies for status reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pending: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped_reply: usize,
    pub skipped_limit: usize,
}

impl OutcomeCounts {
    pub fn tally<'a>(outcomes: impl IntoIterator<Item = &'a RecipientOutcome>) -> Self {
        let mut counts = Self::default();
        for outcome in outcomes {
            counts.add(*outcome);
        }
        counts
    }

    pub fn add(&mut self, outcome: RecipientOutcome) {
        match outcome {
            RecipientOutcome::Pending => self.pending += 1,
            RecipientOutcome::Sent => self.sent += 1,
            RecipientOutcome::Failed => self.failed += 1,
            RecipientOutcome::SkippedReply => self.skipped_reply += 1,
            RecipientOutcome::SkippedLimit => self.skipped_limit += 1,
        }
    }
}

/// Consistent read model returned by status queries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignStatus {
    pub id: Uuid,
    pub name: String,
    pub state: CampaignState,
    pub cursor: usize,
    pub total: usize,
    pub counts: OutcomeCounts,
    pub sent_today: u32,
    pub resume_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignStatus {
    /// Percentage of recipients already attempted
    pub fn progress_percentage(&self) -> f64 {
        if self.total == 0 {
            return 100.0;
        }
        (self.cursor as f64 / self.total as f64) * 100.0
    }
}

impl From<&Campaign> for CampaignStatus {
    fn from(campaign: &Campaign) -> Self {
        Self {
            id: campaign.id,
            name: campaign.name.clone(),
            state: campaign.state.clone(),
            cursor: campaign.cursor,
            total: campaign.recipients.len(),
            counts: OutcomeCounts::tally(&campaign.outcomes),
            sent_today: campaign.counters.sent_today,
            resume_at: campaign.resume_at,
            updated_at: campaign.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recipient_address_shape() {
        assert!(RecipientAddress::parse("+60123456789").is_some());
        assert!(RecipientAddress::parse("60123456789").is_none());
        assert!(RecipientAddress::parse("+0123456789").is_none());
        assert!(RecipientAddress::parse("+601234").is_none());
        assert!(RecipientAddress::parse("").is_none());
    }

    #[test]
    fn test_recipient_address_serde_rejects_garbage() {
        let ok: RecipientAddress = serde_json::from_str("\"+60123456789\"").unwrap();
        assert_eq!(ok.digits(), "60123456789");
        assert!(serde_json::from_str::<RecipientAddress>("\"hello\"").is_err());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&CampaignState::Paused(PauseReason::ManualPause)).unwrap();
        assert_eq!(json, r#"{"state":"paused","reason":"manual_pause"}"#);

        let back: CampaignState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CampaignState::Paused(PauseReason::ManualPause));
    }

    #[test]
    fn test_broadcast_hours_parse() {
        let hours: BroadcastHours =
            serde_json::from_str(r#"{"mode":"window","start":"09:00","end":"21:30"}"#).unwrap();
        assert_eq!(
            hours,
            BroadcastHours::Window {
                start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
                end: NaiveTime::from_hms_opt(21, 30, 0).unwrap(),
            }
        );
    }

    #[test]
    fn test_counters_reset_on_new_day() {
        let mut counters = CampaignCounters::default();
        let day1 = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 3, 2).unwrap();

        counters.count_sent(day1);
        counters.count_sent(day1);
        assert_eq!(counters.sent_today, 2);

        counters.count_sent(day2);
        assert_eq!(counters.sent_today, 1);
        assert_eq!(counters.sent, 3);
    }

    #[test]
    fn test_outcome_round_trip_str() {
        for outcome in [
            RecipientOutcome::Pending,
            RecipientOutcome::Sent,
            RecipientOutcome::Failed,
            RecipientOutcome::SkippedReply,
            RecipientOutcome::SkippedLimit,
        ] {
            assert_eq!(outcome.as_str().parse::<RecipientOutcome>().unwrap(), outcome);
        }
    }

    #[test]
    fn test_draft_minimal_json() {
        let draft: BroadcastDraft = serde_json::from_str(
            r#"{
                "name": "Promo",
                "channel": {"id": "ch-1"},
                "audience": {"type": "raw", "value": "0123456789, 0198765432"},
                "content": {"type": "single", "value": "Hello {{phone}}"}
            }"#,
        )
        .unwrap();

        assert_eq!(draft.settings, BroadcastSettings::default());
        assert_eq!(draft.channel.unwrap().channel_type, "whatsapp");
    }
}
