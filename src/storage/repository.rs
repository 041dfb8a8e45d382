//! Repository pattern for campaign persistence
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              BroadcastEngine / Dispatcher                   │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Repository Traits                         │
//! │   CampaignRepository, ReplyLog, DailyCounterStore           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!               ┌──────────────┴──────────────┐
//!               ▼                             ▼
//!     ┌─────────────────┐           ┌─────────────────┐
//!     │     SQLite      │           │    In-memory    │
//!     └─────────────────┘           └─────────────────┘
//! ```
//!
//! Progress writes (outcome, cursor, counters) never touch the state column.
//! State is only changed through [`CampaignRepository::compare_and_set_state`],
//! so a worker can never overwrite an operator's cancel or pause.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::limiter::DailyCounterStore;
use crate::models::{
    Campaign, CampaignCounters, CampaignState, CampaignStatus, OutcomeCounts, RecipientAddress,
    RecipientOutcome,
};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Core Types
// ============================================================================

/// State-related columns written by a lifecycle transition
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub state: CampaignState,
    pub resume_at: Option<DateTime<Utc>>,
    pub schedule_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Campaign> for StateUpdate {
    fn from(campaign: &Campaign) -> Self {
        Self {
            state: campaign.state.clone(),
            resume_at: campaign.resume_at,
            schedule_at: campaign.schedule_at,
            updated_at: campaign.updated_at,
        }
    }
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Durable campaign store
pub trait CampaignRepository: Send + Sync {
    /// Store a new campaign with its frozen recipient list
    fn insert(&self, campaign: &Campaign) -> Result<()>;

    /// Load a full campaign
    fn load(&self, id: Uuid) -> Result<Option<Campaign>>;

    /// Load only the lifecycle state
    fn load_state(&self, id: Uuid) -> Result<Option<CampaignState>>;

    /// Apply `update` only if the stored state still equals `expected`
    fn compare_and_set_state(
        &self,
        id: Uuid,
        expected: &CampaignState,
        update: &StateUpdate,
    ) -> Result<bool>;

    /// Persist the outcome at `position` together with cursor and counters
    fn record_progress(&self, campaign: &Campaign, position: usize) -> Result<()>;

    /// Consistent status snapshot
    fn status(&self, id: Uuid) -> Result<Option<CampaignStatus>>;

    /// Status of every campaign, newest first
    fn list_statuses(&self) -> Result<Vec<CampaignStatus>>;

    /// Campaigns the supervisor should act on at `now`: running ones,
    /// scheduled ones whose time has come, and automatically paused ones whose
    /// `resume_at` has passed
    fn due_for_resume(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>>;
}

/// Inbound reply record, keyed by channel and sender
pub trait ReplyLog: Send + Sync {
    /// Record a reply, keeping the latest time. Returns whether anything changed.
    fn record_reply(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Whether `from` replied on the channel at or after `since`
    fn has_replied_since(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        since: DateTime<Utc>,
    ) -> Result<bool>;
}

// ============================================================================
// SQLite Implementation
// ============================================================================

/// SQLite store for campaigns, replies and daily counters
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).context("Failed to open SQLite database")?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        // Other processes may share the file
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite repository initialized");
        Ok(repo)
    }

    /// Create in-memory repository (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to create in-memory SQLite")?;
        let repo = Self {
            conn: Mutex::new(conn),
        };
        repo.create_schema()?;
        Ok(repo)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("SQLite connection lock poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                PRAGMA foreign_keys = ON;

                CREATE TABLE IF NOT EXISTS campaigns (
                    id TEXT PRIMARY KEY,
                    draft_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    channel TEXT NOT NULL,
                    content TEXT NOT NULL,
                    attachments TEXT NOT NULL,
                    settings TEXT NOT NULL,
                    schedule_at TEXT,
                    state_label TEXT NOT NULL,
                    state TEXT NOT NULL,
                    cursor INTEGER NOT NULL DEFAULT 0,
                    counters TEXT NOT NULL,
                    resume_at TEXT,
                    template_seed INTEGER NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_campaigns_state
                    ON campaigns(state_label);

                CREATE TABLE IF NOT EXISTS campaign_recipients (
                    campaign_id TEXT NOT NULL REFERENCES campaigns(id) ON DELETE CASCADE,
                    position INTEGER NOT NULL,
                    address TEXT NOT NULL,
                    outcome TEXT NOT NULL DEFAULT 'pending',
                    PRIMARY KEY (campaign_id, position)
                );

                CREATE TABLE IF NOT EXISTS daily_counters (
                    channel_id TEXT NOT NULL,
                    day TEXT NOT NULL,
                    count INTEGER NOT NULL,
                    PRIMARY KEY (channel_id, day)
                );

                CREATE TABLE IF NOT EXISTS replies (
                    channel_id TEXT NOT NULL,
                    address TEXT NOT NULL,
                    replied_at TEXT NOT NULL,
                    PRIMARY KEY (channel_id, address)
                );
                "#,
        )
        .context("Failed to create SQLite schema")?;

        Ok(())
    }

    fn outcome_counts(conn: &Connection, id: &str) -> Result<OutcomeCounts> {
        let mut stmt = conn.prepare(
            "SELECT outcome, COUNT(*) FROM campaign_recipients
             WHERE campaign_id = ?1 GROUP BY outcome",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = OutcomeCounts::default();
        for row in rows {
            let (outcome, n) = row?;
            let outcome: RecipientOutcome = outcome
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Unknown recipient outcome")?;
            for _ in 0..n {
                counts.add(outcome);
            }
        }
        Ok(counts)
    }

    fn status_row(conn: &Connection, id: &str) -> Result<Option<CampaignStatus>> {
        let row = conn
            .query_row(
                "SELECT id, name, state, cursor, counters, resume_at, updated_at,
                        (SELECT COUNT(*) FROM campaign_recipients WHERE campaign_id = campaigns.id)
                 FROM campaigns WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Option<String>>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, i64>(7)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load campaign status")?;

        let Some((id, name, state, cursor, counters, resume_at, updated_at, total)) = row else {
            return Ok(None);
        };

        let counters: CampaignCounters = serde_json::from_str(&counters)?;
        let counts = Self::outcome_counts(conn, &id)?;
        let today = Utc::now().date_naive();

        Ok(Some(CampaignStatus {
            id: parse_uuid(&id)?,
            name,
            state: serde_json::from_str(&state)?,
            cursor: cursor as usize,
            total: total as usize,
            counts,
            sent_today: if counters.sent_day == Some(today) {
                counters.sent_today
            } else {
                0
            },
            resume_at: resume_at.as_deref().map(parse_time).transpose()?,
            updated_at: parse_time(&updated_at)?,
        }))
    }
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Uuid::parse_str(value).with_context(|| format!("Invalid campaign id: {value}"))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {value}"))
}

impl CampaignRepository for SqliteRepository {
    fn insert(&self, campaign: &Campaign) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = campaign.id.to_string();

        tx.execute(
            r#"
                INSERT INTO campaigns (
                    id, draft_id, name, channel, content, attachments, settings,
                    schedule_at, state_label, state, cursor, counters, resume_at,
                    template_seed, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
            params![
                id,
                campaign.draft_id.to_string(),
                campaign.name,
                serde_json::to_string(&campaign.channel)?,
                serde_json::to_string(&campaign.content)?,
                serde_json::to_string(&campaign.attachments)?,
                serde_json::to_string(&campaign.settings)?,
                campaign.schedule_at.map(|t| t.to_rfc3339()),
                campaign.state.label(),
                serde_json::to_string(&campaign.state)?,
                campaign.cursor as i64,
                serde_json::to_string(&campaign.counters)?,
                campaign.resume_at.map(|t| t.to_rfc3339()),
                campaign.template_seed as i64,
                campaign.created_at.to_rfc3339(),
                campaign.updated_at.to_rfc3339(),
            ],
        )
        .context("Failed to insert campaign")?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO campaign_recipients (campaign_id, position, address, outcome)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, (address, outcome)) in
                campaign.recipients.iter().zip(&campaign.outcomes).enumerate()
            {
                stmt.execute(params![id, position as i64, address.as_str(), outcome.as_str()])?;
            }
        }

        tx.commit().context("Failed to commit campaign insert")?;
        Ok(())
    }

    fn load(&self, id: Uuid) -> Result<Option<Campaign>> {
        let conn = self.lock()?;
        let key = id.to_string();

        let row = conn
            .query_row(
                "SELECT draft_id, name, channel, content, attachments, settings, schedule_at,
                        state, cursor, counters, resume_at, template_seed, created_at, updated_at
                 FROM campaigns WHERE id = ?1",
                params![key],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, Option<String>>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, i64>(8)?,
                        row.get::<_, String>(9)?,
                        row.get::<_, Option<String>>(10)?,
                        row.get::<_, i64>(11)?,
                        row.get::<_, String>(12)?,
                        row.get::<_, String>(13)?,
                    ))
                },
            )
            .optional()
            .context("Failed to load campaign")?;

        let Some((
            draft_id,
            name,
            channel,
            content,
            attachments,
            settings,
            schedule_at,
            state,
            cursor,
            counters,
            resume_at,
            template_seed,
            created_at,
            updated_at,
        )) = row
        else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT address, outcome FROM campaign_recipients
             WHERE campaign_id = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut recipients = Vec::new();
        let mut outcomes = Vec::new();
        for row in rows {
            let (address, outcome) = row?;
            recipients.push(
                RecipientAddress::parse(&address)
                    .with_context(|| format!("Stored address is not canonical: {address}"))?,
            );
            outcomes.push(outcome.parse().map_err(|e: String| anyhow!(e))?);
        }

        Ok(Some(Campaign {
            id,
            draft_id: parse_uuid(&draft_id)?,
            name,
            channel: serde_json::from_str(&channel)?,
            recipients,
            content: serde_json::from_str(&content)?,
            attachments: serde_json::from_str(&attachments)?,
            settings: serde_json::from_str(&settings)?,
            schedule_at: schedule_at.as_deref().map(parse_time).transpose()?,
            state: serde_json::from_str(&state)?,
            cursor: cursor as usize,
            outcomes,
            counters: serde_json::from_str(&counters)?,
            resume_at: resume_at.as_deref().map(parse_time).transpose()?,
            template_seed: template_seed as u64,
            created_at: parse_time(&created_at)?,
            updated_at: parse_time(&updated_at)?,
        }))
    }

    fn load_state(&self, id: Uuid) -> Result<Option<CampaignState>> {
        let conn = self.lock()?;
        let state: Option<String> = conn
            .query_row(
                "SELECT state FROM campaigns WHERE id = ?1",
                params![id.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load campaign state")?;

        state
            .map(|s| serde_json::from_str(&s).context("Invalid stored state"))
            .transpose()
    }

    fn compare_and_set_state(
        &self,
        id: Uuid,
        expected: &CampaignState,
        update: &StateUpdate,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                r#"
                    UPDATE campaigns SET
                        state_label = ?1,
                        state = ?2,
                        resume_at = ?3,
                        schedule_at = ?4,
                        updated_at = ?5
                    WHERE id = ?6 AND state = ?7
                    "#,
                params![
                    update.state.label(),
                    serde_json::to_string(&update.state)?,
                    update.resume_at.map(|t| t.to_rfc3339()),
                    update.schedule_at.map(|t| t.to_rfc3339()),
                    update.updated_at.to_rfc3339(),
                    id.to_string(),
                    serde_json::to_string(expected)?,
                ],
            )
            .context("Failed to update campaign state")?;

        Ok(changed == 1)
    }

    fn record_progress(&self, campaign: &Campaign, position: usize) -> Result<()> {
        let outcome = campaign
            .outcomes
            .get(position)
            .with_context(|| format!("No recipient at position {position}"))?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let id = campaign.id.to_string();

        tx.execute(
            "UPDATE campaign_recipients SET outcome = ?1 WHERE campaign_id = ?2 AND position = ?3",
            params![outcome.as_str(), id, position as i64],
        )?;
        tx.execute(
            "UPDATE campaigns SET cursor = ?1, counters = ?2, updated_at = ?3 WHERE id = ?4",
            params![
                campaign.cursor as i64,
                serde_json::to_string(&campaign.counters)?,
                campaign.updated_at.to_rfc3339(),
                id,
            ],
        )?;

        tx.commit().context("Failed to record progress")?;
        Ok(())
    }

    fn status(&self, id: Uuid) -> Result<Option<CampaignStatus>> {
        let conn = self.lock()?;
        Self::status_row(&conn, &id.to_string())
    }

    fn list_statuses(&self) -> Result<Vec<CampaignStatus>> {
        let conn = self.lock()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM campaigns ORDER BY created_at DESC")?;
            let rows = stmt.query_map([], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };

        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(status) = Self::status_row(&conn, &id)? {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    fn due_for_resume(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, state, schedule_at, resume_at FROM campaigns
             WHERE state_label IN ('scheduled', 'running', 'paused')
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut ids = Vec::new();
        for row in rows {
            let (id, state, schedule_at, resume_at) = row?;
            let state: CampaignState = serde_json::from_str(&state)?;
            let schedule_at = schedule_at.as_deref().map(parse_time).transpose()?;
            let resume_at = resume_at.as_deref().map(parse_time).transpose()?;
            if is_due(&state, schedule_at, resume_at, now) {
                ids.push(parse_uuid(&id)?);
            }
        }
        Ok(ids)
    }
}

/// Whether the supervisor should act on a campaign at `now`
pub(crate) fn is_due(
    state: &CampaignState,
    schedule_at: Option<DateTime<Utc>>,
    resume_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    match state {
        CampaignState::Running => true,
        CampaignState::Scheduled => schedule_at.map_or(true, |at| at <= now),
        CampaignState::Paused(reason) => {
            reason.auto_resumes() && resume_at.map_or(true, |at| at <= now)
        }
        _ => false,
    }
}

impl ReplyLog for SqliteRepository {
    fn record_reply(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let existing: Option<String> = conn
            .query_row(
                "SELECT replied_at FROM replies WHERE channel_id = ?1 AND address = ?2",
                params![channel_id, from.as_str()],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(existing) = existing {
            if parse_time(&existing)? >= at {
                return Ok(false);
            }
        }

        conn.execute(
            r#"
                INSERT INTO replies (channel_id, address, replied_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(channel_id, address) DO UPDATE SET
                    replied_at = excluded.replied_at
                "#,
            params![channel_id, from.as_str(), at.to_rfc3339()],
        )
        .context("Failed to record reply")?;

        Ok(true)
    }

    fn has_replied_since(
        &self,
        channel_id: &str,
        from: &RecipientAddress,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let replied_at: Option<String> = conn
            .query_row(
                "SELECT replied_at FROM replies WHERE channel_id = ?1 AND address = ?2",
                params![channel_id, from.as_str()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to look up reply")?;

        match replied_at {
            Some(at) => Ok(parse_time(&at)? >= since),
            None => Ok(false),
        }
    }
}

impl DailyCounterStore for SqliteRepository {
    fn try_add(
        &self,
        channel_id: &str,
        day: NaiveDate,
        amount: u32,
        limit: u32,
    ) -> Result<Option<u32>> {
        if amount > limit {
            return Ok(None);
        }

        let conn = self.lock()?;
        let day = day.to_string();
        let changed = conn
            .execute(
                r#"
                    INSERT INTO daily_counters (channel_id, day, count)
                    VALUES (?1, ?2, ?3)
                    ON CONFLICT(channel_id, day) DO UPDATE SET
                        count = count + excluded.count
                    WHERE daily_counters.count + excluded.count <= ?4
                    "#,
                params![channel_id, day, amount, limit],
            )
            .context("Failed to update daily counter")?;

        if changed == 0 {
            return Ok(None);
        }

        let total: u32 = conn.query_row(
            "SELECT count FROM daily_counters WHERE channel_id = ?1 AND day = ?2",
            params![channel_id, day],
            |row| row.get(0),
        )?;
        Ok(Some(total))
    }

    fn current(&self, channel_id: &str, day: NaiveDate) -> Result<u32> {
        let conn = self.lock()?;
        let total: Option<u32> = conn
            .query_row(
                "SELECT count FROM daily_counters WHERE channel_id = ?1 AND day = ?2",
                params![channel_id, day.to_string()],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to read daily counter")?;
        Ok(total.unwrap_or(0))
    }
}
