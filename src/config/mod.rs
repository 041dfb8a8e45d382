//! Configuration management for the siaran engine
//!
//! This module handles loading and validating configuration from environment
//! variables and TOML files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Dispatch worker configuration
    pub engine: EngineConfig,

    /// Subscription tier limits
    pub plan: PlanConfig,

    /// Pacing ranges and sending time zone
    pub pacing: PacingConfig,

    /// Recipient normalization rules
    pub audience: AudienceConfig,

    /// Channel trust scores
    pub trust: TrustConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// HTTP API configuration
    pub server: ServerConfig,

    /// Outbound webhook transport
    pub transport: TransportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Dispatch worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How often the supervisor looks for due schedules and resumes
    pub poll_interval_secs: u64,

    /// Retries for a retryable send failure before recording `failed`
    pub max_send_retries: u32,

    /// Base delay for send retry backoff
    pub retry_base_delay_ms: u64,

    /// Cap for send retry backoff
    pub retry_max_delay_ms: u64,

    /// Attempts at a compare-and-set before reporting a conflict
    pub max_state_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            max_send_retries: 2,
            retry_base_delay_ms: 1000,
            retry_max_delay_ms: 30_000,
            max_state_retries: 3,
        }
    }
}

/// Subscription tier limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanConfig {
    /// Tier name (for logs and API output)
    pub tier: String,

    /// Maximum distinct recipients per campaign
    pub max_recipients: usize,

    /// Absolute ceiling on sends per channel per UTC day
    pub max_daily_sends: u32,
}

impl Default for PlanConfig {
    fn default() -> Self {
        Self {
            tier: String::from("standard"),
            max_recipients: 500,
            max_daily_sends: 1000,
        }
    }
}

/// Inclusive delay range in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayRange {
    pub const fn new(min_secs: u64, max_secs: u64) -> Self {
        Self { min_secs, max_secs }
    }

    pub fn mean_secs(&self) -> f64 {
        (self.min_secs + self.max_secs) as f64 / 2.0
    }
}

/// Pacing ranges per speed tier
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub slow: DelayRange,
    pub normal: DelayRange,
    pub fast: DelayRange,

    /// Offset of the sending time zone used for broadcast-hours windows
    pub utc_offset_minutes: i32,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            slow: DelayRange::new(45, 90),
            normal: DelayRange::new(20, 45),
            fast: DelayRange::new(8, 20),
            utc_offset_minutes: 8 * 60,
        }
    }
}

/// Recipient normalization rules
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceConfig {
    /// Country calling code without `+`
    pub country_code: String,

    /// Domestic trunk prefix replaced by the country code
    pub trunk_prefix: String,

    /// Minimum digits in the canonical number, country code included
    pub min_digits: usize,

    /// Maximum digits in the canonical number (E.164)
    pub max_digits: usize,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            country_code: String::from("60"),
            trunk_prefix: String::from("0"),
            min_digits: 10,
            max_digits: 15,
        }
    }
}

/// Channel trust scores, 0..=100
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    /// Score for channels without an explicit entry
    pub default_score: u8,

    /// Per-channel overrides keyed by channel id
    pub channels: HashMap<String, u8>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            default_score: 50,
            channels: HashMap::new(),
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database path
    pub sqlite_path: PathBuf,

    /// Keep everything in memory (tests, dry runs)
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("data/siaran.db"),
            in_memory: false,
        }
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub enable_cors: bool,
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
            enable_request_logging: true,
        }
    }
}

/// Outbound webhook transport
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Gateway endpoint; `None` selects the dry-run sender
    pub webhook_url: Option<String>,

    /// Bearer token for the gateway
    pub auth_token: Option<String>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Global burst guard across all campaigns (requests per second)
    pub requests_per_second: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            auth_token: None,
            timeout_secs: 15,
            requests_per_second: 5,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: String::from("info"),
            format: String::from("text"),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

impl Config {
    /// Load configuration from environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse("SIARAN_POLL_INTERVAL_SECS") {
            config.engine.poll_interval_secs = v;
        }
        if let Some(v) = env_parse("SIARAN_MAX_SEND_RETRIES") {
            config.engine.max_send_retries = v;
        }
        if let Ok(v) = std::env::var("SIARAN_PLAN_TIER") {
            config.plan.tier = v;
        }
        if let Some(v) = env_parse("SIARAN_MAX_RECIPIENTS") {
            config.plan.max_recipients = v;
        }
        if let Some(v) = env_parse("SIARAN_MAX_DAILY_SENDS") {
            config.plan.max_daily_sends = v;
        }
        if let Some(v) = env_parse("SIARAN_UTC_OFFSET_MINUTES") {
            config.pacing.utc_offset_minutes = v;
        }
        if let Ok(v) = std::env::var("SIARAN_COUNTRY_CODE") {
            config.audience.country_code = v;
        }
        if let Some(v) = env_parse("SIARAN_DEFAULT_TRUST_SCORE") {
            config.trust.default_score = v;
        }
        if let Ok(v) = std::env::var("SIARAN_SQLITE_PATH") {
            config.database.sqlite_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("SIARAN_BIND_ADDRESS") {
            config.server.bind_address = v
                .parse()
                .with_context(|| format!("Invalid SIARAN_BIND_ADDRESS: {v}"))?;
        }
        if let Ok(v) = std::env::var("SIARAN_WEBHOOK_URL") {
            config.transport.webhook_url = Some(v);
        }
        config.transport.auth_token = std::env::var("SIARAN_WEBHOOK_TOKEN").ok();
        if let Ok(v) = std::env::var("SIARAN_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("SIARAN_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.engine.poll_interval_secs == 0 {
            anyhow::bail!("poll_interval_secs must be greater than 0");
        }

        if self.plan.max_recipients == 0 {
            anyhow::bail!("max_recipients must be greater than 0");
        }

        for (name, range) in [
            ("slow", self.pacing.slow),
            ("normal", self.pacing.normal),
            ("fast", self.pacing.fast),
        ] {
            if range.min_secs > range.max_secs {
                anyhow::bail!("pacing.{name}: min_secs must not exceed max_secs");
            }
        }

        if !(self.pacing.slow.mean_secs() > self.pacing.normal.mean_secs()
            && self.pacing.normal.mean_secs() > self.pacing.fast.mean_secs())
        {
            anyhow::bail!("pacing ranges must be ordered slow > normal > fast by mean delay");
        }

        if self.pacing.utc_offset_minutes.abs() >= 24 * 60 {
            anyhow::bail!("utc_offset_minutes must be within one day");
        }

        if self.audience.country_code.is_empty()
            || !self.audience.country_code.chars().all(|c| c.is_ascii_digit())
        {
            anyhow::bail!("country_code must be a non-empty digit string");
        }

        if self.audience.min_digits > self.audience.max_digits {
            anyhow::bail!("min_digits must not exceed max_digits");
        }

        if self.trust.default_score > 100 || self.trust.channels.values().any(|s| *s > 100) {
            anyhow::bail!("trust scores must be within 0..=100");
        }

        if self.transport.requests_per_second == 0 {
            anyhow::bail!("requests_per_second must be greater than 0");
        }

        Ok(())
    }

    /// Supervisor poll interval as Duration
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.engine.poll_interval_secs)
    }

    /// Webhook request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.transport.timeout_secs)
    }
}
