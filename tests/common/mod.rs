//! Common test utilities

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use siaran::config::{Config, DelayRange, PacingConfig};
use siaran::models::{
    AudienceSpec, BroadcastDraft, BroadcastSettings, ChannelRef, MessageContent,
    RecipientAddress, Speed,
};
use siaran::storage::Stores;
use siaran::transport::{MessageSender, ResolvedMessage, SendError};
use siaran::BroadcastEngine;
use uuid::Uuid;

pub const CHANNEL: &str = "ch-test";

/// Defaults with second-scale pacing and millisecond retries
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pacing = PacingConfig {
        slow: DelayRange::new(3, 4),
        normal: DelayRange::new(2, 3),
        fast: DelayRange::new(1, 2),
        ..PacingConfig::default()
    };
    config.engine.poll_interval_secs = 1;
    config.engine.retry_base_delay_ms = 10;
    config.engine.retry_max_delay_ms = 100;
    config.trust.default_score = 100;
    config.database.in_memory = true;
    config
}

/// `n` distinct local-format numbers (`01xxxxxxxx`)
pub fn numbers(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("01{i:08}")).collect()
}

/// Canonical form of `numbers(n)[i]`
pub fn canonical(i: usize) -> RecipientAddress {
    RecipientAddress::parse(format!("+601{i:08}")).unwrap()
}

pub fn draft(name: &str, tokens: Vec<String>) -> BroadcastDraft {
    BroadcastDraft {
        id: Uuid::new_v4(),
        name: name.to_string(),
        channel: Some(ChannelRef::new(CHANNEL)),
        audience: AudienceSpec::List(tokens),
        content: Some(MessageContent::Single("Hello {{phone}}".to_string())),
        attachments: vec![],
        schedule_at: None,
        settings: BroadcastSettings {
            speed: Speed::Fast,
            ..BroadcastSettings::default()
        },
    }
}

pub fn engine_with(config: Config, sender: Arc<dyn MessageSender>) -> BroadcastEngine {
    BroadcastEngine::builder(config, Stores::in_memory(), sender).build()
}

/// Fails the first `failures` calls with `error`, then succeeds
pub struct FlakySender {
    pub failures: u32,
    pub error: SendError,
    pub calls: AtomicU32,
}

impl FlakySender {
    pub fn new(failures: u32, error: SendError) -> Self {
        Self {
            failures,
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageSender for FlakySender {
    async fn send_message(
        &self,
        _channel: &ChannelRef,
        _recipient: &RecipientAddress,
        _message: &ResolvedMessage,
    ) -> Result<(), SendError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            Err(self.error.clone())
        } else {
            Ok(())
        }
    }
}
