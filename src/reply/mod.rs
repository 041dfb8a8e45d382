//! Inbound reply tracking for stop-if-reply
//!
//! Replies are keyed by channel and sender. A recipient is skipped when they
//! replied on the campaign's channel at or after the campaign was created.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::audience::AudienceNormalizer;
use crate::error::{Error, Result};
use crate::models::{ChannelRef, RecipientAddress};
use crate::storage::ReplyLog;

pub struct ReplyWatcher {
    log: Arc<dyn ReplyLog>,
    normalizer: AudienceNormalizer,
}

impl ReplyWatcher {
    pub fn new(log: Arc<dyn ReplyLog>, normalizer: AudienceNormalizer) -> Self {
        Self { log, normalizer }
    }

    /// Record an inbound reply; the sender is normalized first. Idempotent.
    pub fn on_reply(
        &self,
        channel_id: &str,
        from: &str,
        at: DateTime<Utc>,
    ) -> Result<RecipientAddress> {
        let address = self
            .normalizer
            .normalize_one(from)
            .ok_or_else(|| Error::validation(format!("Invalid reply sender: {from}")))?;

        if self.log.record_reply(channel_id, &address, at)? {
            tracing::debug!(channel = %channel_id, from = %address, "Reply recorded");
        }
        Ok(address)
    }

    /// Whether `address` replied on `channel` at or after `since`
    pub fn is_flagged(
        &self,
        channel: &ChannelRef,
        address: &RecipientAddress,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self.log.has_replied_since(&channel.id, address, since)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryRepository;
    use chrono::Duration;

    fn watcher() -> ReplyWatcher {
        ReplyWatcher::new(
            Arc::new(InMemoryRepository::new()),
            AudienceNormalizer::default(),
        )
    }

    #[test]
    fn test_reply_is_normalized_and_flagged() {
        let w = watcher();
        let created = Utc::now();
        let address = w
            .on_reply("ch-1", "012-345 6789", created + Duration::minutes(1))
            .unwrap();
        assert_eq!(address.as_str(), "+60123456789");

        assert!(w.is_flagged(&ChannelRef::new("ch-1"), &address, created).unwrap());
        assert!(!w.is_flagged(&ChannelRef::new("ch-2"), &address, created).unwrap());
    }

    #[test]
    fn test_reply_before_campaign_is_ignored() {
        let w = watcher();
        let created = Utc::now();
        let address = w
            .on_reply("ch-1", "+60123456789", created - Duration::hours(2))
            .unwrap();
        assert!(!w.is_flagged(&ChannelRef::new("ch-1"), &address, created).unwrap());
    }

    #[test]
    fn test_duplicate_reply_is_idempotent() {
        let w = watcher();
        let now = Utc::now();
        w.on_reply("ch-1", "+60123456789", now).unwrap();
        w.on_reply("ch-1", "+60123456789", now).unwrap();
        let address = RecipientAddress::parse("+60123456789").unwrap();
        assert!(w.is_flagged(&ChannelRef::new("ch-1"), &address, now).unwrap());
    }

    #[test]
    fn test_invalid_sender_rejected() {
        assert!(watcher().on_reply("ch-1", "hello", Utc::now()).is_err());
    }
}
