//! Outbound send capability
//!
//! The engine only knows the [`MessageSender`] trait. Concrete transports
//! classify their failures into retryable rejections, permanent rejections and
//! fatal channel-level errors (revoked session, logged-out device, ...).

pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use thiserror::Error;

use crate::models::{Attachment, ChannelRef, RecipientAddress};

pub use webhook::{WebhookSender, WebhookSenderConfig};

/// Message after template selection and rendering
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedMessage {
    /// Template variant used, if the campaign rotates templates
    pub template: Option<String>,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Send failure reported by a transport
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendError {
    /// The message was not delivered to this recipient
    #[error("send rejected: {message}")]
    Rejected { message: String, retryable: bool },

    /// The channel itself is unusable; no further sends can succeed
    #[error("channel unavailable: {message}")]
    Fatal { message: String },
}

impl SendError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Rejected { retryable: true, .. })
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

/// Abstract "send one message" capability
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send_message(
        &self,
        channel: &ChannelRef,
        recipient: &RecipientAddress,
        message: &ResolvedMessage,
    ) -> Result<(), SendError>;
}

/// One delivery recorded by the dry-run sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRecord {
    pub channel_id: String,
    pub recipient: RecipientAddress,
    pub message: ResolvedMessage,
}

/// Sender that logs and records instead of delivering
#[derive(Debug, Default)]
pub struct DryRunSender {
    sent: Mutex<Vec<SentRecord>>,
}

impl DryRunSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything "sent" so far, in order
    pub fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MessageSender for DryRunSender {
    async fn send_message(
        &self,
        channel: &ChannelRef,
        recipient: &RecipientAddress,
        message: &ResolvedMessage,
    ) -> Result<(), SendError> {
        tracing::info!(
            channel = %channel.id,
            recipient = %recipient,
            template = ?message.template,
            "Dry-run send"
        );
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentRecord {
                channel_id: channel.id.clone(),
                recipient: recipient.clone(),
                message: message.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_error_classification() {
        assert!(SendError::retryable("timeout").is_retryable());
        assert!(!SendError::permanent("bad number").is_retryable());
        assert!(!SendError::fatal("revoked").is_retryable());
        assert!(SendError::fatal("revoked").is_fatal());
    }

    #[tokio::test]
    async fn test_dry_run_records_sends() {
        let sender = DryRunSender::new();
        let to = RecipientAddress::parse("+60123456789").unwrap();
        let message = ResolvedMessage {
            template: None,
            body: "hello".into(),
            attachments: vec![],
        };

        sender
            .send_message(&ChannelRef::new("ch"), &to, &message)
            .await
            .unwrap();

        let sent = sender.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient, to);
        assert_eq!(sent[0].message.body, "hello");
    }
}
