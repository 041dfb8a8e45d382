//! Webhook transport
//!
//! Posts each message as JSON to a messaging gateway and maps the response
//! onto [`SendError`]:
//!
//! | Response | Outcome |
//! |----------|---------|
//! | 2xx | delivered |
//! | 401, 403, 410 | fatal (channel revoked or unauthenticated) |
//! | 408, 429, 5xx, network errors | retryable |
//! | other 4xx | permanent rejection |
//!
//! A `governor` limiter caps the request rate across all campaigns sharing the
//! sender. Retries are left to the dispatcher.

use async_trait::async_trait;
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use super::{MessageSender, ResolvedMessage, SendError};
use crate::config::TransportConfig;
use crate::error::{Error, Result};
use crate::models::{ChannelRef, RecipientAddress};

/// Webhook sender configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSenderConfig {
    /// Gateway endpoint
    pub url: String,
    /// Optional authentication token (sent as Bearer token)
    pub auth_token: Option<String>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Request rate ceiling
    pub requests_per_second: u32,
}

impl WebhookSenderConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_token: None,
            timeout_secs: 15,
            requests_per_second: 5,
        }
    }

    /// Build from the `[transport]` section, if a URL is configured
    pub fn from_transport(config: &TransportConfig) -> Option<Self> {
        config.webhook_url.as_ref().map(|url| Self {
            url: url.clone(),
            auth_token: config.auth_token.clone(),
            timeout_secs: config.timeout_secs,
            requests_per_second: config.requests_per_second,
        })
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.url.is_empty() {
            return Err("Webhook URL cannot be empty".to_string());
        }

        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err("Webhook URL must start with http:// or https://".to_string());
        }

        if self.timeout_secs == 0 {
            return Err("Timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// JSON body posted to the gateway
#[derive(Debug, Serialize)]
struct OutboundPayload<'a> {
    channel_id: &'a str,
    channel_type: &'a str,
    to: &'a str,
    template: Option<&'a str>,
    body: &'a str,
    attachments: &'a [crate::models::Attachment],
}

/// Sender that delivers through an HTTP gateway
pub struct WebhookSender {
    config: WebhookSenderConfig,
    client: Client,
    rate_limiter: RateLimiter<NotKeyed, InMemoryState, DefaultClock>,
}

impl WebhookSender {
    pub fn new(config: WebhookSenderConfig) -> Result<Self> {
        config.validate().map_err(Error::config)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::config(format!("Failed to create HTTP client: {e}")))?;

        let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = RateLimiter::direct(Quota::per_second(rate));

        Ok(Self {
            config,
            client,
            rate_limiter,
        })
    }

    pub fn url(&self) -> &str {
        &self.config.url
    }

    fn classify(status: StatusCode, body: String) -> SendError {
        let message = format!("HTTP {status}: {body}");
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::GONE => {
                SendError::fatal(message)
            }
            StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
                SendError::retryable(message)
            }
            s if s.is_server_error() => SendError::retryable(message),
            _ => SendError::permanent(message),
        }
    }
}

#[async_trait]
impl MessageSender for WebhookSender {
    async fn send_message(
        &self,
        channel: &ChannelRef,
        recipient: &RecipientAddress,
        message: &ResolvedMessage,
    ) -> std::result::Result<(), SendError> {
        self.rate_limiter.until_ready().await;

        let payload = OutboundPayload {
            channel_id: &channel.id,
            channel_type: &channel.channel_type,
            to: recipient.as_str(),
            template: message.template.as_deref(),
            body: &message.body,
            attachments: &message.attachments,
        };

        let mut request = self.client.post(&self.config.url).json(&payload);
        if let Some(token) = &self.config.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SendError::retryable(format!("request failed: {e}")))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(recipient = %recipient, status = %status, "Webhook accepted message");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read response body".to_string());
        Err(Self::classify(status, body))
    }
}
