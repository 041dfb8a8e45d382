//! Error scenario integration tests
//!
//! 1. Fatal channel errors fail the campaign
//! 2. Retryable errors are retried within the step
//! 3. Permanent rejections fail only the recipient
//! 4. Webhook status codes end to end

use std::sync::Arc;

use siaran::config::DelayRange;
use siaran::models::CampaignState;
use siaran::transport::{SendError, WebhookSender, WebhookSenderConfig};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{draft, engine_with, numbers, test_config, FlakySender};

// ============================================================================
// Sender failures
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fatal_error_fails_campaign() {
    let sender = Arc::new(FlakySender::new(u32::MAX, SendError::fatal("session revoked")));
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("doomed", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    match &status.state {
        CampaignState::Failed(reason) => assert!(reason.contains("session revoked")),
        other => panic!("expected failed campaign, got {other}"),
    }
    assert_eq!(sender.calls(), 1);
    assert_eq!(status.counts.failed, 1);
    assert_eq!(status.counts.pending, 2);

    // terminal: nothing can restart it
    assert!(engine.resume(created.id).await.is_err());
    assert!(engine.start(created.id).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_retryable_error_then_success() {
    let sender = Arc::new(FlakySender::new(2, SendError::retryable("gateway timeout")));
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("flaky", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.sent, 3);
    assert_eq!(status.counts.failed, 0);
    assert_eq!(sender.calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted_records_failure_and_continues() {
    let mut config = test_config();
    config.engine.max_send_retries = 1;
    // first recipient fails twice (one try + one retry), the rest succeed
    let sender = Arc::new(FlakySender::new(2, SendError::retryable("busy")));
    let engine = engine_with(config, sender.clone());
    let created = engine.create_campaign(draft("busy", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.failed, 1);
    assert_eq!(status.counts.sent, 2);
    assert_eq!(sender.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_permanent_rejection_fails_only_recipient() {
    let sender = Arc::new(FlakySender::new(1, SendError::permanent("not on whatsapp")));
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("mixed", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.failed, 1);
    assert_eq!(status.counts.sent, 2);
    assert_eq!(sender.calls(), 3);
}

// ============================================================================
// Webhook transport
// ============================================================================

fn instant_config() -> siaran::config::Config {
    let mut config = test_config();
    config.pacing.fast = DelayRange::new(0, 0);
    config
}

#[tokio::test]
async fn test_webhook_delivers_campaign() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/send"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let sender = WebhookSender::new(
        WebhookSenderConfig::new(format!("{}/send", mock_server.uri())).with_auth_token("secret"),
    )
    .unwrap();
    let engine = engine_with(instant_config(), Arc::new(sender));
    let created = engine.create_campaign(draft("webhook", numbers(2))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.sent, 2);

    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["to"], "+60100000000");
    assert_eq!(body["body"], "Hello +60100000000");
    assert_eq!(body["channel_id"], "ch-test");
}

#[tokio::test]
async fn test_webhook_unauthorized_fails_campaign() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_string("device logged out"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let sender = WebhookSender::new(WebhookSenderConfig::new(mock_server.uri())).unwrap();
    let engine = engine_with(instant_config(), Arc::new(sender));
    let created = engine.create_campaign(draft("revoked", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    match status.state {
        CampaignState::Failed(reason) => assert!(reason.contains("device logged out")),
        other => panic!("expected failed campaign, got {other}"),
    }
}
