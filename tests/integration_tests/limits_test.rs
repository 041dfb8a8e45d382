//! Plan ceiling and daily window tests

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use siaran::error::{DenyReason, Error};
use siaran::limiter::{day_window, ConfiguredTrustScores};
use siaran::models::{CampaignState, PauseReason};
use siaran::storage::Stores;
use siaran::transport::DryRunSender;
use siaran::BroadcastEngine;

use crate::common::{draft, engine_with, numbers, test_config, CHANNEL};

#[tokio::test(start_paused = true)]
async fn test_recipient_ceiling_blocks_start() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());

    let created = engine.create_campaign(draft("too big", numbers(501))).await.unwrap();
    assert_eq!(created.recipients, 501);

    match engine.start(created.id).await {
        Err(Error::LimitExceeded(DenyReason::MaxRecipientsExceeded { count, ceiling })) => {
            assert_eq!(count, 501);
            assert_eq!(ceiling, 500);
        }
        other => panic!("expected ceiling denial, got {other:?}"),
    }

    let status = engine.status(created.id).unwrap();
    assert_eq!(status.state, CampaignState::Draft);
    assert!(sender.sent().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_ceiling_is_inclusive() {
    let mut config = test_config();
    config.plan.max_recipients = 3;
    let engine = engine_with(config, Arc::new(DryRunSender::new()));

    let created = engine.create_campaign(draft("exact", numbers(3))).await.unwrap();
    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_scheduling_checks_ceiling() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));

    let mut d = draft("big later", numbers(501));
    d.schedule_at = Some(Utc::now() + ChronoDuration::hours(1));
    assert!(matches!(
        engine.create_campaign(d).await,
        Err(Error::LimitExceeded(_))
    ));

    let created = engine.create_campaign(draft("big draft", numbers(501))).await.unwrap();
    let result = engine
        .schedule(created.id, Utc::now() + ChronoDuration::hours(1))
        .await;
    assert!(matches!(result, Err(Error::LimitExceeded(_))));
    assert_eq!(
        engine.status(created.id).unwrap().state,
        CampaignState::Draft
    );
}

#[tokio::test(start_paused = true)]
async fn test_daily_limit_pauses_until_reset() {
    let mut config = test_config();
    config.plan.max_daily_sends = 2;
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(config, sender.clone());

    let created = engine.create_campaign(draft("daily", numbers(4))).await.unwrap();
    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(
        status.state,
        CampaignState::Paused(PauseReason::DailyLimitExceeded)
    );
    assert_eq!(status.counts.sent, 2);
    assert_eq!(status.cursor, 2);
    assert_eq!(status.counts.skipped_limit, 1);
    assert_eq!(status.counts.pending, 1);
    assert_eq!(status.resume_at, Some(day_window(Utc::now()).1));
    assert_eq!(sender.sent().len(), 2);

    // resets at UTC midnight, so the supervisor has nothing to do yet
    assert_eq!(engine.supervise_once().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_daily_limit_is_shared_across_campaigns_on_a_channel() {
    let mut config = test_config();
    config.plan.max_daily_sends = 3;
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(config, sender.clone());

    let first = engine.create_campaign(draft("first", numbers(2))).await.unwrap();
    let second = engine.create_campaign(draft("second", numbers(2))).await.unwrap();

    engine.start(first.id).await.unwrap();
    engine.start(second.id).await.unwrap();
    let a = engine.wait_until_settled(first.id).await.unwrap();
    let b = engine.wait_until_settled(second.id).await.unwrap();

    assert_eq!(a.counts.sent + b.counts.sent, 3);
    assert_eq!(sender.sent().len(), 3);
    let paused = [a.state, b.state]
        .iter()
        .filter(|s| **s == CampaignState::Paused(PauseReason::DailyLimitExceeded))
        .count();
    assert_eq!(paused, 1);
}

#[tokio::test(start_paused = true)]
async fn test_trust_score_selects_band_and_ignores_client_claims() {
    let mut config = test_config();
    config.plan.max_daily_sends = 1000;
    let sender = Arc::new(DryRunSender::new());

    // lowest band: 50 per day
    let trust = ConfiguredTrustScores::new(&config.trust).with_score(CHANNEL, 10);
    let engine = BroadcastEngine::builder(config, Stores::in_memory(), sender.clone())
        .trust_provider(Arc::new(trust))
        .build();

    let mut d = draft("claims", numbers(52));
    if let Some(channel) = d.channel.as_mut() {
        channel.trust_score = Some(100);
    }
    d.settings.daily_limit_hint = Some(1000);
    d.settings.delay_max_secs = Some(1);

    let created = engine.create_campaign(d).await.unwrap();
    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.counts.sent, 50);
    assert_eq!(
        status.state,
        CampaignState::Paused(PauseReason::DailyLimitExceeded)
    );
}
