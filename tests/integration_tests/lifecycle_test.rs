//! Campaign lifecycle tests
//!
//! Drives real workers on paused tokio time with second-scale pacing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, FixedOffset, Utc};
use siaran::engine::{Contact, StaticContactDirectory};
use siaran::error::Error;
use siaran::models::{
    AudienceQuery, AudienceSpec, BroadcastHours, CampaignState, MessageContent, PauseReason,
    WeightedTemplate,
};
use siaran::storage::{StateUpdate, Stores};
use siaran::transport::DryRunSender;
use siaran::BroadcastEngine;

use crate::common::{canonical, draft, engine_with, numbers, test_config, CHANNEL};

// ============================================================================
// Full runs
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_campaign_sends_everyone_and_completes() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());

    let created = engine.create_campaign(draft("promo", numbers(5))).await.unwrap();
    assert_eq!(created.recipients, 5);
    assert_eq!(created.state, CampaignState::Draft);

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.sent, 5);
    assert_eq!(status.counts.pending, 0);
    assert_eq!(status.cursor, 5);

    let sent = sender.sent();
    let order: Vec<_> = sent.iter().map(|s| s.recipient.clone()).collect();
    assert_eq!(order, (0..5).map(canonical).collect::<Vec<_>>());
    assert_eq!(sent[0].message.body, format!("Hello {}", canonical(0)));
    assert!(sent.iter().all(|s| s.channel_id == CHANNEL));
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_and_invalid_tokens_at_creation() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));

    let mut tokens = numbers(3);
    tokens.push("010-000-0000".into()); // same number as numbers(3)[0]
    tokens.push("call me".into());
    tokens.push("12".into());

    let created = engine.create_campaign(draft("dedup", tokens)).await.unwrap();
    assert_eq!(created.recipients, 3);
    assert_eq!(created.invalid, vec!["call".to_string(), "me".into(), "12".into()]);
}

#[tokio::test(start_paused = true)]
async fn test_weighted_templates_are_rotated() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());

    let mut d = draft("rotation", numbers(20));
    d.content = Some(MessageContent::Weighted(vec![
        WeightedTemplate {
            name: "a".into(),
            body: "A {{position}}".into(),
            weight: 1,
        },
        WeightedTemplate {
            name: "b".into(),
            body: "B {{position}}".into(),
            weight: 1,
        },
    ]));

    let created = engine.create_campaign(d).await.unwrap();
    engine.start(created.id).await.unwrap();
    engine.wait_until_settled(created.id).await.unwrap();

    let sent = sender.sent();
    assert_eq!(sent.len(), 20);
    assert!(sent.iter().all(|s| s.message.template.is_some()));
    assert!(sent.iter().any(|s| s.message.template.as_deref() == Some("a")));
    assert!(sent.iter().any(|s| s.message.template.as_deref() == Some("b")));
    assert!(sent[3].message.body.ends_with(" 4"));
}

#[tokio::test(start_paused = true)]
async fn test_query_audience_uses_contact_directory() {
    let sender = Arc::new(DryRunSender::new());
    let directory = StaticContactDirectory::new(vec![
        Contact {
            phone: "0100000001".into(),
            tags: vec!["vip".into()],
        },
        Contact {
            phone: "0100000002".into(),
            tags: vec!["regular".into()],
        },
    ]);
    let engine = BroadcastEngine::builder(test_config(), Stores::in_memory(), sender.clone())
        .contact_directory(Arc::new(directory))
        .build();

    let mut d = draft("vip only", vec![]);
    d.audience = AudienceSpec::Query(AudienceQuery {
        tags: vec!["vip".into()],
        exclude_tags: vec![],
    });

    let created = engine.create_campaign(d).await.unwrap();
    assert_eq!(created.recipients, 1);

    engine.start(created.id).await.unwrap();
    engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(sender.sent()[0].recipient, canonical(1));
}

// ============================================================================
// Pause / resume / cancel
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume_sends_each_recipient_once() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("pausable", numbers(6))).await.unwrap();

    engine.start(created.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(3500)).await;

    engine.pause(created.id).await.unwrap();
    let paused = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(paused.state, CampaignState::Paused(PauseReason::ManualPause));
    assert!(paused.cursor >= 1 && paused.cursor < 6);
    assert_eq!(sender.sent().len(), paused.cursor);

    // nothing moves while manually paused, not even with the supervisor
    tokio::time::sleep(Duration::from_secs(30)).await;
    engine.supervise_once().await.unwrap();
    let still = engine.status(created.id).unwrap();
    assert_eq!(still.cursor, paused.cursor);
    assert_eq!(still.state, paused.state);

    engine.resume(created.id).await.unwrap();
    let done = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(done.state, CampaignState::Completed);

    let order: Vec<_> = sender.sent().into_iter().map(|s| s.recipient).collect();
    assert_eq!(order, (0..6).map(canonical).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_requests_are_idempotent() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));
    let created = engine.create_campaign(draft("twice", numbers(3))).await.unwrap();

    engine.start(created.id).await.unwrap();
    let again = engine.start(created.id).await.unwrap();
    assert_eq!(again.state, CampaignState::Running);

    engine.pause(created.id).await.unwrap();
    let again = engine.pause(created.id).await.unwrap();
    assert_eq!(again.state, CampaignState::Paused(PauseReason::ManualPause));

    engine.resume(created.id).await.unwrap();
    let again = engine.resume(created.id).await.unwrap();
    assert_eq!(again.state, CampaignState::Running);

    let done = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(done.counts.sent, 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_paused_is_final() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("cancel", numbers(4))).await.unwrap();

    engine.start(created.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    engine.pause(created.id).await.unwrap();
    let paused = engine.wait_until_settled(created.id).await.unwrap();

    let cancelled = engine.cancel(created.id).await.unwrap();
    assert_eq!(cancelled.state, CampaignState::Cancelled);
    assert_eq!(cancelled.cursor, paused.cursor);

    assert!(matches!(
        engine.resume(created.id).await,
        Err(Error::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.start(created.id).await,
        Err(Error::InvalidTransition { .. })
    ));

    // cancelling again is a no-op
    assert_eq!(
        engine.cancel(created.id).await.unwrap().state,
        CampaignState::Cancelled
    );

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(sender.sent().len(), paused.cursor);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_running_campaign_stops_worker() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("stop", numbers(10))).await.unwrap();

    engine.start(created.id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(2500)).await;
    engine.cancel(created.id).await.unwrap();

    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Cancelled);
    assert!(status.cursor < 10);
    assert_eq!(sender.sent().len(), status.cursor);
    assert_eq!(status.counts.pending, 10 - status.cursor);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_campaign_is_not_found() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));
    let id = uuid::Uuid::new_v4();
    assert!(matches!(engine.start(id).await, Err(Error::NotFound(_))));
    assert!(matches!(engine.status(id), Err(Error::NotFound(_))));
}

// ============================================================================
// Replies
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_replied_recipient_is_skipped() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());
    let created = engine.create_campaign(draft("replies", numbers(4))).await.unwrap();

    // reply in local format, matched after normalization
    let address = engine.on_reply(CHANNEL, "010-0000002", Utc::now()).unwrap();
    assert_eq!(address, canonical(2));

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.sent, 3);
    assert_eq!(status.counts.skipped_reply, 1);
    assert!(sender.sent().iter().all(|s| s.recipient != canonical(2)));
}

#[tokio::test(start_paused = true)]
async fn test_reply_ignored_when_stop_if_reply_disabled() {
    let sender = Arc::new(DryRunSender::new());
    let engine = engine_with(test_config(), sender.clone());
    let mut d = draft("no-stop", numbers(2));
    d.settings.stop_if_reply = false;
    let created = engine.create_campaign(d).await.unwrap();

    engine.on_reply(CHANNEL, "0100000000", Utc::now()).unwrap();
    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.counts.sent, 2);
}

#[tokio::test(start_paused = true)]
async fn test_reply_on_other_channel_does_not_count() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));
    let created = engine.create_campaign(draft("scoped", numbers(2))).await.unwrap();

    engine.on_reply("another-channel", "0100000000", Utc::now()).unwrap();
    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.counts.skipped_reply, 0);
    assert_eq!(status.counts.sent, 2);
}

// ============================================================================
// Broadcast hours and scheduling
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_outside_hours_pauses_until_window_opens() {
    let sender = Arc::new(DryRunSender::new());
    let config = test_config();
    let offset = FixedOffset::east_opt(config.pacing.utc_offset_minutes * 60).unwrap();
    let engine = engine_with(config, sender.clone());

    let now = Utc::now();
    let local = now.with_timezone(&offset).time();
    let start = local + ChronoDuration::hours(2);
    let end = local + ChronoDuration::hours(3);

    let mut d = draft("night", numbers(2));
    d.settings.broadcast_hours = BroadcastHours::Window { start, end };
    let created = engine.create_campaign(d).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();

    assert_eq!(
        status.state,
        CampaignState::Paused(PauseReason::OutsideHoursWindow)
    );
    assert_eq!(status.cursor, 0);
    assert!(sender.sent().is_empty());

    let resume_at = status.resume_at.unwrap();
    assert!(resume_at > now + ChronoDuration::minutes(118));
    assert!(resume_at <= now + ChronoDuration::hours(2));

    // not due yet: the supervisor leaves it alone
    assert_eq!(engine.supervise_once().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_due_schedule_is_started_by_supervisor() {
    let sender = Arc::new(DryRunSender::new());
    let stores = Stores::in_memory();
    let engine = BroadcastEngine::builder(test_config(), stores.clone(), sender.clone()).build();

    let mut d = draft("later", numbers(2));
    d.schedule_at = Some(Utc::now() + ChronoDuration::hours(1));
    let created = engine.create_campaign(d).await.unwrap();
    assert_eq!(created.state, CampaignState::Scheduled);
    assert_eq!(engine.supervise_once().await.unwrap(), 0);

    // move the schedule into the past instead of waiting an hour of wall time
    let past = Utc::now() - ChronoDuration::seconds(1);
    assert!(stores
        .campaigns
        .compare_and_set_state(
            created.id,
            &CampaignState::Scheduled,
            &StateUpdate {
                state: CampaignState::Scheduled,
                resume_at: None,
                schedule_at: Some(past),
                updated_at: Utc::now(),
            },
        )
        .unwrap());

    assert_eq!(engine.supervise_once().await.unwrap(), 1);
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(sender.sent().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_start_now_overrides_schedule() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));
    let mut d = draft("early", numbers(1));
    d.schedule_at = Some(Utc::now() + ChronoDuration::days(1));
    let created = engine.create_campaign(d).await.unwrap();

    engine.start(created.id).await.unwrap();
    let status = engine.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_schedule_rejects_past_time() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));
    let created = engine.create_campaign(draft("past", numbers(1))).await.unwrap();

    let result = engine
        .schedule(created.id, Utc::now() - ChronoDuration::minutes(1))
        .await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let at = Utc::now() + ChronoDuration::minutes(10);
    let status = engine.schedule(created.id, at).await.unwrap();
    assert_eq!(status.state, CampaignState::Scheduled);
}

// ============================================================================
// Creation validation
// ============================================================================

#[tokio::test]
async fn test_invalid_drafts_are_rejected() {
    let engine = engine_with(test_config(), Arc::new(DryRunSender::new()));

    let mut no_channel = draft("x", numbers(1));
    no_channel.channel = None;
    assert!(matches!(
        engine.create_campaign(no_channel).await,
        Err(Error::Validation(_))
    ));

    let mut no_content = draft("x", numbers(1));
    no_content.content = None;
    assert!(matches!(
        engine.create_campaign(no_content).await,
        Err(Error::Validation(_))
    ));

    let nobody = draft("x", vec!["abc".into(), "".into()]);
    assert!(matches!(
        engine.create_campaign(nobody).await,
        Err(Error::Validation(_))
    ));

    let mut past = draft("x", numbers(1));
    past.schedule_at = Some(Utc::now() - ChronoDuration::minutes(5));
    assert!(matches!(
        engine.create_campaign(past).await,
        Err(Error::Validation(_))
    ));

    let mut query = draft("x", vec![]);
    query.audience = AudienceSpec::Query(AudienceQuery::default());
    assert!(matches!(
        engine.create_campaign(query).await,
        Err(Error::Validation(_))
    ));

    assert!(engine.list().unwrap().is_empty());
}
