//! Restart recovery on a SQLite file

use std::sync::Arc;
use std::time::Duration;

use siaran::models::{CampaignState, PauseReason};
use siaran::storage::{SqliteRepository, Stores};
use siaran::transport::DryRunSender;
use siaran::BroadcastEngine;
use tempfile::TempDir;

use crate::common::{canonical, draft, numbers, test_config};

fn sqlite_engine(dir: &TempDir, sender: Arc<DryRunSender>) -> BroadcastEngine {
    let repo = SqliteRepository::new(dir.path().join("siaran.db")).unwrap();
    BroadcastEngine::builder(test_config(), Stores::from_sqlite(Arc::new(repo)), sender).build()
}

#[tokio::test(start_paused = true)]
async fn test_running_campaign_resumes_after_restart() {
    let dir = TempDir::new().unwrap();

    let first_sender = Arc::new(DryRunSender::new());
    let first = sqlite_engine(&dir, first_sender.clone());
    let created = first.create_campaign(draft("restart", numbers(6))).await.unwrap();
    first.start(created.id).await.unwrap();

    tokio::time::sleep(Duration::from_millis(3500)).await;
    first.shutdown().await;

    let interrupted = first.status(created.id).unwrap();
    assert_eq!(interrupted.state, CampaignState::Running);
    assert!(interrupted.cursor >= 1 && interrupted.cursor < 6);
    drop(first);

    let second_sender = Arc::new(DryRunSender::new());
    let second = sqlite_engine(&dir, second_sender.clone());
    assert_eq!(second.recover().await.unwrap(), 1);

    let status = second.wait_until_settled(created.id).await.unwrap();
    assert_eq!(status.state, CampaignState::Completed);
    assert_eq!(status.counts.sent, 6);

    // every recipient exactly once across both processes
    let all: Vec<_> = first_sender
        .sent()
        .into_iter()
        .chain(second_sender.sent())
        .map(|s| s.recipient)
        .collect();
    assert_eq!(all, (0..6).map(canonical).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_from_other_process_stops_next_send() {
    let dir = TempDir::new().unwrap();

    let worker_sender = Arc::new(DryRunSender::new());
    let worker = sqlite_engine(&dir, worker_sender.clone());
    let operator = sqlite_engine(&dir, Arc::new(DryRunSender::new()));

    let created = worker.create_campaign(draft("remote cancel", numbers(3))).await.unwrap();
    worker.start(created.id).await.unwrap();

    // The worker is inside its first pacing delay; the operator process has no halt handle
    tokio::time::sleep(Duration::from_millis(100)).await;
    let cancelled = operator.cancel(created.id).await.unwrap();
    assert_eq!(cancelled.state, CampaignState::Cancelled);
    assert_eq!(cancelled.cursor, 0);

    tokio::time::sleep(Duration::from_secs(10)).await;

    assert!(worker_sender.sent().is_empty());
    let status = worker.status(created.id).unwrap();
    assert_eq!(status.state, CampaignState::Cancelled);
    assert_eq!(status.cursor, 0);
    assert_eq!(status.counts.pending, 3);
}

#[tokio::test(start_paused = true)]
async fn test_manual_pause_survives_restart() {
    let dir = TempDir::new().unwrap();

    let first = sqlite_engine(&dir, Arc::new(DryRunSender::new()));
    let created = first.create_campaign(draft("held", numbers(3))).await.unwrap();
    first.start(created.id).await.unwrap();
    first.pause(created.id).await.unwrap();
    first.shutdown().await;
    drop(first);

    let sender = Arc::new(DryRunSender::new());
    let second = sqlite_engine(&dir, sender.clone());
    assert_eq!(second.recover().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_secs(10)).await;
    let status = second.status(created.id).unwrap();
    assert_eq!(status.state, CampaignState::Paused(PauseReason::ManualPause));
    assert!(sender.sent().is_empty());

    second.resume(created.id).await.unwrap();
    let done = second.wait_until_settled(created.id).await.unwrap();
    assert_eq!(done.state, CampaignState::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_campaign_list_is_persisted() {
    let dir = TempDir::new().unwrap();

    let first = sqlite_engine(&dir, Arc::new(DryRunSender::new()));
    let a = first.create_campaign(draft("a", numbers(2))).await.unwrap();
    let b = first.create_campaign(draft("b", numbers(3))).await.unwrap();
    drop(first);

    let second = sqlite_engine(&dir, Arc::new(DryRunSender::new()));
    let list = second.list().unwrap();
    assert_eq!(list.len(), 2);
    let ids: Vec<_> = list.iter().map(|s| s.id).collect();
    assert!(ids.contains(&a.id) && ids.contains(&b.id));

    let status = second.status(b.id).unwrap();
    assert_eq!(status.total, 3);
    assert_eq!(status.counts.pending, 3);
    assert_eq!(status.state, CampaignState::Draft);
}
