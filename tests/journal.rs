//! Journal Integration Tests
//!
//! Tests for JSONL persistence and history summaries.

use capturekit::core::Journal;
use capturekit::domain::{
    ErrorKind, ProcessingStatus, RequestKey, SubmissionEvent, SubmissionEventType,
};
use tempfile::TempDir;

fn youtube() -> RequestKey {
    RequestKey::normalize("https://youtu.be/dQw4w9WgXcQ").unwrap()
}

fn tiktok() -> RequestKey {
    RequestKey::normalize("https://www.tiktok.com/@someone/video/7300000000000000001").unwrap()
}

fn event(key: &RequestKey, event_type: SubmissionEventType, status: ProcessingStatus) -> SubmissionEvent {
    SubmissionEvent::new(key, event_type, status, format!("{:?}", event_type))
}

#[tokio::test]
async fn test_journal_persists_across_instances() {
    let temp = TempDir::new().unwrap();

    {
        let journal = Journal::open(temp.path()).await.unwrap();
        journal
            .append(&event(&youtube(), SubmissionEventType::Submitted, ProcessingStatus::Pending))
            .await
            .unwrap();
    }

    let reopened = Journal::open(temp.path()).await.unwrap();
    let events = reopened.replay().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].request_key, youtube());
    assert_eq!(events[0].fingerprint, youtube().fingerprint());
}

#[tokio::test]
async fn test_history_summarizes_per_key() {
    let temp = TempDir::new().unwrap();
    let journal = Journal::open(temp.path()).await.unwrap();

    // YouTube: one failed attempt, then a successful one
    for e in [
        event(&youtube(), SubmissionEventType::Submitted, ProcessingStatus::Pending),
        event(&youtube(), SubmissionEventType::Refunded, ProcessingStatus::Failed).with_amount(1),
        event(&youtube(), SubmissionEventType::Failed, ProcessingStatus::Failed)
            .with_error(ErrorKind::Network, "connection reset"),
        event(&youtube(), SubmissionEventType::Submitted, ProcessingStatus::Pending),
        event(&youtube(), SubmissionEventType::Settled, ProcessingStatus::Completed).with_amount(1),
        event(&youtube(), SubmissionEventType::Completed, ProcessingStatus::Completed)
            .with_duration(1200),
    ] {
        journal.append(&e).await.unwrap();
    }

    // TikTok: rejected by the limiter, most recent
    for e in [
        event(&tiktok(), SubmissionEventType::Submitted, ProcessingStatus::Pending),
        event(&tiktok(), SubmissionEventType::Rejected, ProcessingStatus::Failed)
            .with_error(ErrorKind::RateLimited, "Rate limit reached"),
    ] {
        journal.append(&e).await.unwrap();
    }

    let history = journal.history(10).await.unwrap();
    assert_eq!(history.len(), 2);

    let latest = &history[0];
    assert_eq!(latest.request_key, tiktok());
    assert_eq!(latest.status, ProcessingStatus::Failed);
    assert_eq!(
        latest.last_error,
        Some((ErrorKind::RateLimited, "Rate limit reached".to_string()))
    );

    let youtube_summary = &history[1];
    assert_eq!(youtube_summary.attempts, 2);
    assert_eq!(youtube_summary.credits_spent, 1);
    assert_eq!(youtube_summary.status, ProcessingStatus::Completed);
    assert!(youtube_summary.last_error.is_none());

    assert_eq!(journal.history(1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_rejects_corrupt_line() {
    let temp = TempDir::new().unwrap();
    let journal = Journal::open(temp.path()).await.unwrap();
    journal
        .append(&event(&youtube(), SubmissionEventType::Submitted, ProcessingStatus::Pending))
        .await
        .unwrap();

    tokio::fs::write(
        journal.path(),
        format!(
            "{}not json\n",
            tokio::fs::read_to_string(journal.path()).await.unwrap()
        ),
    )
    .await
    .unwrap();

    tokio_test::assert_err!(journal.replay().await);
}
