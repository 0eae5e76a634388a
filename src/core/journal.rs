//! Append-only submission journal with file-based persistence.
//!
//! Events are stored as newline-delimited JSON (JSONL) for simplicity
//! and easy debugging/inspection. The journal is an audit trail: the
//! orchestrator never reads it back to make decisions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;

use crate::domain::{
    ErrorKind, ProcessingStatus, RequestKey, SubmissionEvent, SubmissionEventType,
};

/// Errors that can occur with the journal
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Per-key summary derived from replaying the journal
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionSummary {
    pub request_key: RequestKey,
    pub fingerprint: String,
    pub status: ProcessingStatus,
    pub attempts: u32,
    pub credits_spent: u64,
    pub last_error: Option<(ErrorKind, String)>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// JSONL-backed submission journal
pub struct Journal {
    /// Path to the journal.jsonl file
    path: PathBuf,

    /// Serializes appends from concurrent submissions
    write_lock: Mutex<()>,
}

impl Journal {
    /// Create a journal at `path`; the file is created on first append
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            write_lock: Mutex::new(()),
        }
    }

    /// Open the journal under `home`, creating the directory if needed
    pub async fn open(home: &Path) -> Result<Self, JournalError> {
        fs::create_dir_all(home).await?;
        Ok(Self::new(home.join("journal.jsonl")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event to the log
    pub async fn append(&self, event: &SubmissionEvent) -> Result<(), JournalError> {
        let line = format!("{}\n", serde_json::to_string(event)?);

        let _guard = self.write_lock.lock().await;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        Ok(())
    }

    /// Replay all events in order
    pub async fn replay(&self) -> Result<Vec<SubmissionEvent>, JournalError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }

        Ok(events)
    }

    /// Summaries of the most recently active keys, newest first
    pub async fn history(&self, limit: usize) -> Result<Vec<SubmissionSummary>, JournalError> {
        let events = self.replay().await?;
        let mut summaries: HashMap<RequestKey, SubmissionSummary> = HashMap::new();

        for event in events {
            let summary = summaries
                .entry(event.request_key.clone())
                .or_insert_with(|| SubmissionSummary {
                    request_key: event.request_key.clone(),
                    fingerprint: event.fingerprint.clone(),
                    status: ProcessingStatus::Pending,
                    attempts: 0,
                    credits_spent: 0,
                    last_error: None,
                    first_seen: event.timestamp,
                    last_seen: event.timestamp,
                });
            apply_event(summary, &event);
        }

        let mut summaries: Vec<SubmissionSummary> = summaries.into_values().collect();
        summaries.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        summaries.truncate(limit);

        Ok(summaries)
    }
}

fn apply_event(summary: &mut SubmissionSummary, event: &SubmissionEvent) {
    summary.last_seen = event.timestamp;
    summary.status = event.status;

    match event.event_type {
        SubmissionEventType::Submitted => summary.attempts += 1,
        SubmissionEventType::Settled => summary.credits_spent += event.amount.unwrap_or(0),
        SubmissionEventType::Completed => summary.last_error = None,
        SubmissionEventType::Failed
        | SubmissionEventType::Rejected
        | SubmissionEventType::CacheHit => {
            if let (Some(kind), Some(error)) = (event.error_kind, &event.error) {
                summary.last_error = Some((kind, error.clone()));
            }
        }
        SubmissionEventType::Reserved
        | SubmissionEventType::StatusChanged
        | SubmissionEventType::Refunded => {}
    }
}
