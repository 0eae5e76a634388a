//! Submission events for the append-only journal.
//!
//! Every observable step of a submission is recorded as an immutable event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::ErrorKind;
use super::request::RequestKey;
use super::status::ProcessingStatus;

/// A single event in the submission journal.
///
/// Events never contain transcripts; the summary is meant for humans
/// skimming the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// Normalized key of the submission
    pub request_key: RequestKey,

    /// Short digest of the key, for grepping
    pub fingerprint: String,

    /// Type of event
    pub event_type: SubmissionEventType,

    /// Status of the request after this event
    pub status: ProcessingStatus,

    /// Human-readable summary
    pub summary: String,

    /// Credits involved (reserve/settle/refund)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,

    /// Time taken in milliseconds (for finished calls)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,

    /// Classified failure kind
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Error message if failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmissionEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        request_key: &RequestKey,
        event_type: SubmissionEventType,
        status: ProcessingStatus,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            request_key: request_key.clone(),
            fingerprint: request_key.fingerprint(),
            event_type,
            status,
            summary: summary.into(),
            amount: None,
            duration_ms: None,
            error_kind: None,
            error: None,
        }
    }

    pub fn with_amount(mut self, amount: u64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Attach a classified failure
    pub fn with_error(mut self, kind: ErrorKind, message: impl Into<String>) -> Self {
        self.error_kind = Some(kind);
        self.error = Some(message.into());
        self
    }
}

/// Types of events recorded for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionEventType {
    /// A submission passed validation
    Submitted,

    /// A fresh cached failure answered the submission
    CacheHit,

    /// Rejected before reaching the backend (quota, credits, duplicate)
    Rejected,

    /// Credits were put on hold
    Reserved,

    /// The request moved to a new status
    StatusChanged,

    /// Held credits were consumed
    Settled,

    /// Held credits were released
    Refunded,

    /// The submission finished successfully
    Completed,

    /// The submission failed after dispatch
    Failed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let key = RequestKey::normalize("https://youtu.be/abc").unwrap();
        let event = SubmissionEvent::new(
            &key,
            SubmissionEventType::Reserved,
            ProcessingStatus::Pending,
            "Reserved 5 credits",
        )
        .with_amount(5);

        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("duration_ms"));

        let parsed: SubmissionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.event_type, SubmissionEventType::Reserved);
        assert_eq!(parsed.amount, Some(5));
        assert_eq!(parsed.fingerprint, key.fingerprint());
    }

    #[test]
    fn test_event_with_error() {
        let key = RequestKey::normalize("https://youtu.be/abc").unwrap();
        let event = SubmissionEvent::new(
            &key,
            SubmissionEventType::Failed,
            ProcessingStatus::Failed,
            "Backend unreachable",
        )
        .with_duration(1500)
        .with_error(ErrorKind::Network, "connection refused");

        assert_eq!(event.error_kind, Some(ErrorKind::Network));
        assert_eq!(event.error.as_deref(), Some("connection refused"));
        assert_eq!(event.duration_ms, Some(1500));
    }
}
