//! Per-request lifecycle record.
//!
//! A RequestRecord represents one submission of one video. It carries the
//! current status and, once the backend answers, the transcription payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ClassifiedError;
use super::request::RequestKey;
use super::status::{ProcessingStatus, TransitionError};

/// Successful transcription payload handed back to the caller
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Status string as reported by the backend
    pub status: String,

    pub transcript: Option<String>,

    /// Backend confidence in the transcript (0.0 - 1.0)
    pub confidence: Option<f64>,

    /// Detected spoken language
    pub language: Option<String>,

    /// Media duration in milliseconds
    pub duration_ms: Option<u64>,
}

/// State of a single submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestRecord {
    pub request_key: RequestKey,

    pub status: ProcessingStatus,

    pub transcript: Option<String>,

    pub confidence: Option<f64>,

    pub language: Option<String>,

    pub duration_ms: Option<u64>,

    /// Failure that ended this submission (if any)
    pub error: Option<ClassifiedError>,

    /// When the submission began
    pub started_at: DateTime<Utc>,

    /// When the status last changed
    pub updated_at: DateTime<Utc>,
}

impl RequestRecord {
    /// Create a fresh `Pending` record
    pub fn new(request_key: RequestKey) -> Self {
        let now = Utc::now();
        Self {
            request_key,
            status: ProcessingStatus::Pending,
            transcript: None,
            confidence: None,
            language: None,
            duration_ms: None,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Move to a new status through the state machine
    pub fn advance(&mut self, to: ProcessingStatus) -> Result<(), TransitionError> {
        self.status = self.status.transition(to)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark completed and store the payload
    pub fn complete(&mut self, result: &TranscriptionResult) -> Result<(), TransitionError> {
        self.advance(ProcessingStatus::Completed)?;
        self.transcript = result.transcript.clone();
        self.confidence = result.confidence;
        self.language = result.language.clone();
        self.duration_ms = result.duration_ms;
        Ok(())
    }

    /// Mark failed and remember why
    pub fn fail(&mut self, error: &ClassifiedError) -> Result<(), TransitionError> {
        self.advance(ProcessingStatus::Failed)?;
        self.error = Some(error.clone());
        Ok(())
    }

    /// Check if the submission is still in flight
    pub fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }
}
