//! Adapter interfaces for the transcription backend.
//!
//! The orchestrator only knows the `TranscriptionService` trait; concrete
//! backends (HTTP, test fakes) live behind it.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::{RequestKey, ServiceErrorDetail, TranscriptionResult};

pub use http::HttpTranscriptionService;

/// Output from a successful backend call
pub type TranscriptionOutput = TranscriptionResult;

/// Intermediate progress a backend may report while a call is in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStage {
    /// The transcript exists and the backend is analyzing it
    Analyzing,
}

/// Channel the backend uses to report progress to the orchestrator.
///
/// Sending never blocks and never fails from the backend's point of view;
/// progress is advisory.
#[derive(Debug, Clone)]
pub struct ProgressSender {
    tx: Option<mpsc::UnboundedSender<ServiceStage>>,
}

impl ProgressSender {
    pub fn new(tx: mpsc::UnboundedSender<ServiceStage>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sender that drops every report
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn report(&self, stage: ServiceStage) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(stage);
        }
    }
}

/// Typed failures of a backend call
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("{} API error ({}): {}", .0.service, .0.http_status, .0.message)]
    Api(ServiceErrorDetail),

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

/// Trait for transcription backends
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &str;

    /// Transcribe the video behind `request_key`
    async fn process(
        &self,
        request_key: &RequestKey,
        progress: ProgressSender,
    ) -> Result<TranscriptionOutput, ServiceError>;
}
