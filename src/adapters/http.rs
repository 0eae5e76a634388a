//! HTTP transcription backend.
//!
//! Submits the normalized URL with `POST {base}/transcribe`, then polls
//! `GET {base}/status/{request_id}` until the backend reports a terminal
//! status. The overall deadline is enforced by the orchestrator, not here.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{ProgressSender, ServiceError, ServiceStage, TranscriptionOutput, TranscriptionService};
use crate::domain::{RequestKey, ServiceErrorDetail};

/// Name reported in error details
const SERVICE_NAME: &str = "Transcriber";

/// Per-request HTTP timeout (a single submit or poll)
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest response body kept in an error detail
const MAX_BODY_CHARS: usize = 300;

/// Body of both the submit and the status responses
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default, alias = "duration")]
    duration_ms: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

/// Error body shape returned on non-2xx responses
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    upstream: Option<UpstreamBody>,
}

#[derive(Debug, Default, Deserialize)]
struct UpstreamBody {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// What a status response means for the poll loop
#[derive(Debug, PartialEq)]
enum PollState {
    Done(TranscriptionOutput),
    Failed(ServiceError),
    Queued,
    Analyzing,
}

/// Transcription backend reached over HTTP
pub struct HttpTranscriptionService {
    /// Base URL without trailing slash
    base_url: String,
    /// Bearer token (if the backend requires one)
    token: Option<String>,
    /// Delay between status polls
    poll_interval: Duration,
    /// HTTP client
    client: reqwest::Client,
}

impl HttpTranscriptionService {
    /// Create a client for the backend at `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            poll_interval: Duration::from_secs(3),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and decode a `StatusResponse`, mapping every failure
    async fn fetch(&self, request: reqwest::RequestBuilder) -> Result<StatusResponse, ServiceError> {
        let response = self
            .authorize(request)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(map_transport_error)?;

        if !status.is_success() {
            return Err(ServiceError::Api(detail_from_response(status.as_u16(), &body)));
        }

        serde_json::from_str(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl TranscriptionService for HttpTranscriptionService {
    fn name(&self) -> &str {
        "http"
    }

    async fn process(
        &self,
        request_key: &RequestKey,
        progress: ProgressSender,
    ) -> Result<TranscriptionOutput, ServiceError> {
        let submitted = self
            .fetch(
                self.client
                    .post(self.endpoint("transcribe"))
                    .json(&serde_json::json!({ "url": request_key.as_str() })),
            )
            .await?;

        let request_id = match submitted.request_id.clone() {
            Some(id) => id,
            // Some deployments answer synchronously
            None => {
                return match interpret_status(submitted) {
                    PollState::Done(output) => Ok(output),
                    PollState::Failed(error) => Err(error),
                    PollState::Queued | PollState::Analyzing => Err(ServiceError::Malformed(
                        "submit response carried neither a request_id nor a result".to_string(),
                    )),
                };
            }
        };

        debug!(%request_id, "Transcription submitted, polling for completion");

        loop {
            let state = self
                .fetch(self.client.get(self.endpoint(&format!("status/{}", request_id))))
                .await
                .map(interpret_status);

            match state {
                Ok(PollState::Done(output)) => return Ok(output),
                Ok(PollState::Failed(error)) => return Err(error),
                Ok(PollState::Analyzing) => progress.report(ServiceStage::Analyzing),
                Ok(PollState::Queued) => {}
                // A single failed poll is not fatal; the orchestrator deadline bounds the loop
                Err(ServiceError::Network(e)) | Err(ServiceError::Timeout(e)) => {
                    warn!(%request_id, error = %e, "Status poll failed, retrying");
                }
                Err(ServiceError::Api(detail)) if detail.retryable => {
                    warn!(
                        %request_id,
                        http_status = detail.http_status,
                        "Status poll rejected, retrying"
                    );
                }
                Err(e) => return Err(e),
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

fn interpret_status(response: StatusResponse) -> PollState {
    let status = response
        .status
        .clone()
        .unwrap_or_else(|| "unknown".to_string())
        .to_ascii_lowercase();

    match status.as_str() {
        "completed" | "complete" | "done" => PollState::Done(TranscriptionOutput {
            status,
            transcript: response.transcript,
            confidence: response.confidence,
            language: response.language,
            duration_ms: response.duration_ms,
        }),
        "failed" | "error" => {
            let message = response
                .error
                .unwrap_or_else(|| "Transcription failed".to_string());
            PollState::Failed(ServiceError::Api(ServiceErrorDetail::new(
                SERVICE_NAME,
                200,
                message,
            )))
        }
        "processing" | "analyzing" | "summarizing" => PollState::Analyzing,
        _ => PollState::Queued,
    }
}

fn map_transport_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() {
        ServiceError::Timeout(error.to_string())
    } else if error.is_connect() || error.is_request() {
        ServiceError::Network(error.to_string())
    } else if error.is_decode() || error.is_body() {
        ServiceError::Malformed(error.to_string())
    } else {
        ServiceError::Other(error.to_string())
    }
}

/// Build a structured detail from a non-2xx response
fn detail_from_response(http_status: u16, body: &str) -> ServiceErrorDetail {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let upstream = parsed.upstream.unwrap_or_default();

    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| format!("HTTP {}", http_status));

    let response_body = if body.is_empty() {
        None
    } else if body.chars().count() > MAX_BODY_CHARS {
        Some(format!("{}...", body.chars().take(MAX_BODY_CHARS).collect::<String>()))
    } else {
        Some(body.to_string())
    };

    ServiceErrorDetail {
        error_code: parsed.code,
        response_body,
        upstream_status: upstream.status,
        upstream_error_code: upstream.code,
        upstream_message: upstream.message,
        ..ServiceErrorDetail::new(SERVICE_NAME, http_status, message)
    }
}
