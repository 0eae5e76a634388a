//! Classified failures.
//!
//! Every way a submission can end badly is reduced to a `ClassifiedError`:
//! a kind from a closed taxonomy, a human-readable message and, when one is
//! available, the structured payload that explains it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::request::RequestKey;

/// Failure taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Malformed input, rejected before any side effect
    Validation,

    /// Request quota for the current window is exhausted
    RateLimited,

    /// The ledger could not cover the request
    InsufficientCredits,

    /// A submission for the same key is still in flight
    AlreadyReserved,

    /// Transport failure talking to the transcription backend
    Network,

    /// The backend answered with an error
    Api,

    /// The backend call exceeded its deadline
    Timeout,

    /// Anything else, including faults inside the backend call
    Unknown,
}

impl ErrorKind {
    /// Whether failures of this kind describe the URL itself and belong in the
    /// error cache. Quota, credit and duplicate failures describe the state of
    /// the caller at submission time.
    pub fn is_cacheable(self) -> bool {
        matches!(self, Self::Network | Self::Api | Self::Timeout | Self::Unknown)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validation => "validation",
            Self::RateLimited => "rate_limited",
            Self::InsufficientCredits => "insufficient_credits",
            Self::AlreadyReserved => "already_reserved",
            Self::Network => "network",
            Self::Api => "api",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Machine-readable error payload reported by the transcription backend
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceErrorDetail {
    /// Which service produced the error
    pub service: String,

    /// HTTP status code of the failing response
    pub http_status: u16,

    /// Service-specific error code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Message reported by the service
    pub message: String,

    /// Raw response body, kept for debugging
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_body: Option<String>,

    /// Whether the service considers the call safe to retry
    #[serde(default)]
    pub retryable: bool,

    /// Status reported by a proxied upstream service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream_message: Option<String>,
}

impl ServiceErrorDetail {
    /// Create a detail with just status and message
    pub fn new(service: impl Into<String>, http_status: u16, message: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            http_status,
            message: message.into(),
            retryable: http_status == 429 || http_status >= 500,
            ..Default::default()
        }
    }

    /// Whether the failure came from the upstream's authentication layer
    pub fn is_upstream_auth_error(&self) -> bool {
        self.upstream_status == Some(401)
            || self
                .upstream_error_code
                .as_deref()
                .map(|c| c.to_ascii_lowercase().contains("unauthorized"))
                .unwrap_or(false)
    }

    /// Friendly summary suitable for showing to an end user
    pub fn user_message(&self) -> String {
        match self.http_status {
            401 if self.is_upstream_auth_error() => {
                "Authentication failed with the video service. This may be a temporary server issue. Please try again.".to_string()
            }
            401 => "Authentication failed. Please check your credentials.".to_string(),
            429 => "Too many requests. Please wait a moment and try again.".to_string(),
            502 | 503 => {
                let service = if self.upstream_status.is_some() {
                    "Downstream service"
                } else {
                    self.service.as_str()
                };
                format!("{} is temporarily unavailable. Please try again in a few moments.", service)
            }
            s if s >= 500 => format!(
                "{} service is temporarily unavailable. Please try again later.",
                self.service
            ),
            _ => match self.upstream_status {
                Some(upstream) if upstream >= 400 => format!(
                    "Video transcription service error ({}): {}. Please try again.",
                    upstream,
                    self.upstream_message.as_deref().unwrap_or("Unknown error")
                ),
                _ => self.message.clone(),
            },
        }
    }
}

/// Structured payload attached to a classified error
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ErrorDetail {
    /// When the current rate window closes
    RateLimited { reset_at: DateTime<Utc> },

    /// Credits the request needed versus what was free
    InsufficientCredits { required: u64, available: u64 },

    /// The key that already has a submission in flight
    Reserved { request_key: RequestKey },

    /// Verbatim detail from the transcription backend
    Service(ServiceErrorDetail),
}

/// A typed, cacheable description of why a submission failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub kind: ErrorKind,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<ErrorDetail>,

    pub occurred_at: DateTime<Utc>,
}

impl ClassifiedError {
    /// Create an error stamped with the current time
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::at(kind, message, Utc::now())
    }

    /// Create an error stamped with an explicit time
    pub fn at(kind: ErrorKind, message: impl Into<String>, occurred_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            occurred_at,
        }
    }

    /// Attach a structured payload
    pub fn with_detail(mut self, detail: ErrorDetail) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Human-readable one-liner for the caller
    pub fn user_message(&self) -> String {
        match (&self.kind, &self.detail) {
            (ErrorKind::Api, Some(ErrorDetail::Service(detail))) => detail.user_message(),
            (ErrorKind::RateLimited, Some(ErrorDetail::RateLimited { reset_at })) => format!(
                "Request limit reached. Try again after {}.",
                reset_at.format("%H:%M UTC")
            ),
            (ErrorKind::InsufficientCredits, Some(ErrorDetail::InsufficientCredits { required, available })) => {
                format!(
                    "Not enough credits: {} required, {} available.",
                    required, available
                )
            }
            (ErrorKind::Timeout, _) => "Still processing. Please retry in 30 seconds.".to_string(),
            _ => self.message.clone(),
        }
    }

    /// Age of this error relative to `now`
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.occurred_at)
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::error::Error for ClassifiedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cacheable_kinds() {
        assert!(ErrorKind::Network.is_cacheable());
        assert!(ErrorKind::Timeout.is_cacheable());
        assert!(ErrorKind::Api.is_cacheable());
        assert!(ErrorKind::Unknown.is_cacheable());

        assert!(!ErrorKind::Validation.is_cacheable());
        assert!(!ErrorKind::RateLimited.is_cacheable());
        assert!(!ErrorKind::InsufficientCredits.is_cacheable());
        assert!(!ErrorKind::AlreadyReserved.is_cacheable());
    }

    #[test]
    fn test_service_detail_messages() {
        assert_eq!(
            ServiceErrorDetail::new("Transcriber", 429, "slow down").user_message(),
            "Too many requests. Please wait a moment and try again."
        );
        assert_eq!(
            ServiceErrorDetail::new("Transcriber", 500, "boom").user_message(),
            "Transcriber service is temporarily unavailable. Please try again later."
        );

        let mut proxied = ServiceErrorDetail::new("Gateway", 400, "bad");
        proxied.upstream_status = Some(404);
        proxied.upstream_message = Some("video not found".to_string());
        assert_eq!(
            proxied.user_message(),
            "Video transcription service error (404): video not found. Please try again."
        );

        let mut upstream_auth = ServiceErrorDetail::new("Gateway", 401, "denied");
        upstream_auth.upstream_status = Some(401);
        assert!(upstream_auth.is_upstream_auth_error());
        assert!(upstream_auth.user_message().starts_with("Authentication failed with the video service"));
    }

    #[test]
    fn test_retryable_defaults() {
        assert!(ServiceErrorDetail::new("s", 503, "m").retryable);
        assert!(ServiceErrorDetail::new("s", 429, "m").retryable);
        assert!(!ServiceErrorDetail::new("s", 404, "m").retryable);
    }

    #[test]
    fn test_classified_error_serialization() {
        let error = ClassifiedError::new(ErrorKind::InsufficientCredits, "not enough credits")
            .with_detail(ErrorDetail::InsufficientCredits {
                required: 5,
                available: 3,
            });

        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains("\"kind\":\"insufficient_credits\""));
        assert!(json.contains("\"type\":\"insufficient_credits\""));

        let parsed: ClassifiedError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, error);
        assert_eq!(parsed.user_message(), "Not enough credits: 5 required, 3 available.");
    }
}
