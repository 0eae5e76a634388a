//! Domain types for capturekit.
//!
//! This module contains the core data structures:
//! - RequestKey: Canonical identity of a submitted video
//! - ProcessingStatus: Per-request state machine
//! - RequestRecord: Lifecycle of one submission
//! - ClassifiedError: Typed failure taxonomy
//! - SubmissionEvent: Journal entries

pub mod error;
pub mod events;
pub mod record;
pub mod request;
pub mod status;

// Re-export commonly used types
pub use error::{ClassifiedError, ErrorDetail, ErrorKind, ServiceErrorDetail};
pub use events::{SubmissionEvent, SubmissionEventType};
pub use record::{RequestRecord, TranscriptionResult};
pub use request::{NormalizeError, Platform, RequestKey, MAX_URL_LENGTH};
pub use status::{ProcessingStatus, TransitionError};
