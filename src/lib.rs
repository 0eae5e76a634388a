//! capturekit - Credit-metered video transcription orchestrator
//!
//! Accepts TikTok and YouTube URLs, holds credits for each submission,
//! forwards them to a transcription backend and settles or refunds the
//! hold depending on the outcome.
//!
//! # Architecture
//!
//! - Each submission reserves credits before the backend is called
//! - Success settles the reservation; any failure refunds it
//! - Classified failures are cached per URL so a quick resubmission of a
//!   known-bad URL is answered without spending credits or rate slots
//! - A fixed-window limiter caps submissions per hour
//!
//! # Modules
//!
//! - `adapters`: Transcription backends (HTTP)
//! - `core`: Orchestration logic (CreditLedger, ErrorCache, RateLimiter, Orchestrator)
//! - `domain`: Data structures (RequestKey, ProcessingStatus, ClassifiedError)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Transcribe a video
//! capturekit submit https://youtu.be/dQw4w9WgXcQ
//!
//! # Check remaining credits
//! capturekit balance
//!
//! # Review recent submissions
//! capturekit history
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use adapters::{HttpTranscriptionService, TranscriptionService};
pub use crate::core::{CreditLedger, ErrorCache, Orchestrator, OrchestratorSettings, RateLimiter};
pub use domain::{ClassifiedError, ErrorKind, ProcessingStatus, RequestKey, TranscriptionResult};
