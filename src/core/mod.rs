//! Core orchestration logic.
//!
//! This module contains:
//! - CreditLedger: reserve/settle/refund accounting
//! - ErrorCache: last classified failure per request key
//! - RateLimiter: fixed-window submission limiting
//! - Journal: append-only submission log
//! - Orchestrator: the submission protocol tying them together

pub mod balance_store;
pub mod clock;
pub mod error_cache;
pub mod journal;
pub mod ledger;
pub mod orchestrator;
pub mod rate_limiter;

// Re-export commonly used types
pub use balance_store::{BalanceLock, BalanceStore, StoredBalance};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error_cache::ErrorCache;
pub use journal::{Journal, JournalError, SubmissionSummary};
pub use ledger::{
    Closure, CreditBalance, CreditLedger, LedgerError, Reservation, ReservationHandle,
    DEFAULT_CLOSED_CAPACITY,
};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, StatusUpdate, SubmitOutcome, Submission,
    DEFAULT_RECORD_CAPACITY,
};
pub use rate_limiter::{RateDecision, RateLimiter, RateWindow, DEFAULT_REQUESTS_PER_WINDOW};
