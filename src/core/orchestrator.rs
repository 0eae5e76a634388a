//! Capture request orchestrator.
//!
//! Coordinates URL normalization, the error cache, the rate limiter, the
//! credit ledger and the transcription backend for each submission, and
//! drives the per-request status machine.
//!
//! Every submission runs on its own task. Whoever asked for it receives
//! the outcome over a one-shot channel, but the task runs to completion
//! even if nobody is listening any more, so a credit hold is always settled
//! or refunded.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{ProgressSender, ServiceError, ServiceStage, TranscriptionService};
use crate::domain::{
    ClassifiedError, ErrorDetail, ErrorKind, ProcessingStatus, RequestKey, RequestRecord,
    SubmissionEvent, SubmissionEventType, TranscriptionResult, TransitionError,
};

use super::clock::{Clock, SystemClock};
use super::error_cache::ErrorCache;
use super::journal::Journal;
use super::ledger::{CreditBalance, CreditLedger, LedgerError, ReservationHandle};
use super::rate_limiter::RateLimiter;

/// Terminal result of one submission
pub type SubmitOutcome = Result<TranscriptionResult, ClassifiedError>;

/// Capacity of the status broadcast channel
const STATUS_CHANNEL_CAPACITY: usize = 256;

/// Default number of records retained
pub const DEFAULT_RECORD_CAPACITY: usize = 1024;

/// Tunables fixed for the lifetime of an orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Credits held per submission (default: 1)
    pub cost_per_request: u64,

    /// Deadline for a single backend call (default: 60s)
    pub call_timeout: Duration,

    /// How long a cached failure short-circuits resubmission (default: 1 hour)
    pub error_freshness: chrono::Duration,

    /// Records kept before the oldest finished ones are dropped (default: 1024)
    pub record_capacity: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            cost_per_request: 1,
            call_timeout: Duration::from_secs(60),
            error_freshness: chrono::Duration::hours(1),
            record_capacity: DEFAULT_RECORD_CAPACITY,
        }
    }
}

/// Status change notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub request_key: RequestKey,
    pub status: ProcessingStatus,
}

/// Pending outcome of a spawned submission
pub struct Submission {
    rx: oneshot::Receiver<SubmitOutcome>,
}

impl Submission {
    /// Wait for the terminal outcome
    pub async fn outcome(self) -> SubmitOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ClassifiedError::new(
                ErrorKind::Unknown,
                "Submission ended without reporting an outcome",
            )),
        }
    }
}

/// Main capture orchestrator
#[derive(Clone)]
pub struct Orchestrator {
    ledger: Arc<CreditLedger>,
    cache: Arc<ErrorCache>,
    limiter: Arc<RateLimiter>,
    service: Arc<dyn TranscriptionService>,
    records: Arc<RwLock<HashMap<RequestKey, RequestRecord>>>,
    status_tx: broadcast::Sender<StatusUpdate>,
    journal: Option<Arc<Journal>>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    /// Create an orchestrator over shared services
    pub fn new(
        ledger: Arc<CreditLedger>,
        cache: Arc<ErrorCache>,
        limiter: Arc<RateLimiter>,
        service: Arc<dyn TranscriptionService>,
        settings: OrchestratorSettings,
    ) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            ledger,
            cache,
            limiter,
            service,
            records: Arc::new(RwLock::new(HashMap::new())),
            status_tx,
            journal: None,
            clock: Arc::new(SystemClock),
            settings,
        }
    }

    /// Record every submission event in `journal`
    pub fn with_journal(mut self, journal: Arc<Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Stamp classified errors with `clock` (share it with the cache)
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start a submission on its own task
    pub fn submit(&self, raw_url: impl Into<String>) -> Submission {
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let raw_url = raw_url.into();

        tokio::spawn(async move {
            let outcome = this.run(&raw_url).await;
            if tx.send(outcome).is_err() {
                debug!("Caller stopped waiting; submission finished anyway");
            }
        });

        Submission { rx }
    }

    /// Submit and wait for the outcome.
    ///
    /// Dropping the returned future does not cancel the submission.
    pub async fn process(&self, raw_url: &str) -> SubmitOutcome {
        self.submit(raw_url).outcome().await
    }

    /// Callback-style submission with flattened, human-readable messages
    pub fn submit_with<S, E>(&self, raw_url: impl Into<String>, on_success: S, on_error: E) -> JoinHandle<()>
    where
        S: FnOnce(String) + Send + 'static,
        E: FnOnce(String) + Send + 'static,
    {
        let submission = self.submit(raw_url);
        tokio::spawn(async move {
            match submission.outcome().await {
                Ok(_) => on_success("Transcription completed successfully!".to_string()),
                Err(error) => on_error(error.user_message()),
            }
        })
    }

    /// Current credit balance
    pub fn balance(&self) -> CreditBalance {
        self.ledger.balance()
    }

    /// Read-only stream of balance changes
    pub fn subscribe_balance(&self) -> watch::Receiver<CreditBalance> {
        self.ledger.subscribe()
    }

    /// Stream of per-request status changes
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    /// Latest record for `key`
    pub fn record(&self, key: &RequestKey) -> Option<RequestRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// All known records
    pub fn records(&self) -> Vec<RequestRecord> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn ledger(&self) -> &Arc<CreditLedger> {
        &self.ledger
    }

    pub fn cache(&self) -> &Arc<ErrorCache> {
        &self.cache
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Full submission protocol for one URL
    #[instrument(skip(self, raw_url), fields(key = tracing::field::Empty))]
    async fn run(&self, raw_url: &str) -> SubmitOutcome {
        let key = match RequestKey::normalize(raw_url) {
            Ok(key) => key,
            Err(e) => {
                warn!(error = %e, "Rejected malformed URL");
                return Err(self.classified(ErrorKind::Validation, e.to_string()));
            }
        };
        tracing::Span::current().record("key", key.fingerprint().as_str());

        // A known, still-fresh failure answers without touching anything paid
        if let Some(cached) = self.cache.lookup_fresh(&key, self.settings.error_freshness) {
            info!(kind = %cached.kind, "Returning cached failure");
            self.journal(
                SubmissionEvent::new(
                    &key,
                    SubmissionEventType::CacheHit,
                    ProcessingStatus::Failed,
                    "Answered from error cache",
                )
                .with_error(cached.kind, cached.message.clone()),
            )
            .await;
            return Err(cached);
        }

        if let Err(error) = self.begin_record(&key) {
            warn!("Submission already in flight for this URL");
            self.journal(
                SubmissionEvent::new(
                    &key,
                    SubmissionEventType::Rejected,
                    ProcessingStatus::Pending,
                    "Duplicate submission rejected",
                )
                .with_error(error.kind, error.message.clone()),
            )
            .await;
            return Err(error);
        }
        self.journal(SubmissionEvent::new(
            &key,
            SubmissionEventType::Submitted,
            ProcessingStatus::Pending,
            format!("Submitted {}", key),
        ))
        .await;

        let decision = self.limiter.try_acquire();
        if !decision.allowed {
            let error = self
                .classified(
                    ErrorKind::RateLimited,
                    format!("Rate limit reached; window resets at {}", decision.reset_at),
                )
                .with_detail(ErrorDetail::RateLimited {
                    reset_at: decision.reset_at,
                });
            return self.reject(&key, error).await;
        }

        let cost = self.settings.cost_per_request;
        let handle = match self.ledger.reserve(&key, cost) {
            Ok(handle) => handle,
            Err(e) => return self.reject(&key, self.classify_ledger_error(e)).await,
        };
        self.journal(
            SubmissionEvent::new(
                &key,
                SubmissionEventType::Reserved,
                ProcessingStatus::Pending,
                format!("Reserved {} credit(s)", cost),
            )
            .with_amount(cost),
        )
        .await;

        self.transition(&key, ProcessingStatus::Transcribing).await;

        let started = Instant::now();
        let result = self.call_service(&key).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(output) => self.finish_success(&key, &handle, output, duration_ms).await,
            Err(error) => self.finish_failure(&key, &handle, error, duration_ms).await,
        }
    }

    /// Run the backend call on its own task, under the deadline, relaying progress
    async fn call_service(&self, key: &RequestKey) -> Result<TranscriptionResult, ClassifiedError> {
        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel();
        let service = Arc::clone(&self.service);
        let call_key = key.clone();

        let mut task = tokio::spawn(async move {
            service
                .process(&call_key, ProgressSender::new(progress_tx))
                .await
        });
        let abort = task.abort_handle();

        let deadline = tokio::time::sleep(self.settings.call_timeout);
        tokio::pin!(deadline);

        let joined = loop {
            tokio::select! {
                joined = &mut task => break Some(joined),
                _ = &mut deadline => break None,
                Some(stage) = progress_rx.recv() => self.on_progress(key, stage).await,
            }
        };

        match joined {
            Some(Ok(Ok(output))) => Ok(output),
            Some(Ok(Err(service_error))) => Err(self.classify_service_error(service_error)),
            // Panics and aborts inside the backend call end up here
            Some(Err(join_error)) => {
                error!(error = %join_error, "Transcription task faulted");
                Err(self.classified(
                    ErrorKind::Unknown,
                    format!("Transcription task faulted: {}", join_error),
                ))
            }
            None => {
                abort.abort();
                Err(self.classified(
                    ErrorKind::Timeout,
                    format!(
                        "Transcription timed out after {}s",
                        self.settings.call_timeout.as_secs_f64()
                    ),
                ))
            }
        }
    }

    async fn on_progress(&self, key: &RequestKey, stage: ServiceStage) {
        match stage {
            ServiceStage::Analyzing => self.transition(key, ProcessingStatus::Analyzing).await,
        }
    }

    /// Ledger and cache are resolved before the record turns terminal, so a
    /// same-key resubmission sees either an open record or the final state.
    async fn finish_success(
        &self,
        key: &RequestKey,
        handle: &ReservationHandle,
        output: TranscriptionResult,
        duration_ms: u64,
    ) -> SubmitOutcome {
        let settled = match self.ledger.settle(handle) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to settle reservation");
                false
            }
        };
        if self.cache.clear(key) {
            debug!("Cleared previously cached failure");
        }
        let status = self.update_record(key, |record| record.complete(&output));

        info!(
            duration_ms,
            transcript_chars = output.transcript.as_ref().map(|t| t.len()).unwrap_or(0),
            "Submission completed"
        );

        if settled {
            self.journal(
                SubmissionEvent::new(
                    key,
                    SubmissionEventType::Settled,
                    ProcessingStatus::Completed,
                    format!("Settled {} credit(s)", handle.amount()),
                )
                .with_amount(handle.amount()),
            )
            .await;
        }
        self.journal_status(key, status).await;
        self.journal(
            SubmissionEvent::new(
                key,
                SubmissionEventType::Completed,
                ProcessingStatus::Completed,
                format!("Completed in {}ms", duration_ms),
            )
            .with_duration(duration_ms),
        )
        .await;

        Ok(output)
    }

    async fn finish_failure(
        &self,
        key: &RequestKey,
        handle: &ReservationHandle,
        error: ClassifiedError,
        duration_ms: u64,
    ) -> SubmitOutcome {
        let refunded = match self.ledger.refund(handle) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "Failed to refund reservation");
                false
            }
        };
        if error.kind.is_cacheable() {
            self.cache.store(key, error.clone());
        }
        let status = self.update_record(key, |record| record.fail(&error));

        warn!(kind = %error.kind, duration_ms, error = %error.message, "Submission failed");

        if refunded {
            self.journal(
                SubmissionEvent::new(
                    key,
                    SubmissionEventType::Refunded,
                    ProcessingStatus::Failed,
                    format!("Refunded {} credit(s)", handle.amount()),
                )
                .with_amount(handle.amount()),
            )
            .await;
        }
        self.journal_status(key, status).await;
        self.journal(
            SubmissionEvent::new(
                key,
                SubmissionEventType::Failed,
                ProcessingStatus::Failed,
                format!("Failed after {}ms", duration_ms),
            )
            .with_duration(duration_ms)
            .with_error(error.kind, error.message.clone()),
        )
        .await;

        Err(error)
    }

    /// End a submission that never reached the backend
    async fn reject(&self, key: &RequestKey, error: ClassifiedError) -> SubmitOutcome {
        let status = self.update_record(key, |record| record.fail(&error));

        warn!(kind = %error.kind, error = %error.message, "Submission rejected");
        self.journal_status(key, status).await;
        self.journal(
            SubmissionEvent::new(
                key,
                SubmissionEventType::Rejected,
                ProcessingStatus::Failed,
                "Rejected before dispatch",
            )
            .with_error(error.kind, error.message.clone()),
        )
        .await;

        Err(error)
    }

    /// Install a fresh `Pending` record unless one is still open for `key`
    fn begin_record(&self, key: &RequestKey) -> Result<(), ClassifiedError> {
        let in_flight = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let open = records.get(key).map(RequestRecord::is_open).unwrap_or(false);
            if !open {
                records.insert(key.clone(), RequestRecord::new(key.clone()));
                prune_finished(&mut records, self.settings.record_capacity);
            }
            open
        };

        if in_flight {
            return Err(self
                .classified(
                    ErrorKind::AlreadyReserved,
                    format!("A submission for {} is already in progress", key),
                )
                .with_detail(ErrorDetail::Reserved {
                    request_key: key.clone(),
                }));
        }

        self.publish(key, ProcessingStatus::Pending);
        Ok(())
    }

    async fn transition(&self, key: &RequestKey, to: ProcessingStatus) {
        let status = self.update_record(key, |record| record.advance(to));
        self.journal_status(key, status).await;
    }

    async fn journal_status(&self, key: &RequestKey, status: Option<ProcessingStatus>) {
        if let Some(status) = status {
            self.journal(SubmissionEvent::new(
                key,
                SubmissionEventType::StatusChanged,
                status,
                format!("Status → {}", status),
            ))
            .await;
        }
    }

    /// Apply `change` to the record for `key` and broadcast the new status
    fn update_record<F>(&self, key: &RequestKey, change: F) -> Option<ProcessingStatus>
    where
        F: FnOnce(&mut RequestRecord) -> Result<(), TransitionError>,
    {
        let status = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let record = records.get_mut(key)?;
            match change(record) {
                Ok(()) => record.status,
                Err(e) => {
                    debug!(error = %e, "Ignoring status change");
                    return None;
                }
            }
        };

        self.publish(key, status);
        Some(status)
    }

    fn publish(&self, key: &RequestKey, status: ProcessingStatus) {
        // No subscribers is fine
        let _ = self.status_tx.send(StatusUpdate {
            request_key: key.clone(),
            status,
        });
    }

    fn classified(&self, kind: ErrorKind, message: impl Into<String>) -> ClassifiedError {
        ClassifiedError::at(kind, message, self.clock.now())
    }

    fn classify_ledger_error(&self, error: LedgerError) -> ClassifiedError {
        let message = error.to_string();
        match error {
            LedgerError::InsufficientCredits { required, available } => self
                .classified(ErrorKind::InsufficientCredits, message)
                .with_detail(ErrorDetail::InsufficientCredits { required, available }),
            LedgerError::AlreadyReserved(request_key) => self
                .classified(ErrorKind::AlreadyReserved, message)
                .with_detail(ErrorDetail::Reserved { request_key }),
            LedgerError::UnknownReservation(_) | LedgerError::ReservationsOpen(_) => {
                self.classified(ErrorKind::Unknown, message)
            }
        }
    }

    fn classify_service_error(&self, error: ServiceError) -> ClassifiedError {
        let message = error.to_string();
        match error {
            ServiceError::Network(_) => self.classified(ErrorKind::Network, message),
            ServiceError::Timeout(_) => self.classified(ErrorKind::Timeout, message),
            ServiceError::Api(detail) => self
                .classified(ErrorKind::Api, detail.message.clone())
                .with_detail(ErrorDetail::Service(detail)),
            ServiceError::Malformed(_) | ServiceError::Other(_) => {
                self.classified(ErrorKind::Unknown, message)
            }
        }
    }

    async fn journal(&self, event: SubmissionEvent) {
        if let Some(journal) = &self.journal {
            if let Err(e) = journal.append(&event).await {
                warn!(error = %e, "Failed to append journal event");
            }
        }
    }
}

/// Drop the least recently updated finished records beyond `capacity`.
/// Open records are never dropped.
fn prune_finished(records: &mut HashMap<RequestKey, RequestRecord>, capacity: usize) {
    let excess = records.len().saturating_sub(capacity);
    if excess == 0 {
        return;
    }

    let mut finished: Vec<_> = records
        .values()
        .filter(|record| !record.is_open())
        .map(|record| (record.updated_at, record.request_key.clone()))
        .collect();
    finished.sort();

    for (_, key) in finished.into_iter().take(excess) {
        records.remove(&key);
    }
}
