//! Credit ledger with reserve-then-settle semantics.
//!
//! Credits are put on hold before a paid call and either consumed
//! (`settle`) when the call succeeds or released (`refund`) when it fails.
//! At most one hold may be open per request key.
//!
//! Invariant: `available = total - reserved`, and `reserved <= total`.
//!
//! Closed reservation ids are remembered for the last `closed_capacity`
//! closures only; closing a handle older than that reports
//! `UnknownReservation` instead of `AlreadyClosed`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use crate::domain::RequestKey;

/// Default number of closed reservation ids remembered
pub const DEFAULT_CLOSED_CAPACITY: usize = 4096;

/// Point-in-time view of the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CreditBalance {
    /// Credits owned, including those on hold
    pub total: u64,

    /// Credits currently on hold
    pub reserved: u64,
}

impl CreditBalance {
    /// Credits free for a new reservation
    pub fn available(&self) -> u64 {
        self.total - self.reserved
    }
}

/// An open hold on credits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Uuid,
    pub request_key: RequestKey,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
}

/// Token returned by `reserve`, presented back to `settle` or `refund`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationHandle {
    id: Uuid,
    request_key: RequestKey,
    amount: u64,
}

impl ReservationHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn request_key(&self) -> &RequestKey {
        &self.request_key
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }
}

/// What closing a reservation did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Closure {
    /// The reservation was open and is now closed
    Applied,

    /// The reservation had already been settled or refunded
    AlreadyClosed,
}

/// Ledger operation failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("Insufficient credits: {required} required, {available} available")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("A reservation is already open for {0}")]
    AlreadyReserved(RequestKey),

    #[error("Unknown reservation: {0}")]
    UnknownReservation(Uuid),

    #[error("Cannot reset balance while {0} reservation(s) are open")]
    ReservationsOpen(usize),
}

#[derive(Debug, Default)]
struct LedgerState {
    total: u64,
    reserved: u64,
    open: HashMap<Uuid, Reservation>,
    by_key: HashMap<RequestKey, Uuid>,
    closed: HashSet<Uuid>,
    closed_order: VecDeque<Uuid>,
    closed_capacity: usize,
}

impl LedgerState {
    fn remember_closed(&mut self, id: Uuid) {
        self.closed.insert(id);
        self.closed_order.push_back(id);
        while self.closed_order.len() > self.closed_capacity {
            if let Some(oldest) = self.closed_order.pop_front() {
                self.closed.remove(&oldest);
            }
        }
    }

    fn snapshot(&self) -> CreditBalance {
        CreditBalance {
            total: self.total,
            reserved: self.reserved,
        }
    }
}

/// Process-wide credit balance guarded by a single lock
pub struct CreditLedger {
    state: Mutex<LedgerState>,
    balance_tx: watch::Sender<CreditBalance>,
}

impl CreditLedger {
    /// Create a ledger holding `total` credits
    pub fn new(total: u64) -> Self {
        Self::with_closed_capacity(total, DEFAULT_CLOSED_CAPACITY)
    }

    /// Create a ledger that remembers the last `closed_capacity` closures
    pub fn with_closed_capacity(total: u64, closed_capacity: usize) -> Self {
        let state = LedgerState {
            total,
            closed_capacity,
            ..Default::default()
        };
        let (balance_tx, _) = watch::channel(state.snapshot());

        Self {
            state: Mutex::new(state),
            balance_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publish while still holding the lock so subscribers observe mutations in order
    fn publish(&self, state: &LedgerState) {
        self.balance_tx.send_replace(state.snapshot());
    }

    /// Put `amount` credits on hold for `request_key`
    pub fn reserve(
        &self,
        request_key: &RequestKey,
        amount: u64,
    ) -> Result<ReservationHandle, LedgerError> {
        let mut state = self.lock();

        if state.by_key.contains_key(request_key) {
            return Err(LedgerError::AlreadyReserved(request_key.clone()));
        }

        let available = state.total - state.reserved;
        if available < amount {
            return Err(LedgerError::InsufficientCredits {
                required: amount,
                available,
            });
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            request_key: request_key.clone(),
            amount,
            created_at: Utc::now(),
        };
        let handle = ReservationHandle {
            id: reservation.id,
            request_key: request_key.clone(),
            amount,
        };

        state.reserved += amount;
        state.by_key.insert(request_key.clone(), reservation.id);
        state.open.insert(reservation.id, reservation);
        self.publish(&state);

        debug!(reservation = %handle.id, amount, "Credits reserved");
        Ok(handle)
    }

    /// Consume a reservation: the held credits leave the balance for good
    pub fn settle(&self, handle: &ReservationHandle) -> Result<Closure, LedgerError> {
        self.close(handle, true)
    }

    /// Release a reservation: the held credits become available again
    pub fn refund(&self, handle: &ReservationHandle) -> Result<Closure, LedgerError> {
        self.close(handle, false)
    }

    fn close(&self, handle: &ReservationHandle, consume: bool) -> Result<Closure, LedgerError> {
        let mut state = self.lock();

        let Some(reservation) = state.open.remove(&handle.id) else {
            return if state.closed.contains(&handle.id) {
                Ok(Closure::AlreadyClosed)
            } else {
                Err(LedgerError::UnknownReservation(handle.id))
            };
        };

        state.reserved -= reservation.amount;
        if consume {
            state.total -= reservation.amount;
        }
        state.by_key.remove(&reservation.request_key);
        state.remember_closed(reservation.id);
        self.publish(&state);

        debug!(
            reservation = %reservation.id,
            amount = reservation.amount,
            settled = consume,
            "Reservation closed"
        );
        Ok(Closure::Applied)
    }

    /// Snapshot of the balance, taken under the mutation lock
    pub fn balance(&self) -> CreditBalance {
        self.lock().snapshot()
    }

    /// Stream of balance snapshots, updated after every mutation
    pub fn subscribe(&self) -> watch::Receiver<CreditBalance> {
        self.balance_tx.subscribe()
    }

    /// Whether `request_key` currently holds a reservation
    pub fn is_reserved(&self, request_key: &RequestKey) -> bool {
        self.lock().by_key.contains_key(request_key)
    }

    /// All open reservations
    pub fn open_reservations(&self) -> Vec<Reservation> {
        self.lock().open.values().cloned().collect()
    }

    /// Overwrite the total balance; refused while any hold is open
    pub fn set_total(&self, total: u64) -> Result<CreditBalance, LedgerError> {
        let mut state = self.lock();
        if !state.open.is_empty() {
            return Err(LedgerError::ReservationsOpen(state.open.len()));
        }

        state.total = total;
        self.publish(&state);
        Ok(state.snapshot())
    }
}
