//! Fixed-window request limiter.
//!
//! Allows `limit` acquisitions per window. The window opens on the first
//! acquisition after the previous one elapsed, and closes `window` later.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::clock::{Clock, SystemClock};

/// Default number of requests per window
pub const DEFAULT_REQUESTS_PER_WINDOW: u32 = 10;

/// Outcome of an acquisition attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,

    /// When the current window closes
    pub reset_at: DateTime<Utc>,

    /// Acquisitions left in the current window
    pub remaining: u32,
}

/// Current window state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub window_start: DateTime<Utc>,
    pub count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: Mutex<RateWindow>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_REQUESTS_PER_WINDOW, Duration::hours(1))
    }
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_clock(limit, window, Arc::new(SystemClock))
    }

    pub fn with_clock(limit: u32, window: Duration, clock: Arc<dyn Clock>) -> Self {
        let state = RateWindow {
            window_start: clock.now(),
            count: 0,
        };
        Self {
            limit,
            window,
            state: Mutex::new(state),
            clock,
        }
    }

    /// Take one slot from the current window if any are left
    pub fn try_acquire(&self) -> RateDecision {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        // An empty window has not really opened yet
        if state.count == 0 || now >= self.window_end(state.window_start) {
            state.window_start = now;
            state.count = 0;
        }

        let allowed = state.count < self.limit;
        if allowed {
            state.count += 1;
        }

        RateDecision {
            allowed,
            reset_at: self.window_end(state.window_start),
            remaining: self.limit - state.count,
        }
    }

    /// Close of a window opened at `start`, saturating at the latest representable time
    fn window_end(&self, start: DateTime<Utc>) -> DateTime<Utc> {
        start
            .checked_add_signed(self.window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Current window, without acquiring
    pub fn snapshot(&self) -> RateWindow {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}
