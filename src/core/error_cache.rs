//! Last-known failure per request key.
//!
//! Entries are overwritten by the newest failure and never expire on their
//! own; callers decide whether an entry is still relevant with
//! `lookup_fresh`.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Duration;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use crate::domain::{ClassifiedError, RequestKey};

/// Read-mostly map of request key to its most recent classified failure
pub struct ErrorCache {
    entries: RwLock<HashMap<RequestKey, ClassifiedError>>,
    clock: Arc<dyn Clock>,
}

impl Default for ErrorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorCache {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a cache that judges freshness against `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Last failure stored for `key`, regardless of age
    pub fn lookup(&self, key: &RequestKey) -> Option<ClassifiedError> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Last failure for `key` if it occurred less than `max_age` ago
    pub fn lookup_fresh(&self, key: &RequestKey, max_age: Duration) -> Option<ClassifiedError> {
        let now = self.clock.now();
        self.lookup(key).filter(|error| error.age(now) < max_age)
    }

    /// Record `error` as the latest failure for `key`, replacing any previous one
    pub fn store(&self, key: &RequestKey, error: ClassifiedError) {
        debug!(key = %key.fingerprint(), kind = %error.kind, "Caching failure");
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), error);
    }

    /// Forget the failure for `key`; returns whether one was present
    pub fn clear(&self, key: &RequestKey) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::domain::ErrorKind;
    use chrono::Utc;

    fn key() -> RequestKey {
        RequestKey::normalize("https://www.tiktok.com/@user/video/123").unwrap()
    }

    #[test]
    fn test_store_lookup_clear() {
        let cache = ErrorCache::new();
        assert!(cache.lookup(&key()).is_none());

        let error = ClassifiedError::new(ErrorKind::Network, "connection reset");
        cache.store(&key(), error.clone());
        assert_eq!(cache.lookup(&key()), Some(error));

        assert!(cache.clear(&key()));
        assert!(cache.lookup(&key()).is_none());
        assert!(!cache.clear(&key()));
    }

    #[test]
    fn test_last_write_wins() {
        let cache = ErrorCache::new();
        cache.store(&key(), ClassifiedError::new(ErrorKind::Network, "first"));
        cache.store(&key(), ClassifiedError::new(ErrorKind::Api, "second"));

        let cached = cache.lookup(&key()).unwrap();
        assert_eq!(cached.kind, ErrorKind::Api);
        assert_eq!(cached.message, "second");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_freshness_window() {
        let start = Utc::now();
        let clock = Arc::new(ManualClock::new(start));
        let cache = ErrorCache::with_clock(clock.clone());

        cache.store(&key(), ClassifiedError::at(ErrorKind::Timeout, "slow", start));

        clock.advance(Duration::minutes(59));
        assert!(cache.lookup_fresh(&key(), Duration::hours(1)).is_some());

        clock.advance(Duration::minutes(1));
        assert!(cache.lookup_fresh(&key(), Duration::hours(1)).is_none());
        // Stale entries remain visible to a plain lookup
        assert!(cache.lookup(&key()).is_some());
    }
}
