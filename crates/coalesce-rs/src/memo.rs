//! Per-session memoization of completed tool results.
//!
//! Within one conversation the model often repeats an identical search.
//! [`SessionMemo`] remembers every successfully-completed call by
//! `(session_id, CanonicalKey)` and serves repeats without touching the
//! backend. Whatever the operation resolved to is stored verbatim, including
//! tool-level "soft" errors encoded in the success value. Rejected
//! operations are never stored, so a failed call is retried next time.
//!
//! Each session holds at most `capacity` entries. When full, the
//! oldest-inserted entry is evicted (FIFO); reads do not refresh position.
//! Entries have no expiry and live until evicted or the session is
//! forgotten.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::config::DEFAULT_SESSION_CAPACITY;
use crate::key::CanonicalKey;

/// Memoized results for one session, in insertion order.
struct SessionEntries<T> {
    values: HashMap<CanonicalKey, T>,
    order: VecDeque<CanonicalKey>,
}

impl<T> SessionEntries<T> {
    fn new() -> Self {
        Self {
            values: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert, evicting the oldest entry if at capacity. Returns whether an
    /// eviction happened.
    fn insert(&mut self, key: CanonicalKey, value: T, capacity: usize) -> bool {
        if let Some(existing) = self.values.get_mut(&key) {
            // Keep the original insertion position.
            *existing = value;
            return false;
        }
        let mut evicted = false;
        while self.values.len() >= capacity.max(1) {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.values.remove(&oldest);
                    evicted = true;
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.values.insert(key, value);
        evicted
    }
}

/// Hit/miss/eviction counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl MemoStats {
    /// Hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct MemoState<T> {
    sessions: HashMap<String, SessionEntries<T>>,
    stats: MemoStats,
}

/// Session-scoped, capacity-bounded result cache.
pub struct SessionMemo<T> {
    state: Mutex<MemoState<T>>,
    capacity: usize,
}

impl<T: Clone> SessionMemo<T> {
    /// Create a memo holding at most `capacity` entries per session.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MemoState {
                sessions: HashMap::new(),
                stats: MemoStats::default(),
            }),
            capacity,
        }
    }

    /// Per-session capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the memoized value for `(session_id, key)`, or run `operation`
    /// and memoize its successful result.
    ///
    /// Without a session id (absent or empty) nothing is cached and
    /// `operation` always runs. The lock is not held while `operation`
    /// runs; compose with [`InFlight`](crate::inflight::InFlight) inside
    /// `operation` to collapse concurrent misses.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        session_id: Option<&str>,
        key: &CanonicalKey,
        operation: F,
    ) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let Some(session_id) = session_id.filter(|s| !s.is_empty()) else {
            return operation().await;
        };

        if let Some(hit) = self.get(session_id, key) {
            return Ok(hit);
        }

        let value = operation().await?;
        self.insert(session_id, key.clone(), value.clone());
        Ok(value)
    }

    /// Look up a memoized value, counting a hit or miss.
    pub fn get(&self, session_id: &str, key: &CanonicalKey) -> Option<T> {
        let mut state = self.lock();
        let found = state
            .sessions
            .get(session_id)
            .and_then(|entries| entries.values.get(key))
            .cloned();
        if found.is_some() {
            state.stats.hits += 1;
            debug!(session = session_id, key = %key, "memo hit");
        } else {
            state.stats.misses += 1;
            debug!(session = session_id, key = %key, "memo miss");
        }
        found
    }

    /// Store a value for `(session_id, key)`.
    pub fn insert(&self, session_id: &str, key: CanonicalKey, value: T) {
        let capacity = self.capacity;
        let mut state = self.lock();
        let evicted = state
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(SessionEntries::new)
            .insert(key, value, capacity);
        if evicted {
            state.stats.evictions += 1;
            debug!(session = session_id, capacity, "memo evicted oldest entry");
        }
    }

    /// Whether `(session_id, key)` is memoized. Does not touch counters.
    pub fn contains(&self, session_id: &str, key: &CanonicalKey) -> bool {
        self.lock()
            .sessions
            .get(session_id)
            .is_some_and(|entries| entries.values.contains_key(key))
    }

    /// Drop everything memoized for a session.
    pub fn forget_session(&self, session_id: &str) {
        if self.lock().sessions.remove(session_id).is_some() {
            debug!(session = session_id, "memo session forgotten");
        }
    }

    /// Number of entries memoized for a session.
    pub fn session_len(&self, session_id: &str) -> usize {
        self.lock()
            .sessions
            .get(session_id)
            .map_or(0, |entries| entries.values.len())
    }

    /// Number of sessions with at least one memoized entry.
    pub fn session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> MemoStats {
        self.lock().stats
    }

    fn lock(&self) -> MutexGuard<'_, MemoState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> Default for SessionMemo<T> {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CAPACITY)
    }
}
