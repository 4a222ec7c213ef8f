//! Duplicate-entity suppression within one result list and across the tool
//! calls of one user turn.
//!
//! [`dedupe`] keeps the first record per identity in a single list.
//! [`RequestBags`] remembers which identities have already been surfaced
//! during a request, so a later tool call in the same turn only shows what
//! is new. Both preserve the relative order of surviving records.
//!
//! Bags are request-scoped. Open one with [`RequestBags::begin`] and the
//! returned [`RequestScope`] clears it when dropped; [`RequestBags::finish`]
//! does the same explicitly. As a backstop the registry holds at most
//! `max_tracked` bags and discards the oldest beyond that.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DEFAULT_MAX_TRACKED_REQUESTS;
use crate::identity::ResultIdentity;

/// What to do with a record whose identity cannot be resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedPolicy {
    /// Discard it as a degenerate duplicate.
    #[default]
    Drop,
    /// Keep it as always-unique; it never enters a request bag.
    Keep,
}

/// Keep the first record per identity, preserving order.
pub fn dedupe<T, F>(results: Vec<T>, identity_of: F, policy: UnresolvedPolicy) -> Vec<T>
where
    F: Fn(&T) -> Option<ResultIdentity>,
{
    let mut seen = HashSet::with_capacity(results.len());
    results
        .into_iter()
        .filter(|item| match identity_of(item) {
            Some(id) => seen.insert(id),
            None => policy == UnresolvedPolicy::Keep,
        })
        .collect()
}

struct BagState {
    bags: HashMap<String, HashSet<ResultIdentity>>,
    /// Request ids in bag-creation order, for overflow eviction.
    created: VecDeque<String>,
}

/// Registry of per-request identity bags.
pub struct RequestBags {
    state: Mutex<BagState>,
    max_tracked: usize,
}

impl RequestBags {
    /// Create a registry holding at most `max_tracked` request bags.
    pub fn new(max_tracked: usize) -> Self {
        Self {
            state: Mutex::new(BagState {
                bags: HashMap::new(),
                created: VecDeque::new(),
            }),
            max_tracked: max_tracked.max(1),
        }
    }

    /// Open a request scope. The bag is cleared when the guard drops.
    pub fn begin(&self, request_id: impl Into<String>) -> RequestScope<'_> {
        RequestScope {
            bags: self,
            request_id: request_id.into(),
        }
    }

    /// Drop the bag for `request_id`, if any.
    pub fn finish(&self, request_id: &str) {
        let mut state = self.lock();
        if let Some(bag) = state.bags.remove(request_id) {
            state.created.retain(|id| id != request_id);
            debug!(request = request_id, surfaced = bag.len(), "request bag cleared");
        }
    }

    /// Filter out records already surfaced in this request and record the
    /// survivors.
    ///
    /// Without a request id this is a pass-through: nothing is filtered and
    /// no bag is touched. The check-and-insert for the whole list happens
    /// under one lock acquisition, so parallel tool calls of one request
    /// never both surface the same entity.
    pub fn dedupe_against_bag<T, F>(
        &self,
        request_id: Option<&str>,
        results: Vec<T>,
        identity_of: F,
        policy: UnresolvedPolicy,
    ) -> Vec<T>
    where
        F: Fn(&T) -> Option<ResultIdentity>,
    {
        let Some(request_id) = request_id.filter(|id| !id.is_empty()) else {
            return results;
        };

        let mut state = self.lock();
        if !state.bags.contains_key(request_id) {
            self.make_room(&mut state);
            state.created.push_back(request_id.to_string());
            state.bags.insert(request_id.to_string(), HashSet::new());
        }
        let Some(bag) = state.bags.get_mut(request_id) else {
            return results;
        };

        let before = results.len();
        let kept: Vec<T> = results
            .into_iter()
            .filter(|item| match identity_of(item) {
                Some(id) => bag.insert(id),
                None => policy == UnresolvedPolicy::Keep,
            })
            .collect();
        if kept.len() < before {
            debug!(
                request = request_id,
                dropped = before - kept.len(),
                "suppressed records already surfaced this request"
            );
        }
        kept
    }

    /// Whether `identity` has been surfaced during `request_id`.
    pub fn contains(&self, request_id: &str, identity: &ResultIdentity) -> bool {
        self.lock()
            .bags
            .get(request_id)
            .is_some_and(|bag| bag.contains(identity))
    }

    /// Number of identities surfaced so far during `request_id`.
    pub fn surfaced(&self, request_id: &str) -> usize {
        self.lock().bags.get(request_id).map_or(0, HashSet::len)
    }

    /// Number of request bags currently held.
    pub fn tracked_requests(&self) -> usize {
        self.lock().bags.len()
    }

    fn make_room(&self, state: &mut BagState) {
        while state.bags.len() >= self.max_tracked {
            let Some(oldest) = state.created.pop_front() else {
                break;
            };
            if state.bags.remove(&oldest).is_some() {
                warn!(
                    request = %oldest,
                    max_tracked = self.max_tracked,
                    "request bag evicted before its request finished"
                );
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, BagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RequestBags {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRACKED_REQUESTS)
    }
}

/// Guard for one request's dedupe bag; clears it on drop.
pub struct RequestScope<'a> {
    bags: &'a RequestBags,
    request_id: String,
}

impl RequestScope<'_> {
    /// The request id this scope covers.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

impl Drop for RequestScope<'_> {
    fn drop(&mut self) {
        self.bags.finish(&self.request_id);
    }
}
