//! Singleflight registry for expensive tool operations.
//!
//! Concurrent calls that share a [`CanonicalKey`] collapse onto one
//! underlying operation. The first caller registers the operation; every
//! caller that arrives while it is still pending awaits the same shared
//! future and receives a clone of its outcome, success or failure.
//!
//! The registry entry is removed inside the shared future at the moment the
//! operation settles, before any waiter observes the outcome. A call that
//! arrives after settlement therefore always starts a fresh operation.
//! Non-overlapping calls are not deduplicated here; that is the
//! [`SessionMemo`](crate::memo::SessionMemo)'s job.
//!
//! The operation keeps running while any caller still awaits it. When the
//! last caller is dropped before it settles, the operation is dropped with
//! it and the entry is cleared, so the next caller starts fresh.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

use crate::key::CanonicalKey;

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

struct Pending<T, E> {
    generation: u64,
    outcome: SharedOutcome<T, E>,
}

type Registry<T, E> = Arc<Mutex<HashMap<CanonicalKey, Pending<T, E>>>>;

/// How a [`InFlight::run_once`] caller was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flight {
    /// This caller registered and started the operation.
    Started,
    /// This caller joined an operation already in flight.
    Joined,
}

/// Process-wide (or service-wide) singleflight registry.
///
/// Cheap to clone; clones share one registry.
pub struct InFlight<T, E> {
    pending: Registry<T, E>,
    next_generation: Arc<AtomicU64>,
}

impl<T, E> Clone for InFlight<T, E> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            next_generation: Arc::clone(&self.next_generation),
        }
    }
}

impl<T, E> Default for InFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> InFlight<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Run `operation` unless an identical one is already in flight.
    ///
    /// `operation` is invoked at most once, and only when no pending entry
    /// exists for `key`. The check and the registration happen under one
    /// lock acquisition.
    pub async fn run_once<F, Fut>(&self, key: &CanonicalKey, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        self.run_once_traced(key, operation).await.0
    }

    /// Like [`run_once`](Self::run_once), also reporting whether this caller
    /// started the operation or joined an existing one.
    pub async fn run_once_traced<F, Fut>(
        &self,
        key: &CanonicalKey,
        operation: F,
    ) -> (Result<T, E>, Flight)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (outcome, generation, flight) = {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            match pending.get(key) {
                Some(entry) => {
                    debug!(key = %key, "joining in-flight operation");
                    (entry.outcome.clone(), entry.generation, Flight::Joined)
                }
                None => {
                    let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                    let outcome = self.settling(key.clone(), generation, operation());
                    pending.insert(
                        key.clone(),
                        Pending {
                            generation,
                            outcome: outcome.clone(),
                        },
                    );
                    debug!(key = %key, generation, "starting operation");
                    (outcome, generation, Flight::Started)
                }
            }
        };
        let mut waiter = Waiter {
            pending: &self.pending,
            key: key.clone(),
            generation,
            outcome,
        };
        ((&mut waiter.outcome).await, flight)
    }

    /// Number of operations currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether an operation for `key` is currently in flight.
    pub fn is_pending(&self, key: &CanonicalKey) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Wrap `operation` so it deregisters itself as it settles, then make it
    /// shareable between waiters.
    fn settling<Fut>(
        &self,
        key: CanonicalKey,
        generation: u64,
        operation: Fut,
    ) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let registry = Arc::clone(&self.pending);
        async move {
            let outcome = operation.await;
            let mut pending = registry.lock().unwrap_or_else(PoisonError::into_inner);
            // A newer generation can only exist if this entry was already
            // removed, so leave it alone.
            if pending
                .get(&key)
                .is_some_and(|entry| entry.generation == generation)
            {
                pending.remove(&key);
            }
            outcome
        }
        .boxed()
        .shared()
    }
}

/// One caller's handle on a pending operation.
///
/// Dropping the last handle before the operation settles deregisters it.
struct Waiter<'a, T, E> {
    pending: &'a Mutex<HashMap<CanonicalKey, Pending<T, E>>>,
    key: CanonicalKey,
    generation: u64,
    outcome: SharedOutcome<T, E>,
}

impl<T, E> Drop for Waiter<'_, T, E> {
    fn drop(&mut self) {
        // `None` once this handle has seen the outcome.
        if self.outcome.strong_count().is_none() {
            return;
        }
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        // Joiners clone under this lock, so two handles left means the
        // registry's and ours.
        let abandoned = pending.get(&self.key).is_some_and(|entry| {
            entry.generation == self.generation && entry.outcome.strong_count() == Some(2)
        });
        if abandoned {
            pending.remove(&self.key);
            debug!(
                key = %self.key,
                generation = self.generation,
                "operation abandoned by every caller"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::canonicalize;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn key(q: &str) -> CanonicalKey {
        canonicalize("search_patents", q, None)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_share_one_execution() {
        let flights: InFlight<String, String> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("graphene batteries");

        let mut handles = Vec::new();
        for _ in 0..16 {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run_once(&k, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Ok("result".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok("result".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(flights.pending_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn failure_reaches_every_waiter() {
        let flights: InFlight<String, String> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("q");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = Arc::clone(&calls);
            let k = k.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run_once(&k, move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        Err("HTTP 429".to_string())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Err("HTTP 429".to_string()));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!flights.is_pending(&k));
    }

    #[tokio::test]
    async fn settled_key_runs_fresh() {
        let flights: InFlight<usize, String> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let k = key("q");

        for expected in 1..=3 {
            let calls = Arc::clone(&calls);
            let got = flights
                .run_once(&k, move || async move {
                    Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
                })
                .await;
            assert_eq!(got, Ok(expected));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_after_failure_is_not_blocked() {
        let flights: InFlight<&'static str, &'static str> = InFlight::new();
        let k = key("q");
        let first = flights.run_once(&k, || async { Err("boom") }).await;
        assert_eq!(first, Err("boom"));
        assert!(!flights.is_pending(&k));
        let second = flights.run_once(&k, || async { Ok("ok") }).await;
        assert_eq!(second, Ok("ok"));
    }

    #[tokio::test]
    async fn distinct_keys_do_not_coalesce() {
        let flights: InFlight<&'static str, ()> = InFlight::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let (c1, c2) = (Arc::clone(&calls), Arc::clone(&calls));
        let (ka, kb) = (key("a"), key("b"));
        let (a, b) = tokio::join!(
            flights.run_once(&ka, move || async move {
                c1.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("a")
            }),
            flights.run_once(&kb, move || async move {
                c2.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok("b")
            }),
        );
        assert_eq!((a, b), (Ok("a"), Ok("b")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn traced_reports_started_and_joined() {
        let flights: InFlight<u8, ()> = InFlight::new();
        let k = key("q");
        let slow = || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(7)
        };
        let ((r1, f1), (r2, f2)) = tokio::join!(
            flights.run_once_traced(&k, slow),
            flights.run_once_traced(&k, slow),
        );
        assert_eq!((r1, r2), (Ok(7), Ok(7)));
        assert_eq!(f1, Flight::Started);
        assert_eq!(f2, Flight::Joined);
    }

    #[tokio::test]
    async fn dropped_leader_does_not_strand_joiners() {
        let flights: InFlight<u8, ()> = InFlight::new();
        let k = key("q");
        let mut leader = Box::pin(flights.run_once(&k, || async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok(1)
        }));
        assert!(futures::poll!(leader.as_mut()).is_pending());
        let mut joiner = Box::pin(flights.run_once(&k, || async { Ok(2) }));
        assert!(futures::poll!(joiner.as_mut()).is_pending());

        drop(leader);
        assert!(flights.is_pending(&k));
        assert_eq!(joiner.await, Ok(1));
        assert!(!flights.is_pending(&k));
    }

    #[tokio::test]
    async fn cancelling_every_caller_clears_the_entry() {
        let flights: InFlight<u8, ()> = InFlight::new();
        let k = key("q");
        let calls = Arc::new(AtomicUsize::new(0));
        let slow = |calls: Arc<AtomicUsize>| {
            move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(1)
            }
        };

        let mut first = Box::pin(flights.run_once(&k, slow(Arc::clone(&calls))));
        let mut second = Box::pin(flights.run_once(&k, slow(Arc::clone(&calls))));
        assert!(futures::poll!(first.as_mut()).is_pending());
        assert!(futures::poll!(second.as_mut()).is_pending());
        drop(first);
        drop(second);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!flights.is_pending(&k));
        assert_eq!(flights.pending_count(), 0);

        // The next caller runs a fresh operation.
        let again = flights.run_once(&k, slow(Arc::clone(&calls))).await;
        assert_eq!(again, Ok(1));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timed_out_caller_clears_the_entry() {
        let flights: InFlight<u8, ()> = InFlight::new();
        let k = key("q");
        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            flights.run_once(&k, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(1)
            }),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!flights.is_pending(&k));
    }
}
