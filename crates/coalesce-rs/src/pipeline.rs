//! The composed tool-call path: canonicalize, memoize, coalesce, execute,
//! identify, deduplicate.
//!
//! A [`ToolCallPipeline`] is the one object a tool implementation talks to.
//! It owns every piece of shared state (the singleflight registry, the
//! session memo, the request bags) so lifetimes and test isolation stay
//! explicit. Create one per process (or per test) and share it by reference
//! or `Arc`.
//!
//! ```text
//! ToolCall ──canonicalize──▶ CanonicalKey
//!   └─▶ SessionMemo (outer) ──miss──▶ InFlight (inner) ──▶ operation()
//!   └─▶ resolve identities ──▶ dedupe within list ──▶ dedupe against request bag
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::CoalesceConfig;
use crate::dedupe::{RequestBags, RequestScope, dedupe};
use crate::error::CallError;
use crate::identity::{RawRecord, ResultIdentity, resolve};
use crate::inflight::{Flight, InFlight};
use crate::key::{CanonicalKey, canonicalize};
use crate::memo::{MemoStats, SessionMemo};

/// Shared, immutable result list as returned by an operation.
pub type RecordList = Arc<Vec<RawRecord>>;

/// One tool invocation.
///
/// Every array inside `options` must be an order-independent set of filter
/// tokens, because canonicalization sorts arrays.
#[derive(Debug, Clone, Copy)]
pub struct ToolCall<'a> {
    pub tool: &'a str,
    pub query: &'a str,
    pub options: Option<&'a Value>,
    /// Conversation scope for memoization. `None` disables the memo.
    pub session_id: Option<&'a str>,
    /// User-turn scope for cross-call dedupe. `None` disables the bag.
    pub request_id: Option<&'a str>,
}

impl<'a> ToolCall<'a> {
    pub fn new(tool: &'a str, query: &'a str) -> Self {
        Self {
            tool,
            query,
            options: None,
            session_id: None,
            request_id: None,
        }
    }

    pub fn options(mut self, options: &'a Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn session(mut self, session_id: &'a str) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn request(mut self, request_id: &'a str) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// The canonical key for this call.
    pub fn key(&self) -> CanonicalKey {
        canonicalize(self.tool, self.query, self.options)
    }
}

/// A record tagged with its resolved identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentifiedRecord {
    /// `None` only when the record is unresolvable and
    /// [`UnresolvedPolicy::Keep`](crate::dedupe::UnresolvedPolicy::Keep) is in effect.
    pub identity: Option<ResultIdentity>,
    pub record: RawRecord,
}

/// Counters across the pipeline's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Underlying operations actually started.
    pub operations_started: u64,
    /// Callers served by joining an operation already in flight.
    pub coalesced_waiters: u64,
    /// Records removed by within-list or cross-call dedupe.
    pub duplicates_suppressed: u64,
    pub memo: MemoStats,
}

/// Request coalescing and result-identity cache for tool calls.
pub struct ToolCallPipeline {
    config: CoalesceConfig,
    in_flight: InFlight<RecordList, CallError>,
    memo: SessionMemo<RecordList>,
    bags: RequestBags,
    operations_started: AtomicU64,
    coalesced_waiters: AtomicU64,
    duplicates_suppressed: AtomicU64,
}

impl Default for ToolCallPipeline {
    fn default() -> Self {
        Self::new(CoalesceConfig::default())
    }
}

impl ToolCallPipeline {
    pub fn new(config: CoalesceConfig) -> Self {
        Self {
            in_flight: InFlight::new(),
            memo: SessionMemo::new(config.session_capacity),
            bags: RequestBags::new(config.max_tracked_requests),
            config,
            operations_started: AtomicU64::new(0),
            coalesced_waiters: AtomicU64::new(0),
            duplicates_suppressed: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CoalesceConfig {
        &self.config
    }

    pub fn memo(&self) -> &SessionMemo<RecordList> {
        &self.memo
    }

    pub fn bags(&self) -> &RequestBags {
        &self.bags
    }

    pub fn in_flight(&self) -> &InFlight<RecordList, CallError> {
        &self.in_flight
    }

    /// Open a request scope; its dedupe bag is cleared when the guard drops.
    pub fn begin_request(&self, request_id: impl Into<String>) -> RequestScope<'_> {
        self.bags.begin(request_id)
    }

    /// Forget everything memoized for a session.
    pub fn end_session(&self, session_id: &str) {
        self.memo.forget_session(session_id);
    }

    /// Run a call and return the raw, possibly memoized or coalesced result.
    ///
    /// No identity resolution or dedupe is applied.
    pub async fn call_raw<F, Fut>(
        &self,
        call: ToolCall<'_>,
        operation: F,
    ) -> Result<RecordList, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawRecord>, CallError>> + Send + 'static,
    {
        let key = call.key();
        let session = if self.config.memo_enabled {
            call.session_id
        } else {
            None
        };
        self.memo
            .get_or_compute(session, &key, || self.coalesced(call.tool, &key, operation))
            .await
    }

    /// Run a call and return its records tagged with identities, with
    /// duplicates removed within the list and against everything already
    /// surfaced during `call.request_id`.
    pub async fn call<F, Fut>(
        &self,
        call: ToolCall<'_>,
        operation: F,
    ) -> Result<Vec<IdentifiedRecord>, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawRecord>, CallError>> + Send + 'static,
    {
        let records = self.call_raw(call, operation).await?;
        Ok(self.identify(call.request_id, &records))
    }

    /// Resolve identities and apply both dedupe passes to a result list.
    pub fn identify(
        &self,
        request_id: Option<&str>,
        records: &[RawRecord],
    ) -> Vec<IdentifiedRecord> {
        let policy = self.config.unresolved;
        let tagged: Vec<IdentifiedRecord> = records
            .iter()
            .map(|record| IdentifiedRecord {
                identity: resolve(record),
                record: record.clone(),
            })
            .collect();
        let total = tagged.len();

        let unique = dedupe(tagged, |r| r.identity, policy);
        let fresh = self
            .bags
            .dedupe_against_bag(request_id, unique, |r| r.identity, policy);

        let suppressed = (total - fresh.len()) as u64;
        if suppressed > 0 {
            self.duplicates_suppressed
                .fetch_add(suppressed, Ordering::Relaxed);
        }
        fresh
    }

    /// Counter snapshot.
    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            operations_started: self.operations_started.load(Ordering::Relaxed),
            coalesced_waiters: self.coalesced_waiters.load(Ordering::Relaxed),
            duplicates_suppressed: self.duplicates_suppressed.load(Ordering::Relaxed),
            memo: self.memo.stats(),
        }
    }

    async fn coalesced<F, Fut>(
        &self,
        tool: &str,
        key: &CanonicalKey,
        operation: F,
    ) -> Result<RecordList, CallError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<RawRecord>, CallError>> + Send + 'static,
    {
        let timeout = self.config.operation_timeout;
        let tool_name = tool.to_string();
        let (outcome, flight) = self
            .in_flight
            .run_once_traced(key, move || {
                let fut = operation();
                async move {
                    let records = match timeout {
                        Some(after) => match tokio::time::timeout(after, fut).await {
                            Ok(result) => result?,
                            Err(_) => {
                                warn!(tool = %tool_name, ?after, "operation timed out");
                                return Err(CallError::TimedOut {
                                    tool: tool_name,
                                    after,
                                });
                            }
                        },
                        None => fut.await?,
                    };
                    Ok(Arc::new(records))
                }
            })
            .await;

        match flight {
            Flight::Started => {
                self.operations_started.fetch_add(1, Ordering::Relaxed);
            }
            Flight::Joined => {
                self.coalesced_waiters.fetch_add(1, Ordering::Relaxed);
                debug!(tool, "served by in-flight operation");
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedupe::UnresolvedPolicy;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn records(values: &[Value]) -> Vec<RawRecord> {
        values.iter().map(RawRecord::from_value).collect()
    }

    #[tokio::test]
    async fn call_tags_and_dedupes() {
        let pipeline = ToolCallPipeline::default();
        let out = pipeline
            .call(ToolCall::new("search_trials", "asthma"), || async {
                Ok(records(&[
                    json!({"nct_id": "NCT1", "title": "a"}),
                    json!({"nct_id": "NCT1", "title": "a, refetched"}),
                    json!({"nct_id": "NCT2"}),
                ]))
            })
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.identity.is_some()));
        assert_eq!(pipeline.stats().duplicates_suppressed, 1);
    }

    #[tokio::test]
    async fn memo_disabled_still_runs_every_time() {
        let pipeline = ToolCallPipeline::new(CoalesceConfig::uncached());
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let calls = Arc::clone(&calls);
            pipeline
                .call_raw(ToolCall::new("t", "q").session("s1"), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![])
                })
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn timeout_becomes_call_error_and_is_not_memoized() {
        let config =
            CoalesceConfig::default().with_operation_timeout(Some(Duration::from_millis(20)));
        let pipeline = ToolCallPipeline::new(config);
        let call = ToolCall::new("run_code", "print(1)").session("s1");
        let err = pipeline
            .call_raw(call, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(vec![])
            })
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(err.tool(), "run_code");
        assert!(!pipeline.memo().contains("s1", &call.key()));
        assert_eq!(pipeline.in_flight().pending_count(), 0);
    }

    #[tokio::test]
    async fn keep_policy_surfaces_unresolvable_records() {
        let config = CoalesceConfig::default().with_unresolved(UnresolvedPolicy::Keep);
        let pipeline = ToolCallPipeline::new(config);
        let out = pipeline
            .call(ToolCall::new("run_code", "x").request("r1"), || async {
                Ok(records(&[json!({}), json!({})]))
            })
            .await
            .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.identity.is_none()));
    }

    #[test]
    fn identified_record_serializes_identity_as_string() {
        let rec = RawRecord::generic("https://x.com/a", "A");
        let tagged = IdentifiedRecord {
            identity: resolve(&rec),
            record: rec,
        };
        let json = serde_json::to_value(&tagged).unwrap();
        assert_eq!(json["identity"].as_str().map(str::len), Some(36));
        assert_eq!(json["record"]["kind"], "generic");
    }
}
