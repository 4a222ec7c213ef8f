//! Configuration for the coalescing pipeline.

use std::time::Duration;

use crate::dedupe::UnresolvedPolicy;

/// Per-session memo capacity used when none is configured.
pub const DEFAULT_SESSION_CAPACITY: usize = 200;

/// Upper bound on simultaneously tracked request dedupe bags.
pub const DEFAULT_MAX_TRACKED_REQUESTS: usize = 1024;

/// Configuration for a [`ToolCallPipeline`](crate::pipeline::ToolCallPipeline).
///
/// Both construction patterns work: `CoalesceConfig::default()` with the
/// `with_*` builders, or struct update syntax.
///
/// ```
/// use coalesce_rs::config::CoalesceConfig;
/// use std::time::Duration;
///
/// let config = CoalesceConfig::default()
///     .with_session_capacity(50)
///     .with_operation_timeout(Some(Duration::from_secs(30)));
/// assert_eq!(config.session_capacity, 50);
/// ```
#[derive(Debug, Clone)]
pub struct CoalesceConfig {
    /// Whether completed results are memoized per session. Default: `true`.
    pub memo_enabled: bool,
    /// Maximum memoized results per session before FIFO eviction. Default: 200.
    pub session_capacity: usize,
    /// Timeout applied to each underlying operation. `None` leaves timing
    /// to the operation itself. Default: `None`.
    pub operation_timeout: Option<Duration>,
    /// What deduplication does with records that have no identity.
    /// Default: [`UnresolvedPolicy::Drop`].
    pub unresolved: UnresolvedPolicy,
    /// Maximum request bags held at once; the oldest is dropped beyond
    /// this. Default: 1024.
    pub max_tracked_requests: usize,
}

impl Default for CoalesceConfig {
    fn default() -> Self {
        Self {
            memo_enabled: true,
            session_capacity: DEFAULT_SESSION_CAPACITY,
            operation_timeout: None,
            unresolved: UnresolvedPolicy::default(),
            max_tracked_requests: DEFAULT_MAX_TRACKED_REQUESTS,
        }
    }
}

impl CoalesceConfig {
    /// Singleflight and dedupe only; nothing is memoized across calls.
    pub fn uncached() -> Self {
        Self {
            memo_enabled: false,
            ..Default::default()
        }
    }

    pub fn with_session_capacity(mut self, capacity: usize) -> Self {
        self.session_capacity = capacity;
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.operation_timeout = timeout;
        self
    }

    pub fn with_unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    pub fn with_max_tracked_requests(mut self, max: usize) -> Self {
        self.max_tracked_requests = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CoalesceConfig::default();
        assert!(config.memo_enabled);
        assert_eq!(config.session_capacity, 200);
        assert_eq!(config.operation_timeout, None);
        assert_eq!(config.unresolved, UnresolvedPolicy::Drop);
        assert_eq!(config.max_tracked_requests, 1024);
    }

    #[test]
    fn uncached_keeps_other_defaults() {
        let config = CoalesceConfig::uncached();
        assert!(!config.memo_enabled);
        assert_eq!(config.session_capacity, DEFAULT_SESSION_CAPACITY);
    }

    #[test]
    fn builders_chain() {
        let config = CoalesceConfig::default()
            .with_unresolved(UnresolvedPolicy::Keep)
            .with_max_tracked_requests(8)
            .with_operation_timeout(Some(Duration::from_secs(5)));
        assert_eq!(config.unresolved, UnresolvedPolicy::Keep);
        assert_eq!(config.max_tracked_requests, 8);
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(5)));
    }
}
