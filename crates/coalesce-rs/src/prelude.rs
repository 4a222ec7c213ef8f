//! Convenience re-exports for common `coalesce-rs` types.
//!
//! ```ignore
//! use coalesce_rs::prelude::*;
//! ```
//!
//! Lower-level helpers (URL normalization, scholarly id parsing, the bare
//! [`dedupe`](crate::dedupe::dedupe) function) stay in their modules.

// ── Call path ───────────────────────────────────────────────────────
pub use crate::config::CoalesceConfig;
pub use crate::error::CallError;
pub use crate::pipeline::{IdentifiedRecord, PipelineStats, ToolCall, ToolCallPipeline};

// ── Building blocks ─────────────────────────────────────────────────
pub use crate::dedupe::{RequestBags, RequestScope, UnresolvedPolicy};
pub use crate::inflight::{Flight, InFlight};
pub use crate::key::{CanonicalKey, canonicalize};
pub use crate::memo::{MemoStats, SessionMemo};

// ── Identity ────────────────────────────────────────────────────────
pub use crate::identity::{RawRecord, RecordFields, ResultIdentity, resolve};
