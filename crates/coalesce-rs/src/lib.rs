//! Request coalescing and result-identity cache for LLM tool calls.
//!
//! An agent answering one research question often issues the same search
//! several times, concurrently or across turns, and gets overlapping
//! entities back from different tools. `coalesce-rs` sits between the agent
//! loop and the tool backends and removes that waste:
//!
//! - concurrent identical calls share one backend request ([`inflight`]),
//! - repeats within a conversation are served from a bounded memo ([`memo`]),
//! - every result record gets a stable identity ([`identity`]), so the same
//!   trial, patent, or paper is surfaced only once per user turn ([`dedupe`]).
//!
//! The [`ToolCallPipeline`](pipeline::ToolCallPipeline) composes all of it.
//!
//! # Getting started
//!
//! ```
//! use coalesce_rs::prelude::*;
//! use serde_json::json;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), CallError> {
//! let pipeline = ToolCallPipeline::new(CoalesceConfig::default());
//!
//! // One user turn; the bag of surfaced identities is cleared on drop.
//! let turn = pipeline.begin_request("turn-1");
//!
//! let call = ToolCall::new("search_trials", "Asthma  biologics")
//!     .session("conversation-42")
//!     .request(turn.request_id());
//! let records = pipeline
//!     .call(call, || async {
//!         // A real tool would hit its backend here.
//!         Ok(vec![
//!             RawRecord::from_value(&json!({"nct_id": "NCT01234567", "title": "Trial"})),
//!             RawRecord::from_value(&json!({"nctId": "nct01234567", "title": "Same trial"})),
//!         ])
//!     })
//!     .await?;
//!
//! assert_eq!(records.len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`key`] | [`CanonicalKey`](key::CanonicalKey) derivation from tool name, query, and options |
//! | [`identity`] | [`RawRecord`](identity::RawRecord) families and [`ResultIdentity`](identity::ResultIdentity) resolution |
//! | [`inflight`] | Singleflight registry for concurrent identical calls |
//! | [`memo`] | Per-session FIFO memo of completed results |
//! | [`dedupe`] | Within-list dedupe and per-request identity bags |
//! | [`pipeline`] | The composed call path |
//! | [`replay`] | Offline replay of recorded transcripts |

pub mod config;
pub mod dedupe;
pub mod error;
pub mod identity;
pub mod inflight;
pub mod key;
pub mod memo;
pub mod pipeline;
pub mod prelude;
pub mod replay;

pub use config::CoalesceConfig;
pub use error::CallError;
pub use pipeline::{ToolCall, ToolCallPipeline};
