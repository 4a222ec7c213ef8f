//! Offline replay of recorded tool-call transcripts through the pipeline.
//!
//! A transcript lists user turns, each with the tool calls the model made
//! and the canned results the backend returned. Replaying it shows exactly
//! which calls would hit the backend, which would be served from the memo
//! or coalesced onto an in-flight twin, and which records each call would
//! surface after deduplication. No network access is involved.
//!
//! ```json
//! {
//!   "session_id": "conv-1",
//!   "turns": [
//!     {
//!       "request_id": "turn-1",
//!       "calls": [
//!         { "tool": "search_trials", "query": "asthma", "results": [{"nct_id": "NCT1"}] }
//!       ]
//!     }
//!   ]
//! }
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::CallError;
use crate::identity::RawRecord;
use crate::pipeline::{IdentifiedRecord, PipelineStats, ToolCall, ToolCallPipeline};

/// A recorded conversation.
#[derive(Debug, Clone, Deserialize)]
pub struct Transcript {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub turns: Vec<TranscriptTurn>,
}

/// One user turn and the tool calls it triggered.
#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptTurn {
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub calls: Vec<RecordedCall>,
}

/// One tool call with the backend response to serve for it.
#[derive(Debug, Clone, Deserialize)]
pub struct RecordedCall {
    pub tool: String,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub options: Option<Value>,
    /// Raw backend records, classified with [`RawRecord::from_value`].
    #[serde(default)]
    pub results: Vec<Value>,
    /// When set, the backend fails with this message instead.
    #[serde(default)]
    pub error: Option<String>,
    /// Simulated backend latency.
    #[serde(default)]
    pub delay_ms: u64,
}

/// How to replay a transcript.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Run the calls of each turn in parallel instead of in order.
    pub concurrent: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    /// RFC 3339 timestamp.
    pub generated_at: String,
    pub turns: Vec<TurnReport>,
    /// How many times the simulated backend was actually invoked.
    pub backend_invocations: u64,
    pub stats: PipelineStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TurnReport {
    pub request_id: Option<String>,
    pub calls: Vec<CallReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CallReport {
    pub tool: String,
    pub query: String,
    pub key: String,
    pub outcome: CallOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallOutcome {
    Records(Vec<IdentifiedRecord>),
    Error(String),
}

/// Load a transcript from a JSON file.
pub fn load_transcript(path: &Path) -> Result<Transcript, String> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read transcript {}: {e}", path.display()))?;
    serde_json::from_str(&json)
        .map_err(|e| format!("Failed to parse transcript {}: {e}", path.display()))
}

/// Replay every turn of `transcript` through `pipeline`.
///
/// Each turn runs inside its own request scope, so its dedupe bag is
/// cleared as soon as the turn completes.
pub async fn replay(
    pipeline: &ToolCallPipeline,
    transcript: &Transcript,
    options: ReplayOptions,
) -> ReplayReport {
    let invocations = Arc::new(AtomicU64::new(0));
    let session = transcript.session_id.as_deref();
    let mut turns = Vec::with_capacity(transcript.turns.len());

    for (index, turn) in transcript.turns.iter().enumerate() {
        let _scope = turn
            .request_id
            .as_deref()
            .map(|id| pipeline.begin_request(id));
        info!(
            turn = index + 1,
            calls = turn.calls.len(),
            request = turn.request_id.as_deref().unwrap_or("-"),
            "replaying turn"
        );

        let request = turn.request_id.as_deref();
        let calls = if options.concurrent {
            join_all(
                turn.calls
                    .iter()
                    .map(|call| replay_call(pipeline, call, session, request, &invocations)),
            )
            .await
        } else {
            let mut reports = Vec::with_capacity(turn.calls.len());
            for call in &turn.calls {
                reports.push(replay_call(pipeline, call, session, request, &invocations).await);
            }
            reports
        };

        turns.push(TurnReport {
            request_id: turn.request_id.clone(),
            calls,
        });
    }

    ReplayReport {
        generated_at: Utc::now().to_rfc3339(),
        turns,
        backend_invocations: invocations.load(Ordering::SeqCst),
        stats: pipeline.stats(),
    }
}

async fn replay_call(
    pipeline: &ToolCallPipeline,
    recorded: &RecordedCall,
    session: Option<&str>,
    request: Option<&str>,
    invocations: &Arc<AtomicU64>,
) -> CallReport {
    let call = ToolCall {
        tool: &recorded.tool,
        query: &recorded.query,
        options: recorded.options.as_ref(),
        session_id: session,
        request_id: request,
    };
    let key = call.key();

    let outcome = pipeline
        .call(call, || fake_backend(recorded, Arc::clone(invocations)))
        .await;

    CallReport {
        tool: recorded.tool.clone(),
        query: recorded.query.clone(),
        key: key.into_string(),
        outcome: match outcome {
            Ok(records) => CallOutcome::Records(records),
            Err(e) => CallOutcome::Error(e.to_string()),
        },
    }
}

/// Build the simulated backend operation for a recorded call.
fn fake_backend(
    recorded: &RecordedCall,
    invocations: Arc<AtomicU64>,
) -> impl Future<Output = Result<Vec<RawRecord>, CallError>> + Send + 'static {
    let tool = recorded.tool.clone();
    let results = recorded.results.clone();
    let error = recorded.error.clone();
    let delay = Duration::from_millis(recorded.delay_ms);
    async move {
        invocations.fetch_add(1, Ordering::SeqCst);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        match error {
            Some(message) => Err(CallError::backend(tool, message)),
            None => Ok(results.iter().map(RawRecord::from_value).collect()),
        }
    }
}
