//! Replay a recorded tool-call transcript through the coalescing pipeline.
//!
//! Prints a JSON report showing, per call, the canonical key and the
//! records that would be surfaced, plus how many backend invocations the
//! pipeline actually needed. Logs go to stderr; raise verbosity with
//! `--verbose` or `RUST_LOG`.
//!
//! # Examples
//!
//! ```sh
//! coalesce-replay transcript.json
//! coalesce-replay transcript.json --concurrent --session-capacity 50
//! RUST_LOG=coalesce_rs=debug coalesce-replay transcript.json --timeout-ms 2000
//! ```

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use coalesce_rs::dedupe::UnresolvedPolicy;
use coalesce_rs::replay::{ReplayOptions, load_transcript, replay};
use coalesce_rs::{CoalesceConfig, ToolCallPipeline};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Replay a tool-call transcript through the coalescing pipeline.
#[derive(Parser)]
#[command(name = "coalesce-replay")]
struct Cli {
    /// Transcript JSON file.
    transcript: PathBuf,

    /// Run the calls of each turn concurrently.
    #[arg(long)]
    concurrent: bool,

    /// Memoized results kept per session.
    #[arg(long, default_value_t = coalesce_rs::config::DEFAULT_SESSION_CAPACITY)]
    session_capacity: usize,

    /// Per-operation timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Surface records with no resolvable identity instead of dropping them.
    #[arg(long)]
    keep_unresolved: bool,

    /// Log at debug level.
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let transcript = match load_transcript(&cli.transcript) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let unresolved = if cli.keep_unresolved {
        UnresolvedPolicy::Keep
    } else {
        UnresolvedPolicy::Drop
    };
    let config = CoalesceConfig::default()
        .with_session_capacity(cli.session_capacity)
        .with_operation_timeout(cli.timeout_ms.map(Duration::from_millis))
        .with_unresolved(unresolved);
    let pipeline = ToolCallPipeline::new(config);

    let report = replay(
        &pipeline,
        &transcript,
        ReplayOptions {
            concurrent: cli.concurrent,
        },
    )
    .await;
    info!(
        backend_invocations = report.backend_invocations,
        memo_hit_rate = report.stats.memo.hit_rate(),
        "replay finished"
    );

    match serde_json::to_string_pretty(&report) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error: failed to serialize report: {e}");
            std::process::exit(1);
        }
    }
}
