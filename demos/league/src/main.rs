//! League example binary
//!
//! Forms a league, then asks for its summary, printing the notifications
//! and the query output along the way. Everything runs in memory.

use anyhow::{Context, bail};
use league::{CREATE_LEAGUE, GET_LEAGUE_SUMMARY, create_league_saga, league_summary_saga};
use sagaflow_core::SystemClock;
use sagaflow_core::notification::{NotificationTarget, ReturnTarget};
use sagaflow_core::request::{CommandRequest, QueryRequest};
use sagaflow_runtime::metrics::MetricsServer;
use sagaflow_runtime::transport::{BlobTransport, RealtimeTransport};
use sagaflow_runtime::{QueryWaitOutcome, TransportKind, TransportRegistry, WaitOptions, spawn_and_wait};
use sagaflow_testing::{InMemoryBlobStore, InMemoryEventStore};
use serde_json::json;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const UPDATES_CHANNEL: &str = "league-updates";
const SUMMARY_PATH: &str = "summaries/acme-fc.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "league=info,sagaflow_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== League Example: Command and Query Sagas ===\n");

    let metrics_addr = std::env::var("LEAGUE_METRICS_ADDR").unwrap_or_else(|_| "127.0.0.1:9090".into());
    let mut metrics = MetricsServer::new(metrics_addr.parse()?);
    metrics.start()?;

    let store = Arc::new(InMemoryEventStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let realtime = RealtimeTransport::default();
    let mut updates = realtime.subscribe(UPDATES_CHANNEL)?;
    let transports = || {
        TransportRegistry::new()
            .with_transport(TransportKind::RealtimeChannel, Arc::new(realtime.clone()))
            .with_transport(TransportKind::Blob, Arc::new(BlobTransport::new(blobs.clone())))
    };

    let printer = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            println!("  notification: {update}");
        }
    });

    // Command
    println!(">>> {CREATE_LEAGUE}");
    let command = create_league_saga(store.clone(), transports(), Arc::new(SystemClock));
    let request = CommandRequest::new(
        CREATE_LEAGUE,
        json!({ "LeagueName": "Acme FC", "Location": "Springfield" }),
    );
    let run = command
        .run(&request, &[NotificationTarget::realtime(UPDATES_CHANNEL)])
        .await;
    println!("  status: {:?}, result: {}", run.status, run.result.message);
    if !run.result.is_success() {
        bail!("{CREATE_LEAGUE} failed: {}", run.result.message);
    }

    // Redriving the same request is a no-op.
    let redrive = command.run(&request, &[]).await;
    println!("  redrive: {}", redrive.result.message);

    // Query
    println!("\n>>> {GET_LEAGUE_SUMMARY}");
    let query = Arc::new(league_summary_saga(store.clone(), transports(), Arc::new(SystemClock)));
    let request = QueryRequest::new(GET_LEAGUE_SUMMARY, json!({ "League_Name": "Acme FC" }))
        .with_return(ReturnTarget::Blob, SUMMARY_PATH);
    match spawn_and_wait(query, request, WaitOptions::default()).await? {
        QueryWaitOutcome::Completed(summary) => println!("  summary: {summary}"),
        QueryWaitOutcome::Invalid(reason) => bail!("{GET_LEAGUE_SUMMARY} invalid: {reason}"),
        QueryWaitOutcome::Stopped(run) => bail!("{GET_LEAGUE_SUMMARY} stopped: {}", run.result.message),
        QueryWaitOutcome::Running(handle) => {
            let run = handle.join().await?;
            println!("  summary (late): {:?}", run.value);
        },
    }

    let output = blobs
        .get_json(SUMMARY_PATH)
        .context("query output was not written")?;
    println!("  output at {SUMMARY_PATH}: {output}");

    printer.abort();
    println!("\n=== {} event logs written ===", store.stream_count());
    if let Some(rendered) = metrics.render() {
        let runs = rendered.lines().filter(|line| line.starts_with("saga_runs_total")).count();
        println!("=== {runs} saga run series recorded ===");
    }
    Ok(())
}
