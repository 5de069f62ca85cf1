//! Query saga runs against the in-memory store.

#![allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sagaflow_core::event::{Event, SerializedEvent};
use sagaflow_core::ledger::{ProjectionKey, RequestStatus};
use sagaflow_core::lifecycle::{QueryEvent, query_types as t};
use sagaflow_core::notification::ReturnTarget;
use sagaflow_core::projection::{Projection, ProjectionError, ProjectionRegistry, decode_event};
use sagaflow_core::request::QueryRequest;
use sagaflow_core::status::OperationStatus;
use sagaflow_core::stream::OperationIdentity;
use sagaflow_core::summary::QuerySummary;
use sagaflow_runtime::journal;
use sagaflow_runtime::transport::BlobTransport;
use sagaflow_runtime::{
    HandlerFuture, ProcessedProjections, QueryHandler, QuerySaga, QuerySagaConfig,
    QueryWaitOutcome, RetryPolicy, SagaError, TransportKind, TransportRegistry, Validation,
    WaitOptions, spawn_and_wait,
};
use sagaflow_testing::{InMemoryBlobStore, InMemoryEventStore, init_test_tracing, test_clock};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct GoalScored {
    minute: u8,
    played_on: Option<DateTime<Utc>>,
}

impl Event for GoalScored {
    fn event_type(&self) -> &'static str {
        "GoalScored.v1"
    }

    fn as_of(&self) -> Option<DateTime<Utc>> {
        self.played_on
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct TeamGoals {
    goals: u32,
    last_minute: Option<u8>,
}

#[derive(Default)]
struct TeamGoalsProjection;

impl Projection for TeamGoalsProjection {
    type State = TeamGoals;

    fn name(&self) -> &str {
        "Team_Goals"
    }

    fn apply(&self, state: &mut TeamGoals, event: &SerializedEvent) -> Result<bool, ProjectionError> {
        if event.event_type != "GoalScored.v1" {
            return Ok(false);
        }
        let goal: GoalScored = decode_event(event)?;
        state.goals += 1;
        state.last_minute = Some(goal.minute);
        Ok(true)
    }
}

fn team_log(team: &str) -> OperationIdentity {
    OperationIdentity::new("leagues", "team", team)
}

/// Total goals across the teams named in `Teams`.
#[derive(Default)]
struct GoalTally {
    slow_validation: Option<Duration>,
}

impl QueryHandler for GoalTally {
    fn validate<'a>(&'a self, summary: &'a QuerySummary) -> HandlerFuture<'a, Validation> {
        Box::pin(async move {
            if let Some(delay) = self.slow_validation {
                tokio::time::sleep(delay).await;
            }
            let teams: Option<Vec<String>> = summary.parameter("Teams")?;
            Ok(match teams {
                Some(teams) if !teams.is_empty() => Validation::Valid,
                _ => Validation::fatal("At least one team is required"),
            })
        })
    }

    fn required_projections(&self, summary: &QuerySummary) -> Result<Vec<ProjectionKey>, SagaError> {
        let teams: Vec<String> = summary
            .parameter("Teams")?
            .ok_or_else(|| SagaError::structural("Missing parameter Teams"))?;
        Ok(teams
            .iter()
            .map(|team| ProjectionKey::new("Team_Goals", team_log(team)))
            .collect())
    }

    fn collate(
        &self,
        _summary: &QuerySummary,
        projections: &ProcessedProjections,
    ) -> Result<serde_json::Value, SagaError> {
        let mut total = 0;
        let mut by_team = serde_json::Map::new();
        for (key, value) in projections.iter() {
            let goals: TeamGoals = value.decode()?;
            total += goals.goals;
            by_team.insert(key.entity.instance_key.clone(), json!(goals.goals));
        }
        Ok(json!({ "total": total, "by_team": by_team }))
    }
}

struct Fixture {
    store: Arc<InMemoryEventStore>,
    blobs: Arc<InMemoryBlobStore>,
    saga: Arc<QuerySaga<GoalTally>>,
}

fn fixture_with(handler: GoalTally, registry: ProjectionRegistry) -> Fixture {
    init_test_tracing();
    let store = Arc::new(InMemoryEventStore::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let transports = TransportRegistry::new()
        .with_transport(TransportKind::Blob, Arc::new(BlobTransport::new(blobs.clone())));
    let config = QuerySagaConfig::new("leagues", "get-goal-tally")
        .with_projection_retry(RetryPolicy::none())
        .with_output_retry(RetryPolicy::none());
    let saga = Arc::new(QuerySaga::new(
        config,
        handler,
        store.clone(),
        registry,
        transports,
        Arc::new(test_clock()),
    ));
    Fixture { store, blobs, saga }
}

fn fixture() -> Fixture {
    fixture_with(
        GoalTally::default(),
        ProjectionRegistry::new().register::<TeamGoalsProjection>(),
    )
}

async fn score(store: &InMemoryEventStore, team: &str, minute: u8, played_on: Option<DateTime<Utc>>) {
    let log = team_log(team);
    sagaflow_core::event_store::EventStore::create_if_not_exists(store, log.stream_id())
        .await
        .expect("creates");
    journal::append(store, &log, &[GoalScored { minute, played_on }])
        .await
        .expect("appends");
}

fn tally(teams: &[&str]) -> QueryRequest {
    QueryRequest::new("get-goal-tally", json!({ "Teams": teams }))
}

#[tokio::test]
async fn query_over_several_projections_completes_and_outputs() {
    let f = fixture();
    score(&f.store, "Acme FC", 12, None).await;
    score(&f.store, "Acme FC", 77, None).await;
    score(&f.store, "Borough United", 45, None).await;

    let request = tally(&["Acme FC", "Borough United"]).with_return(ReturnTarget::Blob, "tallies/latest.json");
    let run = f.saga.run(&request).await;

    assert!(run.result.is_success(), "{:?}", run.result);
    assert_eq!(run.status, Some(OperationStatus::Completed));
    let expected = json!({ "total": 3, "by_team": { "Acme FC": 2, "Borough United": 1 } });
    assert_eq!(run.value, Some(expected.clone()));
    assert_eq!(run.outputs.dispatched, 1);
    assert_eq!(f.blobs.get_json("tallies/latest.json"), Some(expected));

    let ledger = f.saga.ledger(&run.identity).await.expect("folds");
    assert_eq!(ledger.processed_count(), 2);
    assert_eq!(ledger.unprocessed_count(), 0);
    let types = f.store.event_types(&run.identity.stream_id());
    assert_eq!(types.iter().filter(|ty| *ty == t::PROJECTION_REQUESTED).count(), 2);
    assert_eq!(
        types.iter().rev().take(2).map(String::as_str).collect::<Vec<_>>(),
        vec![t::OUTPUT_DISPATCHED, t::QUERY_COMPLETED]
    );
}

#[tokio::test]
async fn redrive_sends_output_collated_by_an_interrupted_run() {
    let f = fixture();
    score(&f.store, "Acme FC", 9, None).await;
    let request = tally(&["Acme FC"]).with_return(ReturnTarget::Blob, "tallies/acme.json");

    // Stop right after collation, before the output is written.
    let identity = f.saga.create(&request).await.expect("creates");
    f.saga.log_parameters(&identity, &request).await.expect("logs");
    f.saga.validate(&identity).await.expect("validates");
    f.saga.request_projections(&identity, None).await.expect("requests");
    f.saga.run_unprocessed_projections(&identity).await.expect("runs");
    let value = f.saga.collate(&identity).await.expect("collates").expect("result");
    assert_eq!(f.blobs.get_json("tallies/acme.json"), None);

    let run = f.saga.run(&request).await;

    assert!(run.result.is_success(), "{:?}", run.result);
    assert_eq!(run.outputs.dispatched, 1);
    assert_eq!(f.blobs.get_json("tallies/acme.json"), Some(value));
    let summary = f.saga.status(&identity).await.expect("folds");
    assert!(summary.output_dispatched_at.is_some());

    // Recorded outputs are not sent again.
    let again = f.saga.run(&request).await;
    assert_eq!(again.outputs.dispatched, 0);
    let sent = f
        .store
        .event_types(&identity.stream_id())
        .iter()
        .filter(|ty| *ty == t::OUTPUT_DISPATCHED)
        .count();
    assert_eq!(sent, 1);
}

#[tokio::test]
async fn projection_request_is_idempotent() {
    let f = fixture();
    let request = tally(&["Acme FC"]);
    let identity = f.saga.create(&request).await.expect("creates");
    f.saga.log_parameters(&identity, &request).await.expect("logs");
    f.saga.validate(&identity).await.expect("validates");

    assert_eq!(f.saga.request_projections(&identity, None).await.expect("requests"), 1);
    let after_first = f.store.events(&identity.stream_id()).len();
    assert_eq!(f.saga.request_projections(&identity, None).await.expect("no-op"), 0);
    assert_eq!(f.store.events(&identity.stream_id()).len(), after_first);

    let ledger = f.saga.ledger(&identity).await.expect("folds");
    assert_eq!(ledger.requested().count(), 1);
}

#[tokio::test]
async fn collation_waits_for_outstanding_projections() {
    let f = fixture();
    let request = tally(&["Acme FC"]);
    let identity = f.saga.create(&request).await.expect("creates");
    f.saga.log_parameters(&identity, &request).await.expect("logs");
    f.saga.validate(&identity).await.expect("validates");
    f.saga.request_projections(&identity, None).await.expect("requests");

    assert_eq!(f.saga.collate(&identity).await.expect("deferred"), None);
    assert_eq!(f.saga.output(&identity).await.expect("skipped").dispatched, 0);

    assert_eq!(f.saga.run_unprocessed_projections(&identity).await.expect("runs"), 1);
    assert_eq!(
        f.saga.collate(&identity).await.expect("collates"),
        Some(json!({ "total": 0, "by_team": { "Acme FC": 0 } }))
    );
    // A second collation returns the recorded result without appending.
    let len = f.store.events(&identity.stream_id()).len();
    assert!(f.saga.collate(&identity).await.expect("recorded").is_some());
    assert_eq!(f.store.events(&identity.stream_id()).len(), len);
}

#[tokio::test]
async fn interrupted_run_is_picked_up_again() {
    let f = fixture();
    score(&f.store, "Acme FC", 3, None).await;
    let request = tally(&["Acme FC"]);
    let identity = f.saga.create(&request).await.expect("creates");
    f.saga.log_parameters(&identity, &request).await.expect("logs");
    f.saga.validate(&identity).await.expect("validates");
    f.saga.request_projections(&identity, None).await.expect("requests");

    let key = ProjectionKey::new("Team_Goals", team_log("Acme FC"));
    journal::append(
        f.store.as_ref(),
        &identity,
        &[QueryEvent::ProjectionRunStarted { key, started_at: Utc::now() }],
    )
    .await
    .expect("appends");
    let ledger = f.saga.ledger(&identity).await.expect("folds");
    assert_eq!(ledger.entries()[0].status, RequestStatus::InProgress);

    let run = f.saga.run(&request).await;
    assert_eq!(run.value, Some(json!({ "total": 1, "by_team": { "Acme FC": 1 } })));
    let started = f
        .store
        .event_types(&identity.stream_id())
        .iter()
        .filter(|ty| *ty == t::PROJECTION_RUN_STARTED)
        .count();
    assert_eq!(started, 1);
}

#[tokio::test]
async fn as_of_excludes_later_facts() {
    let f = fixture();
    let cutoff = Utc::now();
    score(&f.store, "Acme FC", 10, Some(cutoff - ChronoDuration::days(7))).await;
    score(&f.store, "Acme FC", 20, Some(cutoff + ChronoDuration::days(7))).await;

    let run = f.saga.run(&tally(&["Acme FC"]).with_as_of(cutoff)).await;

    assert_eq!(run.value, Some(json!({ "total": 1, "by_team": { "Acme FC": 1 } })));
}

#[tokio::test]
async fn unregistered_projection_is_fatal() {
    let f = fixture_with(GoalTally::default(), ProjectionRegistry::new());

    let run = f.saga.run(&tally(&["Acme FC"])).await;

    assert!(run.result.fatal_error);
    assert!(run.result.message.contains("Team_Goals"));
    assert_eq!(run.status, Some(OperationStatus::Validated));
    assert!(f.saga.ledger(&run.identity).await.expect("folds").is_empty());
}

#[tokio::test]
async fn empty_team_list_is_invalid() {
    let f = fixture();

    let run = f.saga.run(&tally(&[])).await;

    assert!(run.result.fatal_error);
    assert_eq!(run.status, Some(OperationStatus::Invalid));
    assert_eq!(run.result.message, "At least one team is required");
}

#[tokio::test]
async fn polling_query_has_no_output_targets() {
    let f = fixture();

    let run = f.saga.run(&tally(&["Acme FC"])).await;

    assert!(run.result.is_success());
    assert_eq!(run.result.message, "get-goal-tally completed; no output targets");
    assert_eq!(run.outputs.dispatched, 0);
}

#[tokio::test]
async fn waiting_caller_gets_the_result() {
    let f = fixture();
    score(&f.store, "Borough United", 88, None).await;

    let outcome = spawn_and_wait(
        Arc::clone(&f.saga),
        tally(&["Borough United"]),
        WaitOptions::default().with_poll_interval(Duration::from_millis(5)),
    )
    .await
    .expect("waits");

    match outcome {
        QueryWaitOutcome::Completed(value) => {
            assert_eq!(value, json!({ "total": 1, "by_team": { "Borough United": 1 } }));
        },
        other => unreachable!("unexpected outcome {other:?}"),
    }
}

#[tokio::test]
async fn impatient_caller_gets_a_handle_and_the_saga_finishes() {
    let f = fixture_with(
        GoalTally {
            slow_validation: Some(Duration::from_millis(100)),
        },
        ProjectionRegistry::new().register::<TeamGoalsProjection>(),
    );

    let outcome = spawn_and_wait(
        Arc::clone(&f.saga),
        tally(&["Acme FC"]),
        WaitOptions::default()
            .with_timeout(Duration::from_millis(10))
            .with_poll_interval(Duration::from_millis(2)),
    )
    .await
    .expect("waits");

    let QueryWaitOutcome::Running(handle) = outcome else {
        unreachable!("query finished before the timeout");
    };
    let identity = handle.identity.clone();
    let run = handle.join().await.expect("task completes");

    assert!(run.result.is_success());
    let summary = f.saga.status(&identity).await.expect("folds");
    assert_eq!(summary.status, OperationStatus::Completed);
}

#[tokio::test]
async fn waiting_on_an_invalid_query_reports_the_reason() {
    let f = fixture();

    let outcome = spawn_and_wait(Arc::clone(&f.saga), tally(&[]), WaitOptions::default())
        .await
        .expect("waits");

    assert!(matches!(
        outcome,
        QueryWaitOutcome::Invalid(message) if message == "At least one team is required"
    ));
}
