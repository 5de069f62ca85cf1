//! Notification fan-out against in-memory transports.

#![allow(clippy::expect_used)] // Panics: Tests fail loudly on unexpected errors

use chrono::Utc;
use futures::StreamExt;
use sagaflow_core::event_bus::EventBus;
use sagaflow_core::notification::{ImpactedEntity, NotificationKind, NotificationTarget, OutputTarget, ReturnTarget};
use sagaflow_core::stream::OperationIdentity;
use sagaflow_runtime::fanout::{Notice, NotificationFanOut, NotificationPayload};
use sagaflow_runtime::retry::RetryPolicy;
use sagaflow_runtime::transport::{
    BlobTransport, PublishedPayload, RealtimeTransport, ResumeSignalTransport, TopicTransport,
    TransportError, TransportKind, TransportRegistry,
};
use sagaflow_testing::{InMemoryBlobStore, InMemoryEventBus, RecordingTransport, init_test_tracing};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn notice(kind: NotificationKind) -> Notice {
    Notice {
        kind,
        operation: OperationIdentity::new("leagues", "create-league", "c-1"),
        message: "create-league completed".to_string(),
        raised_at: Utc::now(),
    }
}

fn entities() -> Vec<ImpactedEntity> {
    vec![
        ImpactedEntity::new("League", "Acme FC"),
        ImpactedEntity::new("League", "Borough United"),
    ]
}

#[tokio::test]
async fn one_hanging_target_fails_alone_and_every_task_settles() {
    init_test_tracing();
    let webhooks = RecordingTransport::new().hang_address("https://slow.test/hook");
    let bus = Arc::new(InMemoryEventBus::new());
    let mut published = bus.subscribe(&["league-updates"]).await.expect("subscribes");

    let transports = TransportRegistry::new()
        .with_transport(TransportKind::Webhook, Arc::new(webhooks.clone()))
        .with_transport(TransportKind::CustomTopic, Arc::new(TopicTransport::new(bus)));
    let fanout = NotificationFanOut::new(
        transports,
        RetryPolicy::none(),
        Duration::from_millis(50),
    );

    let targets = vec![
        NotificationTarget::webhook("https://ok.test/hook"),
        NotificationTarget::webhook("https://slow.test/hook"),
        NotificationTarget::topic("league-updates"),
    ];

    let started = Instant::now();
    let report = fanout
        .dispatch(&notice(NotificationKind::StepComplete), &targets, &entities())
        .await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(report.dispatched, 6);
    assert_eq!(report.failed_targets(), 1);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.succeeded(), 4);
    assert!(report
        .failures
        .iter()
        .all(|f| f.address == "https://slow.test/hook"
            && f.error == TransportError::Timeout(Duration::from_millis(50))));

    let delivered = webhooks.delivered_to("https://ok.test/hook");
    assert_eq!(delivered.len(), 2);
    let first: NotificationPayload =
        serde_json::from_value(delivered[0].clone()).expect("payload shape");
    assert_eq!(first.code, NotificationKind::StepComplete.code());

    for _ in 0..2 {
        let event = tokio::time::timeout(Duration::from_secs(1), published.next())
            .await
            .expect("published in time")
            .expect("stream open")
            .expect("no lag");
        let envelope: PublishedPayload = event.decode().expect("decodes");
        assert!(envelope.payload_json.contains("League"));
    }
}

#[tokio::test]
async fn failing_target_is_retried_then_reported() {
    let webhooks = RecordingTransport::new().fail_address("https://down.test");
    let transports =
        TransportRegistry::new().with_transport(TransportKind::Webhook, Arc::new(webhooks.clone()));
    let policy = RetryPolicy::new()
        .with_max_attempts(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false);
    let fanout = NotificationFanOut::new(transports, policy, Duration::from_secs(1));

    let report = fanout
        .dispatch(
            &notice(NotificationKind::Error),
            &[NotificationTarget::webhook("https://down.test")],
            &[ImpactedEntity::new("create-league", "c-1")],
        )
        .await;

    assert_eq!(report.failed(), 1);
    assert_eq!(webhooks.attempts("https://down.test"), 3);
}

#[tokio::test]
async fn no_entities_means_no_tasks() {
    let webhooks = RecordingTransport::new();
    let transports =
        TransportRegistry::new().with_transport(TransportKind::Webhook, Arc::new(webhooks.clone()));
    let fanout = NotificationFanOut::new(transports, RetryPolicy::none(), Duration::from_secs(1));

    let report = fanout
        .dispatch(
            &notice(NotificationKind::CommandComplete),
            &[NotificationTarget::webhook("https://ok.test")],
            &[],
        )
        .await;

    assert_eq!(report.dispatched, 0);
    assert!(report.is_clean());
    assert!(webhooks.delivered().is_empty());
}

#[tokio::test]
async fn outputs_reach_blob_realtime_and_resume_targets() {
    let blobs = Arc::new(InMemoryBlobStore::new());
    let realtime = RealtimeTransport::new(8);
    let mut listener = realtime.subscribe("scoreboard").expect("subscribes");
    let resume = ResumeSignalTransport::new();
    let mut paused = resume.register("season-setup").expect("registers");

    let transports = TransportRegistry::new()
        .with_transport(TransportKind::Blob, Arc::new(BlobTransport::new(blobs.clone())))
        .with_transport(TransportKind::ResumeSignal, Arc::new(resume))
        .with_transport(TransportKind::RealtimeChannel, Arc::new(realtime.clone()));
    let fanout = NotificationFanOut::new(transports, RetryPolicy::none(), Duration::from_secs(1));

    let value = json!({ "name": "Acme FC", "location": "Springfield" });
    let report = fanout
        .dispatch_outputs(
            &[
                OutputTarget::new(ReturnTarget::Blob, "results/acme.json"),
                OutputTarget::new(ReturnTarget::ResumeSignal, "season-setup"),
                OutputTarget::new(ReturnTarget::ResumeSignal, "nobody-waiting"),
            ],
            &value,
        )
        .await;

    assert_eq!(report.dispatched, 3);
    assert_eq!(report.failed(), 1);
    assert_eq!(
        report.failures[0].error,
        TransportError::NoRecipient("nobody-waiting".to_string())
    );
    assert_eq!(blobs.get_json("results/acme.json"), Some(value.clone()));
    assert_eq!(paused.recv().await, Some(value.clone()));

    fanout
        .deliver(TransportKind::RealtimeChannel, "scoreboard", &value)
        .await
        .expect("pushes");
    assert_eq!(listener.recv().await.expect("receives"), value);
}
