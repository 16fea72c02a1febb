//! End-to-end tests of the delivery flow.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use tower::ServiceExt;

use super::{router, PushCoordinator};
use crate::core::{FollowUp, StageId, StageOutcome, VerdictReason};
use crate::dispatch::PipelineLayout;
use crate::enqueue::{InMemoryEnqueuer, MockStageEnqueuer};
use crate::envelope::{ATTR_RESTARTS, ATTR_STAGE};
use crate::errors::{EnqueueError, UpstreamError};
use crate::events::{event_types, CollectingEventSink};
use crate::executor::StageRegistry;
use crate::retry::{PolicyTable, RetryMode, RetryPolicy};
use crate::testing::{
    assert_abandoned, assert_ack, assert_advances_to, assert_nack_within, FailingExecutor,
    MockExecutor, PanickingExecutor, PushBody, RecordingExecutor, SlowExecutor, TestHarness,
};
use crate::upstream::{MockUpstreamReporter, ProcessedOutput, UpstreamReporter};

fn speech_executors() -> (Arc<MockExecutor>, Arc<MockExecutor>) {
    (
        Arc::new(MockExecutor::new(StageId::stt())),
        Arc::new(MockExecutor::new(StageId::smart())),
    )
}

fn speech_registry(stt: &Arc<MockExecutor>, smart: &Arc<MockExecutor>) -> StageRegistry {
    StageRegistry::new()
        .with(stt.clone())
        .with(smart.clone())
}

#[tokio::test]
async fn test_retryable_failure_then_exhausted() {
    let harness = TestHarness::new(
        StageRegistry::new().with(Arc::new(FailingExecutor::transient(
            StageId::stt(),
            "asr backend unavailable",
        ))),
        PolicyTable::new(RetryPolicy::default().with_max_attempts(2)),
    );

    let first = harness.deliver(&PushBody::new("p1", "stt")).await;
    assert_nack_within(&first, Duration::from_secs(1), Duration::from_secs(3));
    assert_eq!(first.reason, VerdictReason::Retry);
    assert!(harness.enqueuer.is_empty());

    let second = harness
        .deliver(&PushBody::new("p1", "stt").with_attempt(2))
        .await;
    assert_ack(&second, VerdictReason::Exhausted);
    assert!(harness.enqueuer.is_empty());

    let abandoned = harness.events.payloads(event_types::PIPELINE_ABANDONED);
    assert_eq!(abandoned.len(), 1);
    assert_eq!(abandoned[0]["pipeline_id"], "p1");
    assert_eq!(abandoned[0]["reason"], "exhausted");
    assert_eq!(harness.events.payloads(event_types::DELIVERY_DECIDED).len(), 2);
}

#[tokio::test]
async fn test_success_advances_then_completes() {
    let (stt, smart) = speech_executors();
    let harness = TestHarness::new(speech_registry(&stt, &smart), PolicyTable::default());

    let verdict = harness.deliver(&PushBody::new("p2", "stt")).await;
    assert_advances_to(&verdict, &StageId::smart());
    assert_eq!(harness.published_stages(), vec![StageId::smart()]);

    // The published follow-up decodes as a fresh first attempt of smart.
    let (_, message) = harness.enqueuer.drain().remove(0);
    let envelope = message.into_push_envelope("m-2", 1);
    let body = serde_json::to_vec(&envelope).unwrap();
    let verdict = harness.coordinator.handle(None, &body).await;
    assert_ack(&verdict, VerdictReason::Completed);
    assert!(harness.enqueuer.is_empty());

    assert_eq!(stt.call_count(), 1);
    assert_eq!(smart.call_count(), 1);
    assert_eq!(harness.events.payloads(event_types::PIPELINE_ADVANCED).len(), 1);
    assert_eq!(harness.events.payloads(event_types::PIPELINE_COMPLETED).len(), 1);
}

#[tokio::test]
async fn test_concurrent_deliveries_are_independent() {
    let stt = Arc::new(RecordingExecutor::new(StageId::stt()));
    let harness = TestHarness::new(StageRegistry::new().with(stt.clone()), PolicyTable::default());

    let a = PushBody::new("run-a", "stt");
    let b = PushBody::new("run-b", "stt").with_attempt(2);
    let (va, vb) = tokio::join!(harness.deliver(&a), harness.deliver(&b));

    assert_advances_to(&va, &StageId::smart());
    assert_advances_to(&vb, &StageId::smart());
    assert_eq!(stt.execution_count(), 2);

    let mut ids: Vec<_> = stt.items().into_iter().map(|i| i.pipeline_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["run-a".to_string(), "run-b".to_string()]);
    assert_eq!(harness.enqueuer.len(), 2);
}

#[tokio::test]
async fn test_malformed_deliveries_are_acked() {
    let (stt, smart) = speech_executors();
    let harness = TestHarness::new(speech_registry(&stt, &smart), PolicyTable::default());

    let garbage = harness.coordinator.handle(None, b"not json").await;
    assert_ack(&garbage, VerdictReason::MalformedEnvelope);

    let no_stage = PushBody::new("p3", "stt").without_attribute(ATTR_STAGE);
    let verdict = harness.deliver(&no_stage).await;
    assert_ack(&verdict, VerdictReason::MalformedEnvelope);

    let bad_restarts = PushBody::new("p3", "stt").with_attribute(ATTR_RESTARTS, "many");
    let verdict = harness.deliver(&bad_restarts).await;
    assert_ack(&verdict, VerdictReason::MalformedEnvelope);

    let unknown = harness.deliver(&PushBody::new("p3", "summary")).await;
    assert_ack(&unknown, VerdictReason::UnknownStage);
    assert_abandoned(&unknown);

    assert_eq!(stt.call_count(), 0);
    assert!(harness.enqueuer.is_empty());
    assert_eq!(harness.events.payloads(event_types::PIPELINE_ABANDONED).len(), 4);
}

#[tokio::test]
async fn test_route_stage_mismatch_is_malformed() {
    let (stt, smart) = speech_executors();
    let harness = TestHarness::new(speech_registry(&stt, &smart), PolicyTable::default());

    let body = PushBody::new("p4", "smart").to_bytes();
    let verdict = harness
        .coordinator
        .handle(Some(&StageId::stt()), &body)
        .await;
    assert_ack(&verdict, VerdictReason::MalformedEnvelope);
    assert_eq!(stt.call_count(), 0);
}

#[tokio::test]
async fn test_terminal_failure_is_not_retried() {
    let harness = TestHarness::new(
        StageRegistry::new().with(Arc::new(FailingExecutor::fatal(
            StageId::stt(),
            "unsupported codec",
        ))),
        PolicyTable::default(),
    );

    let verdict = harness.deliver(&PushBody::new("p5", "stt")).await;
    assert_ack(&verdict, VerdictReason::NonRetryable);
    assert!(verdict.detail.as_deref().unwrap().contains("unsupported codec"));
}

#[tokio::test]
async fn test_restart_mode_reenqueues_first_stage() {
    let (stt, _) = speech_executors();
    let smart = Arc::new(FailingExecutor::transient(StageId::smart(), "llm overloaded"));
    let policies = PolicyTable::default().with_stage(
        StageId::smart(),
        RetryPolicy::default().with_mode(RetryMode::RestartPipeline),
    );
    let harness = TestHarness::new(StageRegistry::new().with(stt).with(smart), policies);

    let verdict = harness
        .deliver(&PushBody::new("p6", "smart").with_attempt(4))
        .await;
    assert_ack(&verdict, VerdictReason::Restarted);
    assert_eq!(verdict.follow_up, Some(FollowUp::Restart(StageId::stt())));

    let published = harness.enqueuer.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].stage(), Some("stt"));
    assert_eq!(published[0].attributes.get(ATTR_RESTARTS).unwrap(), "1");
    assert_eq!(harness.events.payloads(event_types::PIPELINE_RESTARTED).len(), 1);

    // Restarts count against the attempt budget in this mode.
    let verdict = harness
        .deliver(&PushBody::new("p6", "smart").with_restarts(2))
        .await;
    assert_ack(&verdict, VerdictReason::Exhausted);
}

#[tokio::test]
async fn test_restart_mode_without_layout_exhausts_by_delivery() {
    let enqueuer = Arc::new(InMemoryEnqueuer::new());
    let registry = StageRegistry::new().with(Arc::new(FailingExecutor::transient(
        StageId::smart(),
        "llm overloaded",
    )));
    let coordinator = PushCoordinator::builder(registry, enqueuer.clone())
        .policies(PolicyTable::new(
            RetryPolicy::default()
                .with_mode(RetryMode::RestartPipeline)
                .with_max_attempts(2),
        ))
        .event_sink(Arc::new(CollectingEventSink::new()))
        .build();

    // No layout means no first stage to restart from, so the stage is retried.
    let first = coordinator
        .handle(None, &PushBody::new("p6b", "smart").to_bytes())
        .await;
    assert_nack_within(&first, Duration::from_secs(1), Duration::from_secs(3));
    assert_eq!(first.reason, VerdictReason::Retry);

    let second = coordinator
        .handle(None, &PushBody::new("p6b", "smart").with_attempt(2).to_bytes())
        .await;
    assert_ack(&second, VerdictReason::Exhausted);
    assert!(enqueuer.is_empty());
}

#[tokio::test]
async fn test_enqueue_failure_nacks_the_stage() {
    let mut enqueuer = MockStageEnqueuer::new();
    enqueuer
        .expect_enqueue()
        .times(1)
        .returning(|_| Err(EnqueueError::Transport("connection reset".to_string())));

    let (stt, smart) = speech_executors();
    let registry = speech_registry(&stt, &smart);
    let coordinator = PushCoordinator::builder(registry, Arc::new(enqueuer))
        .layout(PipelineLayout::speech())
        .event_sink(Arc::new(CollectingEventSink::new()))
        .build();

    let body = PushBody::new("p7", "stt").to_bytes();
    let verdict = coordinator.handle(None, &body).await;
    assert_nack_within(&verdict, Duration::from_secs(1), Duration::from_secs(3));
    assert_eq!(verdict.reason, VerdictReason::EnqueueFailed);
    assert!(verdict.follow_up.is_none());
}

#[tokio::test]
async fn test_enqueue_failure_at_budget_exhausts() {
    let mut enqueuer = MockStageEnqueuer::new();
    enqueuer
        .expect_enqueue()
        .times(1)
        .returning(|_| Err(EnqueueError::Transport("connection reset".to_string())));

    let (stt, smart) = speech_executors();
    let events = Arc::new(CollectingEventSink::new());
    let coordinator = PushCoordinator::builder(speech_registry(&stt, &smart), Arc::new(enqueuer))
        .layout(PipelineLayout::speech())
        .policies(PolicyTable::new(RetryPolicy::default().with_max_attempts(3)))
        .event_sink(events.clone())
        .build();

    let body = PushBody::new("p7b", "stt").with_attempt(3).to_bytes();
    let verdict = coordinator.handle(None, &body).await;
    assert_ack(&verdict, VerdictReason::Exhausted);
    assert!(verdict.detail.as_deref().unwrap().contains("connection reset"));
    assert_eq!(events.payloads(event_types::PIPELINE_ABANDONED).len(), 1);
    assert!(events.payloads(event_types::PIPELINE_ADVANCED).is_empty());
}

#[tokio::test]
async fn test_enqueue_without_route_abandons_run() {
    let mut enqueuer = MockStageEnqueuer::new();
    enqueuer
        .expect_enqueue()
        .times(1)
        .returning(|_| Err(EnqueueError::NoRoute("smart".to_string())));

    let (stt, smart) = speech_executors();
    let events = Arc::new(CollectingEventSink::new());
    let coordinator = PushCoordinator::builder(speech_registry(&stt, &smart), Arc::new(enqueuer))
        .layout(PipelineLayout::speech())
        .event_sink(events.clone())
        .build();

    // Redelivery would reach the same missing route, so the first attempt ends the run.
    let body = PushBody::new("p7c", "stt").to_bytes();
    let verdict = coordinator.handle(None, &body).await;
    assert_ack(&verdict, VerdictReason::Unroutable);
    assert!(verdict.follow_up.is_none());
    assert!(verdict.detail.as_deref().unwrap().contains("smart"));
    assert_eq!(events.payloads(event_types::PIPELINE_ABANDONED).len(), 1);
}

#[tokio::test]
async fn test_deadline_and_panic_are_retryable() {
    let policies = PolicyTable::default().with_stage(
        StageId::smart(),
        RetryPolicy::default().with_execution_timeout(Duration::from_millis(50)),
    );
    let harness = TestHarness::new(
        StageRegistry::new()
            .with(Arc::new(PanickingExecutor::new(StageId::stt(), "index out of bounds")))
            .with(Arc::new(SlowExecutor::new(StageId::smart(), 1_000))),
        policies,
    );

    let panicked = harness.deliver(&PushBody::new("p8", "stt")).await;
    assert_nack_within(&panicked, Duration::from_secs(1), Duration::from_secs(3));

    let slow = harness.deliver(&PushBody::new("p8", "smart")).await;
    assert_nack_within(&slow, Duration::from_secs(1), Duration::from_secs(3));
    assert!(slow.detail.as_deref().unwrap().contains("execution budget"));
}

#[tokio::test]
async fn test_acked_deliveries_are_reported_upstream() {
    let mut reporter = MockUpstreamReporter::new();
    reporter
        .expect_report()
        .withf(|report| {
            report.pipeline_id == "p9"
                && report.branch == "stt"
                && report.reason == VerdictReason::Completed
                && report.context.get("note_id") == Some(&serde_json::json!("n-9"))
        })
        .times(1)
        .returning(|_| Ok(()));

    let stt = Arc::new(MockExecutor::new(StageId::stt()).with_outcome(
        StageOutcome::success().with_output(serde_json::json!({"transcript": "hello"})),
    ));
    let registry = StageRegistry::new().with(stt);
    let coordinator = PushCoordinator::builder(registry, Arc::new(InMemoryEnqueuer::new()))
        .reporter(Arc::new(reporter))
        .event_sink(Arc::new(CollectingEventSink::new()))
        .build();

    let body = PushBody::new("p9", "stt")
        .with_payload(serde_json::json!({"pipeline_id": "p9", "data": {"note_id": "n-9"}}))
        .to_bytes();
    let verdict = coordinator.handle(None, &body).await;
    assert_ack(&verdict, VerdictReason::Completed);

    // Rejected deliveries are not reported.
    let failing = PushBody::new("p9", "stt").with_attribute(ATTR_STAGE, "smart");
    let verdict = coordinator.handle(None, &failing.to_bytes()).await;
    assert_ack(&verdict, VerdictReason::UnknownStage);

    coordinator.drain_reports().await;
}

#[tokio::test]
async fn test_upstream_failure_does_not_change_verdict() {
    let mut reporter = MockUpstreamReporter::new();
    reporter.expect_report().times(1).returning(|_| {
        Err(UpstreamError::Rejected {
            status: 500,
            body: "boom".to_string(),
        })
    });

    let registry = StageRegistry::new().with(Arc::new(MockExecutor::new(StageId::stt())));
    let coordinator = PushCoordinator::builder(registry, Arc::new(InMemoryEnqueuer::new()))
        .reporter(Arc::new(reporter))
        .event_sink(Arc::new(CollectingEventSink::new()))
        .build();

    let verdict = coordinator
        .handle(None, &PushBody::new("p10", "stt").to_bytes())
        .await;
    assert_ack(&verdict, VerdictReason::Completed);
    coordinator.drain_reports().await;
}

#[derive(Debug)]
struct PanickingReporter;

#[async_trait::async_trait]
impl UpstreamReporter for PanickingReporter {
    async fn report(&self, _output: &ProcessedOutput) -> Result<(), UpstreamError> {
        panic!("reporter bug");
    }
}

#[tokio::test]
async fn test_panicked_report_task_is_drained() {
    let registry = StageRegistry::new().with(Arc::new(MockExecutor::new(StageId::stt())));
    let coordinator = PushCoordinator::builder(registry, Arc::new(InMemoryEnqueuer::new()))
        .reporter(Arc::new(PanickingReporter))
        .event_sink(Arc::new(CollectingEventSink::new()))
        .build();

    let verdict = coordinator
        .handle(None, &PushBody::new("p11", "stt").to_bytes())
        .await;
    assert_ack(&verdict, VerdictReason::Completed);
    coordinator.drain_reports().await;

    let verdict = coordinator
        .handle(None, &PushBody::new("p12", "stt").to_bytes())
        .await;
    assert_ack(&verdict, VerdictReason::Completed);
    coordinator.drain_reports().await;
}

fn http_harness() -> (TestHarness, axum::Router) {
    let (stt, smart) = speech_executors();
    smart.set_outcome(StageOutcome::retryable("llm overloaded"));
    let harness = TestHarness::new(speech_registry(&stt, &smart), PolicyTable::default());
    let mut aliases = BTreeMap::new();
    aliases.insert("/stt-branch-subscription".to_string(), StageId::stt());
    let app = router(harness.coordinator.clone(), &aliases);
    (harness, app)
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_http_health() {
    let (_harness, app) = http_harness();
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn test_http_ack_and_nack() {
    let (harness, app) = http_harness();

    let request = Request::builder()
        .method("POST")
        .uri("/push/stt")
        .body(Body::from(PushBody::new("h1", "stt").to_bytes()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["action"], "ack");
    assert_eq!(body["reason"], "advanced");
    assert_eq!(harness.enqueuer.len(), 1);

    let request = Request::builder()
        .method("POST")
        .uri("/push/smart")
        .body(Body::from(PushBody::new("h1", "smart").to_bytes()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "1");
    let body = read_json(response).await;
    assert_eq!(body["action"], "nack");
    assert_eq!(body["retry_after_ms"], 1000);
}

#[tokio::test]
async fn test_http_alias_binds_stage() {
    let (harness, app) = http_harness();

    let body = PushBody::new("h2", "stt").without_attribute(ATTR_STAGE);
    let request = Request::builder()
        .method("POST")
        .uri("/stt-branch-subscription")
        .body(Body::from(body.to_bytes()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["reason"], "advanced");
    assert_eq!(harness.published_stages(), vec![StageId::smart()]);
}

#[tokio::test]
async fn test_http_invalid_stage_segment_is_acked() {
    let (harness, app) = http_harness();

    let request = Request::builder()
        .method("POST")
        .uri("/push/9lives")
        .body(Body::from(PushBody::new("h3", "stt").to_bytes()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["reason"], "malformed_envelope");
    assert!(harness.enqueuer.is_empty());
}
