//! The push delivery coordinator and its HTTP surface.
//!
//! [`PushCoordinator::handle`] is the whole per-delivery flow: decode,
//! dispatch, decide, enqueue the follow-up, emit events and report
//! upstream. It always returns a verdict; the transport never sees an
//! error.

mod http;
#[cfg(test)]
mod integration_tests;

pub use http::{router, VerdictResponse};

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::{StageId, Verdict, WorkItem};
use crate::decision::{decide, decide_enqueue_failure, decide_rejected};
use crate::dispatch::{Dispatcher, PipelineLayout};
use crate::enqueue::StageEnqueuer;
use crate::envelope::{EnvelopeDecoder, OutboundMessage};
use crate::errors::{EnqueueError, EnvelopeError, ErrorKind};
use crate::events::{EventSink, LoggingEventSink};
use crate::executor::StageRegistry;
use crate::observability::{DeliveryEventEmitter, SpanTimer};
use crate::retry::PolicyTable;
use crate::upstream::{NoOpUpstreamReporter, ProcessedOutput, UpstreamReporter};

/// Default execution ceiling: a 10s ack deadline minus a 1s margin.
pub const DEFAULT_EXECUTION_CEILING: Duration = Duration::from_secs(9);

/// Decides every push delivery.
///
/// Holds configuration only; deliveries share nothing mutable apart from
/// the list of in-flight upstream reports.
pub struct PushCoordinator {
    decoder: EnvelopeDecoder,
    dispatcher: Dispatcher,
    policies: PolicyTable,
    execution_ceiling: Duration,
    enqueuer: Arc<dyn StageEnqueuer>,
    reporter: Arc<dyn UpstreamReporter>,
    events: DeliveryEventEmitter,
    pending_reports: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for PushCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushCoordinator")
            .field("stages", &self.dispatcher.registry().stages())
            .field("layout", &self.dispatcher.layout())
            .field("execution_ceiling", &self.execution_ceiling)
            .finish_non_exhaustive()
    }
}

impl PushCoordinator {
    /// Starts building a coordinator over a registry.
    ///
    /// Any stage may name a next stage, so an enqueuer is always needed.
    #[must_use]
    pub fn builder(registry: StageRegistry, enqueuer: Arc<dyn StageEnqueuer>) -> CoordinatorBuilder {
        CoordinatorBuilder::new(registry, enqueuer)
    }

    /// Returns the stages with a registered executor.
    #[must_use]
    pub fn stages(&self) -> Vec<StageId> {
        self.dispatcher.registry().stages()
    }

    /// Handles one delivery and returns its verdict.
    ///
    /// `route_stage` is the stage bound to the receiving endpoint, if any.
    pub async fn handle(&self, route_stage: Option<&StageId>, body: &[u8]) -> Verdict {
        let timer = SpanTimer::start("delivery");

        let item = match self.decoder.decode(body, route_stage) {
            Ok(item) => item,
            Err(err) => return self.finish_rejected(route_stage, &err, &timer),
        };

        let policy = self.policies.for_stage(&item.stage);
        let budget = policy.execution_budget(self.execution_ceiling);
        let outcome = self.dispatcher.dispatch(&item, budget).await;
        let mut verdict = decide(&outcome, policy.effective_attempt(&item), policy);

        if let Some(follow_up) = verdict.follow_up.clone() {
            let next = follow_up.build(&item);
            let message = OutboundMessage::from_work_item(&next);
            match self.enqueuer.enqueue(&message).await {
                Ok(message_id) => {
                    tracing::info!(
                        pipeline_id = %item.pipeline_id,
                        from = %item.stage,
                        to = %next.stage,
                        restarts = next.restarts,
                        message_id = %message_id,
                        "Enqueued follow-up stage"
                    );
                }
                Err(err @ EnqueueError::NoRoute(_)) => {
                    tracing::error!(
                        pipeline_id = %item.pipeline_id,
                        stage = %item.stage,
                        to = %next.stage,
                        kind = %ErrorKind::EnqueueFailed,
                        error = %err,
                        page = true,
                        "Follow-up stage has no publish route"
                    );
                    verdict = decide_enqueue_failure(&err, item.delivery_attempt, policy);
                }
                Err(err) => {
                    tracing::error!(
                        pipeline_id = %item.pipeline_id,
                        stage = %item.stage,
                        to = %next.stage,
                        kind = %ErrorKind::EnqueueFailed,
                        error = %err,
                        "Failed to enqueue follow-up stage"
                    );
                    verdict = decide_enqueue_failure(&err, item.delivery_attempt, policy);
                }
            }
        }

        log_verdict(&item, &verdict);
        let elapsed = timer.finish();
        self.events.emit_decided(Some(&item), None, &verdict, elapsed);
        self.events.emit_transition(Some(&item), None, &verdict);

        if verdict.is_ack() {
            self.spawn_report(ProcessedOutput::build(&item, &outcome, &verdict));
        }

        verdict
    }

    /// Produces the verdict for a delivery rejected before decoding.
    pub fn reject(&self, route_stage: Option<&StageId>, err: &EnvelopeError) -> Verdict {
        let timer = SpanTimer::start("delivery");
        self.finish_rejected(route_stage, err, &timer)
    }

    /// Waits for every in-flight upstream report.
    ///
    /// A report task that panicked is logged and skipped.
    pub async fn drain_reports(&self) {
        let handles: Vec<_> = std::mem::take(&mut *self.pending_reports.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "Upstream report task failed");
            }
        }
    }

    fn finish_rejected(
        &self,
        route_stage: Option<&StageId>,
        err: &EnvelopeError,
        timer: &SpanTimer,
    ) -> Verdict {
        match err {
            EnvelopeError::UnknownStage { stage } => tracing::error!(
                kind = %err.kind(),
                stage = %stage,
                route = ?route_stage.map(StageId::as_str),
                page = true,
                "Delivery names a stage with no executor"
            ),
            EnvelopeError::Malformed { reason } => tracing::error!(
                kind = %err.kind(),
                route = ?route_stage.map(StageId::as_str),
                reason = %reason,
                "Dropping malformed delivery"
            ),
        }

        let verdict = decide_rejected(err);
        self.events
            .emit_decided(None, route_stage, &verdict, timer.elapsed_ms());
        self.events.emit_transition(None, route_stage, &verdict);
        verdict
    }

    fn spawn_report(&self, report: ProcessedOutput) {
        let reporter = Arc::clone(&self.reporter);
        let handle = tokio::spawn(async move {
            if let Err(err) = reporter.report(&report).await {
                tracing::warn!(
                    pipeline_id = %report.pipeline_id,
                    branch = %report.branch,
                    error = %err,
                    "Upstream report failed"
                );
            }
        });

        let mut pending = self.pending_reports.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }
}

fn log_verdict(item: &WorkItem, verdict: &Verdict) {
    if verdict.is_nack() {
        tracing::warn!(
            pipeline_id = %item.pipeline_id,
            stage = %item.stage,
            attempt = item.delivery_attempt,
            reason = %verdict.reason,
            retry_after_ms = verdict.retry_after_ms(),
            detail = verdict.detail.as_deref(),
            "NACK"
        );
    } else if verdict.reason.is_abandonment() {
        tracing::error!(
            pipeline_id = %item.pipeline_id,
            stage = %item.stage,
            attempt = item.delivery_attempt,
            reason = %verdict.reason,
            detail = verdict.detail.as_deref(),
            "ACK, pipeline run abandoned"
        );
    } else {
        tracing::info!(
            pipeline_id = %item.pipeline_id,
            stage = %item.stage,
            attempt = item.delivery_attempt,
            reason = %verdict.reason,
            "ACK"
        );
    }
}

/// Builder for [`PushCoordinator`].
pub struct CoordinatorBuilder {
    registry: StageRegistry,
    layout: Option<PipelineLayout>,
    policies: PolicyTable,
    execution_ceiling: Duration,
    enqueuer: Arc<dyn StageEnqueuer>,
    reporter: Option<Arc<dyn UpstreamReporter>>,
    sink: Option<Arc<dyn EventSink>>,
}

impl CoordinatorBuilder {
    /// Creates a builder with default policies and no layout.
    #[must_use]
    pub fn new(registry: StageRegistry, enqueuer: Arc<dyn StageEnqueuer>) -> Self {
        Self {
            registry,
            layout: None,
            policies: PolicyTable::default(),
            execution_ceiling: DEFAULT_EXECUTION_CEILING,
            enqueuer,
            reporter: None,
            sink: None,
        }
    }

    /// Sets the pipeline layout.
    #[must_use]
    pub fn layout(mut self, layout: PipelineLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Sets the retry policies.
    #[must_use]
    pub fn policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    /// Sets the longest any stage may run.
    #[must_use]
    pub fn execution_ceiling(mut self, ceiling: Duration) -> Self {
        self.execution_ceiling = ceiling;
        self
    }

    /// Sets the upstream reporter. Defaults to [`NoOpUpstreamReporter`].
    #[must_use]
    pub fn reporter(mut self, reporter: Arc<dyn UpstreamReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Sets the event sink. Defaults to [`LoggingEventSink`].
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Builds the coordinator.
    #[must_use]
    pub fn build(self) -> PushCoordinator {
        let mut policies = self.policies;
        let mut dispatcher = Dispatcher::new(self.registry.clone());

        if let Some(layout) = self.layout {
            for stage in layout.stages() {
                if !self.registry.contains(stage) {
                    tracing::warn!(stage = %stage, "Pipeline layout names a stage with no executor");
                }
            }
            policies.set_restart_stage(layout.first());
            dispatcher = dispatcher.with_layout(layout);
        }

        PushCoordinator {
            decoder: EnvelopeDecoder::new(self.registry.stages()),
            dispatcher,
            policies,
            execution_ceiling: self.execution_ceiling,
            enqueuer: self.enqueuer,
            reporter: self
                .reporter
                .unwrap_or_else(|| Arc::new(NoOpUpstreamReporter)),
            events: DeliveryEventEmitter::new(
                self.sink
                    .unwrap_or_else(|| Arc::new(LoggingEventSink)),
            ),
            pending_reports: Mutex::new(Vec::new()),
        }
    }
}

impl fmt::Debug for CoordinatorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinatorBuilder")
            .field("stages", &self.registry.stages())
            .field("layout", &self.layout)
            .field("execution_ceiling", &self.execution_ceiling)
            .finish_non_exhaustive()
    }
}
