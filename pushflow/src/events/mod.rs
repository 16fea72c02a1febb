//! Event sink system for observability.
//!
//! Every delivery decision and run transition is published through an
//! [`EventSink`], so operators can follow a pipeline run without the core
//! keeping any state of its own.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink};

/// Event type names emitted by the coordinator.
pub mod event_types {
    /// One per decided delivery.
    pub const DELIVERY_DECIDED: &str = "delivery.decided";
    /// A run moved on to its next stage.
    pub const PIPELINE_ADVANCED: &str = "pipeline.advanced";
    /// A run was re-enqueued from its first stage.
    pub const PIPELINE_RESTARTED: &str = "pipeline.restarted";
    /// A run finished its last stage.
    pub const PIPELINE_COMPLETED: &str = "pipeline.completed";
    /// A run stopped without completing.
    pub const PIPELINE_ABANDONED: &str = "pipeline.abandoned";
}
