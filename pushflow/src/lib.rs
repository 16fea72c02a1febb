//! # Pushflow
//!
//! A coordinator for multi-stage pipelines driven by push deliveries from
//! a message broker.
//!
//! Every delivery names one stage of one pipeline run. Pushflow decodes it,
//! runs the stage's executor within the acknowledgement budget and answers
//! the broker with a verdict:
//!
//! - **ACK** when the delivery is finished with: the stage succeeded (and
//!   the next stage was enqueued), or it failed in a way redelivery cannot
//!   fix, or the retry budget is spent.
//! - **NACK** with a backoff hint when a redelivery of the same stage may
//!   succeed.
//!
//! The broker owns redelivery and attempt counting. Pushflow holds no state
//! between deliveries.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use pushflow::prelude::*;
//!
//! let registry = StageRegistry::new()
//!     .with(Arc::new(HttpExecutor::new(StageId::stt(), &stt_endpoint)?))
//!     .with(Arc::new(HttpExecutor::new(StageId::smart(), &smart_endpoint)?));
//!
//! let publisher = Arc::new(HttpPublisher::new(&publisher_config)?);
//! let coordinator = PushCoordinator::builder(registry, publisher)
//!     .layout(PipelineLayout::speech())
//!     .policies(PolicyTable::default())
//!     .build();
//!
//! let verdict = coordinator.handle(None, &body).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod core;
pub mod decision;
pub mod dispatch;
pub mod enqueue;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod executor;
pub mod observability;
pub mod retry;
pub mod service;
pub mod testing;
pub mod upstream;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::ServiceConfig;
    pub use crate::core::{
        AckAction, FollowUp, OutcomeStatus, Payload, StageId, StageOutcome, Verdict,
        VerdictReason, WorkItem,
    };
    pub use crate::decision::{decide, decide_enqueue_failure, decide_rejected};
    pub use crate::dispatch::{Dispatcher, PipelineLayout};
    pub use crate::enqueue::{InMemoryEnqueuer, PublisherConfig, StageEnqueuer};
    pub use crate::envelope::{EnvelopeDecoder, OutboundMessage};
    pub use crate::errors::{
        ConfigError, EnqueueError, EnvelopeError, ErrorKind, StageExecutionError, UpstreamError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink};
    pub use crate::executor::{EndpointConfig, ExecutionResult, FnExecutor, StageExecutor, StageRegistry};
    pub use crate::retry::{BackoffPolicy, BackoffStrategy, PolicyTable, RetryMode, RetryPolicy, RunState};
    pub use crate::service::{router, PushCoordinator};
    pub use crate::upstream::{NoOpUpstreamReporter, ProcessedOutput, UpstreamReporter};

    #[cfg(feature = "http-client")]
    pub use crate::enqueue::HttpPublisher;
    #[cfg(feature = "http-client")]
    pub use crate::executor::HttpExecutor;
    #[cfg(feature = "http-client")]
    pub use crate::upstream::HttpUpstreamReporter;
}
