//! Event sink trait and implementations.

use std::fmt::Debug;
use tracing::{info, warn};

/// Trait for sinks that receive coordinator events.
///
/// The coordinator emits one `delivery.decided` event per delivery plus
/// run transition events. Sinks must never fail the delivery.
pub trait EventSink: Send + Sync + Debug {
    /// Emits an event without blocking.
    ///
    /// Must never panic. Errors are logged and suppressed.
    ///
    /// # Arguments
    ///
    /// * `event_type` - The type of event (e.g., "delivery.decided")
    /// * `data` - Optional event data
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>);
}

/// An event sink that writes events to the tracing subscriber.
///
/// Abandonment events are logged at `warn` so they surface to operators;
/// everything else at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        let event_data = data.as_ref().map(ToString::to_string).unwrap_or_default();

        if event_type == super::event_types::PIPELINE_ABANDONED {
            warn!(event_type = %event_type, event_data = %event_data, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = %event_data, "Event: {}", event_type);
        }
    }
}

/// A collecting event sink for tests and local inspection.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<serde_json::Value>)>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Returns the data of every event with exactly this type.
    #[must_use]
    pub fn payloads(&self, event_type: &str) -> Vec<serde_json::Value> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t == event_type)
            .filter_map(|(_, data)| data.clone())
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}
