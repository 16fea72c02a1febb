//! Observability utilities.

mod delivery_events;
mod logging;

pub use delivery_events::DeliveryEventEmitter;
pub use logging::{init_logging, LogFormat, SpanTimer};
