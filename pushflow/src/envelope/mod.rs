//! Push envelope decoding and outbound message encoding.
//!
//! Inbound deliveries use the broker's push format: a JSON body wrapping a
//! base64 `data` field plus string attributes. Outbound follow-up messages
//! use the same attribute conventions so they decode symmetrically.

mod decoder;
mod push;

pub use decoder::EnvelopeDecoder;
pub use push::{
    OutboundMessage, PushEnvelope, PushMessage, ATTR_ATTEMPT, ATTR_CONTENT_TYPE,
    ATTR_PIPELINE_ID, ATTR_RESTARTS, ATTR_STAGE, ATTR_VERSION,
};
