//! Decoding of push deliveries into work items.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;

use super::push::{
    PushEnvelope, ATTR_ATTEMPT, ATTR_CONTENT_TYPE, ATTR_PIPELINE_ID, ATTR_RESTARTS, ATTR_STAGE,
    ATTR_VERSION, RESERVED_ATTRIBUTES,
};
use crate::core::{Payload, StageId, WorkItem, CONTENT_TYPE_BYTES, CONTENT_TYPE_JSON};
use crate::errors::EnvelopeError;

/// Payload keys searched for the pipeline id when no attribute carries it.
const PIPELINE_ID_KEYS: [&str; 2] = ["pipeline_id", "job_id"];

/// Parses push deliveries into [`WorkItem`]s.
///
/// Every failure is an [`EnvelopeError`]; none of them is retryable since
/// the same bytes will fail the same way on redelivery.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeDecoder {
    known_stages: BTreeSet<StageId>,
}

impl EnvelopeDecoder {
    /// Creates a decoder accepting the given stages.
    pub fn new(known_stages: impl IntoIterator<Item = StageId>) -> Self {
        Self {
            known_stages: known_stages.into_iter().collect(),
        }
    }

    /// Returns true if the stage is accepted.
    #[must_use]
    pub fn knows(&self, stage: &StageId) -> bool {
        self.known_stages.contains(stage)
    }

    /// Decodes a raw request body.
    ///
    /// `route_stage` is the stage bound to the endpoint that received the
    /// delivery, if the endpoint is stage specific.
    pub fn decode(
        &self,
        body: &[u8],
        route_stage: Option<&StageId>,
    ) -> Result<WorkItem, EnvelopeError> {
        let envelope: PushEnvelope = serde_json::from_slice(body)
            .map_err(|e| EnvelopeError::malformed(format!("invalid push envelope: {e}")))?;
        self.decode_envelope(envelope, route_stage)
    }

    /// Decodes an already parsed envelope.
    pub fn decode_envelope(
        &self,
        envelope: PushEnvelope,
        route_stage: Option<&StageId>,
    ) -> Result<WorkItem, EnvelopeError> {
        let message = envelope.message;
        let attributes = &message.attributes;

        let stage = resolve_stage(attributes.get(ATTR_STAGE), route_stage)?;
        let payload = decode_payload(
            message.data.as_deref(),
            attributes.get(ATTR_CONTENT_TYPE).map(String::as_str),
        )?;
        let pipeline_id = resolve_pipeline_id(attributes.get(ATTR_PIPELINE_ID), &payload)?;
        let delivery_attempt =
            resolve_attempt(envelope.delivery_attempt, attributes.get(ATTR_ATTEMPT))?;
        let restarts = match attributes.get(ATTR_RESTARTS) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                EnvelopeError::malformed(format!("invalid restarts attribute '{raw}'"))
            })?,
            None => 0,
        };
        let enqueue_time = match message.published_at() {
            Some(raw) => DateTime::parse_from_rfc3339(raw)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| EnvelopeError::malformed(format!("invalid publish time '{raw}': {e}")))?,
            None => Utc::now(),
        };

        if !self.knows(&stage) {
            return Err(EnvelopeError::unknown_stage(stage.as_str()));
        }

        let passthrough = attributes
            .iter()
            .filter(|(k, _)| !RESERVED_ATTRIBUTES.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(WorkItem {
            pipeline_id,
            stage,
            payload,
            delivery_attempt,
            enqueue_time,
            message_id: message.id().map(str::to_string),
            version: attributes.get(ATTR_VERSION).cloned(),
            restarts,
            attributes: passthrough,
        })
    }
}

fn resolve_stage(
    attribute: Option<&String>,
    route_stage: Option<&StageId>,
) -> Result<StageId, EnvelopeError> {
    match (attribute, route_stage) {
        (Some(raw), Some(route)) => {
            let stage = StageId::parse(raw)?;
            if &stage == route {
                Ok(stage)
            } else {
                Err(EnvelopeError::malformed(format!(
                    "stage attribute '{stage}' does not match endpoint stage '{route}'"
                )))
            }
        }
        (Some(raw), None) => StageId::parse(raw),
        (None, Some(route)) => Ok(route.clone()),
        (None, None) => Err(EnvelopeError::malformed("delivery does not name a stage")),
    }
}

fn decode_payload(data: Option<&str>, content_type: Option<&str>) -> Result<Payload, EnvelopeError> {
    let data = data
        .filter(|d| !d.is_empty())
        .ok_or_else(|| EnvelopeError::malformed("message data is missing"))?;
    let bytes = STANDARD
        .decode(data)
        .map_err(|e| EnvelopeError::malformed(format!("message data is not valid base64: {e}")))?;

    // Parameters such as `; charset=utf-8` do not change the decoding.
    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map_or(CONTENT_TYPE_JSON, str::trim);

    if media_type.eq_ignore_ascii_case(CONTENT_TYPE_JSON) {
        serde_json::from_slice(&bytes)
            .map(Payload::Json)
            .map_err(|e| EnvelopeError::malformed(format!("payload is not valid JSON: {e}")))
    } else if media_type.eq_ignore_ascii_case(CONTENT_TYPE_BYTES) {
        Ok(Payload::Bytes(bytes))
    } else {
        Err(EnvelopeError::malformed(format!(
            "unsupported content type '{media_type}'"
        )))
    }
}

fn resolve_pipeline_id(
    attribute: Option<&String>,
    payload: &Payload,
) -> Result<String, EnvelopeError> {
    let from_payload = || {
        let doc = payload.as_json()?;
        let scopes = [Some(doc), doc.get("data")];
        scopes.into_iter().flatten().find_map(|scope| {
            PIPELINE_ID_KEYS.iter().find_map(|key| match scope.get(*key)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        })
    };

    let id = attribute.cloned().or_else(from_payload).unwrap_or_default();
    let id = id.trim();
    if id.is_empty() {
        Err(EnvelopeError::malformed("pipeline_id is missing or empty"))
    } else {
        Ok(id.to_string())
    }
}

fn resolve_attempt(
    delivery_attempt: Option<i64>,
    attribute: Option<&String>,
) -> Result<u32, EnvelopeError> {
    let raw = match (delivery_attempt, attribute) {
        (Some(n), _) => n,
        (None, Some(s)) => s
            .trim()
            .parse::<i64>()
            .map_err(|_| EnvelopeError::malformed(format!("invalid attempt attribute '{s}'")))?,
        (None, None) => 1,
    };
    u32::try_from(raw)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| EnvelopeError::malformed(format!("delivery attempt must be >= 1, got {raw}")))
}
