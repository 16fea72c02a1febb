//! Axum surface for push deliveries.
//!
//! Routes:
//! - `GET /health` answers `{"status":"ok"}`.
//! - `POST /push/:stage` handles a delivery for the named stage.
//! - `POST <alias>` handles a delivery for the stage bound to the alias.
//!
//! ACK maps to `200`, NACK to `503` with a `Retry-After` header.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::Instrument;

use super::PushCoordinator;
use crate::core::{StageId, Verdict};

/// A verdict rendered as an HTTP response.
#[derive(Debug, Clone)]
pub struct VerdictResponse(pub Verdict);

impl VerdictResponse {
    /// Status code for the verdict.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        if self.0.is_ack() {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        }
    }

    /// `Retry-After` value in whole seconds, rounded up.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.0.retry_after_ms().map(|ms| ms.div_ceil(1000))
    }
}

impl IntoResponse for VerdictResponse {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after_secs();
        let mut response = (status, Json(self.0.to_json())).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Builds the router.
///
/// `aliases` maps extra paths onto fixed stages.
pub fn router(coordinator: Arc<PushCoordinator>, aliases: &BTreeMap<String, StageId>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/push/:stage", post(push_to_stage));

    for (path, stage) in aliases {
        let stage = stage.clone();
        let route = path.clone();
        router = router.route(
            path,
            post(
                move |State(coordinator): State<Arc<PushCoordinator>>, body: Bytes| {
                    let stage = stage.clone();
                    let route = route.clone();
                    async move { deliver(&coordinator, &route, Some(stage), &body).await }
                },
            ),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(coordinator)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn push_to_stage(
    State(coordinator): State<Arc<PushCoordinator>>,
    Path(stage): Path<String>,
    body: Bytes,
) -> VerdictResponse {
    let route = format!("/push/{stage}");
    match StageId::parse(&stage) {
        Ok(stage) => deliver(&coordinator, &route, Some(stage), &body).await,
        Err(err) => {
            let span = tracing::info_span!("delivery", request_id = %uuid::Uuid::new_v4(), route = %route);
            VerdictResponse(span.in_scope(|| coordinator.reject(None, &err)))
        }
    }
}

async fn deliver(
    coordinator: &PushCoordinator,
    route: &str,
    stage: Option<StageId>,
    body: &[u8],
) -> VerdictResponse {
    let span = tracing::info_span!("delivery", request_id = %uuid::Uuid::new_v4(), route = %route);
    let verdict = coordinator
        .handle(stage.as_ref(), body)
        .instrument(span)
        .await;
    VerdictResponse(verdict)
}
