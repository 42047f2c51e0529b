use crate::error::{RelayError, UpstreamError};
use crate::frame::DataUrl;
use crate::upstream::AnalysisRequest;
use axum::{
    body::Body,
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

use super::phase::{PhaseTracker, RequestPhase};
use super::server::RelayState;

/// Body of `POST /api/analyze`
#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            RelayError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// Preconditions in order: credential, body shape, image presence, image format
fn validate_request(
    state: &RelayState,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> std::result::Result<AnalysisRequest, RelayError> {
    if !state.provider.is_configured() {
        return Err(RelayError::Misconfigured {
            details: "Upstream API key is not configured".to_string(),
        });
    }

    let Json(body) = payload.map_err(|e| RelayError::InvalidRequest {
        details: format!("Invalid request body: {}", e.body_text()),
    })?;

    let image = body
        .image
        .filter(|image| !image.trim().is_empty())
        .ok_or_else(|| RelayError::InvalidRequest {
            details: "No image provided".to_string(),
        })?;

    let image = DataUrl::parse(&image).map_err(|details| RelayError::InvalidRequest { details })?;
    if !image.is_image() {
        return Err(RelayError::InvalidRequest {
            details: format!("Expected an image, got {}", image.mime_type),
        });
    }

    Ok(AnalysisRequest {
        image,
        prompt: state.upstream.prompt.clone(),
        max_tokens: state.upstream.max_tokens,
        detail: state.upstream.image_detail.clone(),
    })
}

/// Handler for the analyze endpoint: one image in, streamed text out
pub async fn analyze_handler(
    State(state): State<RelayState>,
    payload: std::result::Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let request_id = Uuid::new_v4();
    let span = info_span!("analyze", %request_id);

    async move {
        let mut tracker = PhaseTracker::new(request_id, state.stats());
        tracker.advance(RequestPhase::Validating);

        let request = match validate_request(&state, payload) {
            Ok(request) => request,
            Err(e) => {
                tracker.reject(&e);
                return e.into_response();
            }
        };

        tracker.advance(RequestPhase::Upstreaming);

        let mut deltas = match state.provider.stream_completion(request).await {
            Ok(deltas) => deltas,
            Err(e) => {
                let e = RelayError::Upstream(e);
                tracker.reject(&e);
                return e.into_response();
            }
        };

        // Hold the response until upstream produced its first non-empty delta
        // so that a failure before any output is still a structured error.
        let first = loop {
            match deltas.next().await {
                Some(Ok(text)) if text.is_empty() => tracker.record_fragment(0),
                Some(Ok(text)) => break text,
                Some(Err(e)) => {
                    let e = RelayError::Upstream(e);
                    tracker.reject(&e);
                    return e.into_response();
                }
                None => {
                    let e = RelayError::Upstream(UpstreamError::Empty);
                    tracker.reject(&e);
                    return e.into_response();
                }
            }
        };

        tracker.advance(RequestPhase::Streaming);

        let body = async_stream::stream! {
            let mut tracker = tracker;
            let mut pending = Some(Ok(first));

            loop {
                let item = match pending.take() {
                    Some(item) => Some(item),
                    None => deltas.next().await,
                };

                match item {
                    Some(Ok(text)) => {
                        tracker.record_fragment(text.len());
                        // Zero-length fragments carry nothing on the wire
                        if !text.is_empty() {
                            yield Ok(Bytes::from(text));
                        }
                    }
                    Some(Err(e)) => {
                        tracker.fail(&e);
                        yield Err(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()));
                        break;
                    }
                    None => {
                        tracker.complete();
                        break;
                    }
                }
            }
        };

        debug!("Streaming analysis to client");

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
                (header::CACHE_CONTROL, "no-cache"),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
            ],
            Body::from_stream(body),
        )
            .into_response()
    }
    .instrument(span)
    .await
}

/// Handler for health check endpoint
pub async fn health_handler(State(state): State<RelayState>) -> impl IntoResponse {
    let health_info = serde_json::json!({
        "status": "healthy",
        "provider": state.provider.name(),
        "configured": state.provider.is_configured(),
        "stats": state.stats.snapshot(),
    });

    (StatusCode::OK, Json(health_info))
}
