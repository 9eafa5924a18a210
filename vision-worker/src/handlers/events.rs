use std::time::Instant;

use axum::extract::{Query, State};
use axum::{http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use vision_common::event::{deserialize_payload, EventKind, ProcessingEvent};
use vision_common::queue::EnqueuedEvent;

use super::app::AppState;

const DEFAULT_RECENT_LIMIT: usize = 100;

#[derive(Serialize, Deserialize)]
pub struct EventPostResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// The body of a request made to enqueue a `ProcessingEvent`.
#[derive(Deserialize, Debug)]
pub struct EventPostRequestBody {
    #[serde(rename = "type")]
    kind: EventKind,
    /// The image, base64 encoded.
    #[serde(deserialize_with = "deserialize_payload")]
    data: Vec<u8>,
}

pub async fn post(
    State(state): State<AppState>,
    Json(body): Json<EventPostRequestBody>,
) -> Result<Json<EventPostResponse>, (StatusCode, Json<EventPostResponse>)> {
    let event = ProcessingEvent::new(body.kind, body.data);
    debug!(
        "received {} event {} ({} bytes)",
        event.kind,
        event.id,
        event.payload.len()
    );

    let start_time = Instant::now();

    state.queue.push(event).await.map_err(|error| {
        error!("failed to enqueue event: {}", error);
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(EventPostResponse {
                error: Some(error.to_string()),
            }),
        )
    })?;

    metrics::histogram!("vision_enqueue_duration_seconds")
        .record(start_time.elapsed().as_secs_f64());

    Ok(Json(EventPostResponse { error: None }))
}

#[derive(Deserialize, Debug)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

/// Events recently enqueued by this process, newest first. Payloads are not included.
pub async fn recent(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<EnqueuedEvent>> {
    Json(
        state
            .queue
            .recent(params.limit.unwrap_or(DEFAULT_RECENT_LIMIT)),
    )
}
