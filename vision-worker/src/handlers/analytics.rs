use axum::extract::{Query, State};
use axum::Json;
use chrono::Utc;
use vision_common::analytics::AnalyticsSnapshot;

use super::app::AppState;
use super::events::LimitParams;

const DEFAULT_HISTORY_LIMIT: usize = 100;

/// The latest snapshot, or an all-zero one before the first batch.
pub async fn current(State(state): State<AppState>) -> Json<AnalyticsSnapshot> {
    Json(
        state
            .analytics
            .current()
            .unwrap_or_else(|| AnalyticsSnapshot::empty(Utc::now())),
    )
}

pub async fn history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Vec<AnalyticsSnapshot>> {
    Json(
        state
            .analytics
            .history(params.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)),
    )
}
