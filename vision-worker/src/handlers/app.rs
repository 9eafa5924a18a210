use axum::extract::DefaultBodyLimit;
use axum::{routing, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::watch;
use vision_common::health::HealthRegistry;
use vision_common::metrics;
use vision_common::queue::EventQueue;

use super::{analytics, events, subscribe};
use crate::aggregator::AnalyticsReader;
use crate::notify::Notifier;

#[derive(Clone)]
pub struct AppState {
    pub queue: EventQueue,
    pub analytics: AnalyticsReader,
    pub notifier: Notifier,
    /// Flips to `true` when the server starts shutting down, ending open subscriptions.
    pub shutdown: watch::Receiver<bool>,
}

pub fn app(
    state: AppState,
    liveness: HealthRegistry,
    recorder_handle: Option<PrometheusHandle>,
    max_body_bytes: usize,
) -> Router {
    let router = Router::new()
        .route("/", routing::get(index))
        .route(
            "/_liveness",
            routing::get(move || std::future::ready(liveness.get_status())),
        )
        .route(
            "/events",
            routing::post(events::post).layer(DefaultBodyLimit::max(max_body_bytes)),
        )
        .route("/events/recent", routing::get(events::recent))
        .route("/analytics/current", routing::get(analytics::current))
        .route("/analytics/history", routing::get(analytics::history))
        .route("/subscribe", routing::get(subscribe::get))
        .with_state(state);

    match recorder_handle {
        Some(recorder_handle) => metrics::setup_metrics_routes(router, recorder_handle),
        None => router.layer(axum::middleware::from_fn(metrics::track_metrics)),
    }
}

pub async fn index() -> &'static str {
    "vision processor"
}
