use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error};

use super::app::AppState;
use crate::notify::{ANALYTICS_TOPIC, RESULTS_TOPIC};

/// SSE stream of processing results and analytics updates.
///
/// Event format:
/// ```text
/// event: processing_result
/// data: {"type": "text_extraction", "text": "...", "confidence": 0.9, "processingTimeMs": 12}
///
/// event: analytics_update
/// data: {"totalObjects": 3, "totalFaces": 0, "avgProcessingTimeMs": 12.0, ...}
/// ```
///
/// A client that reads too slowly misses the oldest messages instead of holding up others.
/// The stream ends once the server starts shutting down.
pub async fn get(State(state): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut results = state.notifier.subscribe_results();
    let mut analytics = state.notifier.subscribe_analytics();
    let shutdown = shutting_down(state.shutdown.clone());
    debug!("new subscriber");

    let stream = async_stream::stream! {
        tokio::pin!(shutdown);
        loop {
            let event = tokio::select! {
                _ = &mut shutdown => break,
                Some(result) = results.recv() => to_event(RESULTS_TOPIC, &result),
                Some(snapshot) = analytics.recv() => to_event(ANALYTICS_TOPIC, &snapshot),
                else => break,
            };

            if let Some(event) = event {
                yield Ok::<_, Infallible>(event);
            }
        }
        debug!("subscriber stream closed");
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Completes once shutdown is signalled, or once nothing is left to signal it.
async fn shutting_down(mut shutdown: watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn to_event<T: Serialize>(topic: &'static str, message: &T) -> Option<Event> {
    match Event::default().event(topic).json_data(message) {
        Ok(event) => Some(event),
        Err(error) => {
            error!("failed to serialize {} notification: {}", topic, error);
            None
        }
    }
}
