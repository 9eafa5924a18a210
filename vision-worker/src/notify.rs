use futures::stream::{self, Stream};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{trace, warn};
use vision_common::analytics::AnalyticsSnapshot;
use vision_common::result::ProcessingResult;

pub const RESULTS_TOPIC: &str = "processing_result";
pub const ANALYTICS_TOPIC: &str = "analytics_update";

/// Fans out processing results and analytics updates to any number of subscribers.
///
/// Channels are bounded: a subscriber that falls behind loses the oldest messages, and
/// publishing never waits on, or fails because of, a subscriber.
#[derive(Clone)]
pub struct Notifier {
    results: broadcast::Sender<ProcessingResult>,
    analytics: broadcast::Sender<AnalyticsSnapshot>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (results, _) = broadcast::channel(capacity);
        let (analytics, _) = broadcast::channel(capacity);

        Self { results, analytics }
    }

    pub fn publish_result(&self, result: ProcessingResult) {
        // An error only means nobody is subscribed.
        if self.results.send(result).is_err() {
            trace!("no {} subscribers", RESULTS_TOPIC);
        }
    }

    pub fn publish_analytics(&self, snapshot: AnalyticsSnapshot) {
        if self.analytics.send(snapshot).is_err() {
            trace!("no {} subscribers", ANALYTICS_TOPIC);
        }
    }

    pub fn subscribe_results(&self) -> Subscription<ProcessingResult> {
        Subscription::new(RESULTS_TOPIC, self.results.subscribe())
    }

    pub fn subscribe_analytics(&self) -> Subscription<AnalyticsSnapshot> {
        Subscription::new(ANALYTICS_TOPIC, self.analytics.subscribe())
    }
}

pub struct Subscription<T> {
    topic: &'static str,
    receiver: broadcast::Receiver<T>,
}

impl<T: Clone + Send + 'static> Subscription<T> {
    fn new(topic: &'static str, receiver: broadcast::Receiver<T>) -> Self {
        Self { topic, receiver }
    }

    /// Wait for the next message, skipping over anything dropped while lagging.
    /// Returns `None` once the notifier is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("{} subscriber lagged, skipped {} messages", self.topic, skipped);
                    metrics::counter!("vision_notifications_dropped_total", "topic" => self.topic)
                        .increment(skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = T> {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|message| (message, subscription))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use futures::StreamExt;
    use vision_common::event::EventKind;
    use vision_common::result::FailureReason;

    fn snapshot(total_objects: u64) -> AnalyticsSnapshot {
        let mut snapshot = AnalyticsSnapshot::empty(Utc::now());
        snapshot.total_objects = total_objects;
        snapshot
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let notifier = Notifier::new(4);
        notifier.publish_analytics(snapshot(1));

        let mut subscription = notifier.subscribe_analytics();
        notifier.publish_analytics(snapshot(2));

        assert_eq!(subscription.recv().await.map(|s| s.total_objects), Some(2));
    }

    #[tokio::test]
    async fn test_publish_result_without_subscribers() {
        let notifier = Notifier::new(4);
        notifier.publish_result(ProcessingResult::failure(
            EventKind::TextExtraction,
            FailureReason::Timeout,
        ));

        let mut subscription = notifier.subscribe_results();
        notifier.publish_result(ProcessingResult::failure(
            EventKind::FaceRecognition,
            FailureReason::Timeout,
        ));

        let received = subscription.recv().await.expect("missing result");
        assert_eq!(received.kind(), EventKind::FaceRecognition);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_oldest() {
        let notifier = Notifier::new(2);
        let mut slow = notifier.subscribe_analytics();
        let mut fast = notifier.subscribe_analytics();

        for total in 1..=5 {
            notifier.publish_analytics(snapshot(total));
            assert_eq!(fast.recv().await.map(|s| s.total_objects), Some(total));
        }

        assert_eq!(slow.recv().await.map(|s| s.total_objects), Some(4));
        assert_eq!(slow.recv().await.map(|s| s.total_objects), Some(5));
    }

    #[tokio::test]
    async fn test_subscription_ends_with_notifier() {
        let notifier = Notifier::new(4);
        let subscription = notifier.subscribe_analytics();
        notifier.publish_analytics(snapshot(7));
        drop(notifier);

        let received: Vec<_> = subscription.into_stream().collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].total_objects, 7);
    }
}
