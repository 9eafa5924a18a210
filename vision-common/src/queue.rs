use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::event::{EventKind, ProcessingEvent};
use crate::redis::{Client, CustomRedisError};

pub const DEFAULT_QUEUE_KEY: &str = "processing:queue";

/// How many recently enqueued events the in-process mirror remembers.
pub const MIRROR_CAPACITY: usize = 1000;

/// Enumeration of errors for operations with EventQueue.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("queue is unavailable: {0}")]
    Unavailable(#[from] CustomRedisError),
    #[error("failed to serialize event: {0}")]
    SerializeError(serde_json::Error),
}

/// What the mirror keeps about an enqueued event. Payloads stay in the durable queue only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnqueuedEvent {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub size: usize,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub enqueued_at: DateTime<Utc>,
}

impl From<&ProcessingEvent> for EnqueuedEvent {
    fn from(event: &ProcessingEvent) -> Self {
        Self {
            id: event.id,
            kind: event.kind.clone(),
            size: event.payload.len(),
            enqueued_at: event.enqueued_at,
        }
    }
}

/// A FIFO queue of `ProcessingEvent`s on top of a redis list.
///
/// Producers LPUSH onto the head and the consumer RPOPs from the tail, so events come
/// out in the order they went in.
#[derive(Clone)]
pub struct EventQueue {
    key: String,
    client: Arc<dyn Client + Send + Sync>,
    mirror: Arc<Mutex<VecDeque<EnqueuedEvent>>>,
}

impl EventQueue {
    pub fn new(key: &str, client: Arc<dyn Client + Send + Sync>) -> Self {
        Self {
            key: key.to_owned(),
            client,
            mirror: Arc::new(Mutex::new(VecDeque::with_capacity(MIRROR_CAPACITY))),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Enqueue an event. The only failure a producer can observe is the queue being unavailable.
    pub async fn push(&self, event: ProcessingEvent) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(&event).map_err(QueueError::SerializeError)?;

        self.client.lpush(self.key.clone(), serialized).await?;

        {
            let mut mirror = self.mirror.lock().unwrap_or_else(|e| e.into_inner());
            if mirror.len() == MIRROR_CAPACITY {
                mirror.pop_back();
            }
            mirror.push_front(EnqueuedEvent::from(&event));
        }

        metrics::counter!("vision_events_enqueued_total", "kind" => event.kind.to_string())
            .increment(1);
        debug!("added event {} to processing queue: {}", event.id, event.kind);

        Ok(())
    }

    /// Dequeue the oldest event, `None` when the queue is empty.
    /// Entries that cannot be parsed are logged and dropped, and the next one is tried.
    pub async fn pop(&self) -> Result<Option<ProcessingEvent>, QueueError> {
        loop {
            let Some(raw) = self.client.rpop(self.key.clone()).await? else {
                return Ok(None);
            };

            match serde_json::from_str::<ProcessingEvent>(&raw) {
                Ok(event) => return Ok(Some(event)),
                Err(error) => {
                    error!("error parsing event from queue: {}", error);
                    metrics::counter!("vision_events_malformed_total").increment(1);
                }
            }
        }
    }

    /// Dequeue up to `max` events, oldest first, stopping early when the queue runs dry.
    ///
    /// An error is only returned if nothing was dequeued: events already popped when the
    /// queue fails are handed back so they are not lost.
    pub async fn pop_batch(&self, max: usize) -> Result<Vec<ProcessingEvent>, QueueError> {
        let mut batch = Vec::with_capacity(max);

        while batch.len() < max {
            match self.pop().await {
                Ok(Some(event)) => batch.push(event),
                Ok(None) => break,
                Err(error) if batch.is_empty() => return Err(error),
                Err(error) => {
                    warn!(
                        "queue failed after dequeuing {} events, processing partial batch: {}",
                        batch.len(),
                        error
                    );
                    break;
                }
            }
        }

        Ok(batch)
    }

    /// Recently enqueued events known to this process, newest first.
    pub fn recent(&self, limit: usize) -> Vec<EnqueuedEvent> {
        let mirror = self.mirror.lock().unwrap_or_else(|e| e.into_inner());
        mirror.iter().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::MockRedisClient;

    fn queue(client: &MockRedisClient) -> EventQueue {
        EventQueue::new(DEFAULT_QUEUE_KEY, Arc::new(client.clone()))
    }

    #[tokio::test]
    async fn test_push_then_pop_is_fifo() {
        let client = MockRedisClient::new();
        let queue = queue(&client);

        let first = ProcessingEvent::new(EventKind::TextExtraction, b"one".to_vec());
        let second = ProcessingEvent::new(EventKind::ObjectDetection, b"two".to_vec());
        queue.push(first.clone()).await.expect("failed to push");
        queue.push(second.clone()).await.expect("failed to push");

        assert_eq!(queue.pop().await.unwrap(), Some(first));
        assert_eq!(queue.pop().await.unwrap(), Some(second));
        assert_eq!(queue.pop().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_pop_batch_stops_at_max_and_when_empty() {
        let client = MockRedisClient::new();
        let queue = queue(&client);

        for i in 0..12 {
            queue
                .push(ProcessingEvent::new(
                    EventKind::TextExtraction,
                    format!("{}", i).into_bytes(),
                ))
                .await
                .expect("failed to push");
        }

        let batch = queue.pop_batch(10).await.unwrap();
        assert_eq!(batch.len(), 10);
        assert_eq!(batch[0].payload, b"0");
        assert_eq!(batch[9].payload, b"9");

        let batch = queue.pop_batch(10).await.unwrap();
        assert_eq!(batch.len(), 2);

        assert!(queue.pop_batch(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let client = MockRedisClient::new();
        let queue = queue(&client);

        client
            .lpush(DEFAULT_QUEUE_KEY.to_owned(), "not json".to_owned())
            .await
            .unwrap();
        let event = ProcessingEvent::new(EventKind::FaceRecognition, b"face".to_vec());
        queue.push(event.clone()).await.unwrap();

        assert_eq!(queue.pop_batch(10).await.unwrap(), vec![event]);
    }

    #[tokio::test]
    async fn test_unavailable_queue() {
        let client = MockRedisClient::new();
        let queue = queue(&client);
        client.set_unavailable(true);

        let pushed = queue
            .push(ProcessingEvent::new(EventKind::TextExtraction, vec![1]))
            .await;
        assert!(matches!(pushed, Err(QueueError::Unavailable(_))));
        assert!(queue.recent(10).is_empty());

        assert!(queue.pop_batch(10).await.is_err());
    }

    #[tokio::test]
    async fn test_mirror_is_newest_first_and_bounded() {
        let client = MockRedisClient::new();
        let queue = queue(&client);

        for _ in 0..MIRROR_CAPACITY + 5 {
            queue
                .push(ProcessingEvent::new(EventKind::ObjectDetection, vec![0; 4]))
                .await
                .unwrap();
        }
        let last = ProcessingEvent::new(EventKind::TextExtraction, vec![0; 8]);
        queue.push(last.clone()).await.unwrap();

        let recent = queue.recent(usize::MAX);
        assert_eq!(recent.len(), MIRROR_CAPACITY);
        assert_eq!(recent[0].id, last.id);
        assert_eq!(recent[0].size, 8);
        assert_eq!(queue.recent(3).len(), 3);
    }
}
