use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use futures::future::join_all;
use tracing::{debug, error, info, warn};
use vision_common::analytics::{AnalyticsSnapshot, AnalyticsStore};
use vision_common::event::ProcessingEvent;
use vision_common::health::HealthHandle;
use vision_common::queue::EventQueue;
use vision_common::result::{FailureReason, ProcessingResult};

use crate::aggregator::{Aggregator, AnalyticsReader};
use crate::error::WorkerError;
use crate::notify::Notifier;
use crate::registry::StrategyRegistry;

/// What a single pass of the consumer loop did.
#[derive(Debug)]
pub enum Iteration {
    /// The queue was empty, the loop slept for the poll interval.
    Idle,
    Processed(BatchReport),
    /// Dequeuing failed, the loop slept for the error backoff.
    Failed,
}

#[derive(Debug)]
pub struct BatchReport {
    pub events: usize,
    pub failures: usize,
    pub snapshot: AnalyticsSnapshot,
}

/// Pops batches of events off the queue, dispatches every event of a batch concurrently,
/// and folds the results into analytics.
pub struct BatchWorker {
    queue: EventQueue,
    registry: Arc<StrategyRegistry>,
    aggregator: Aggregator,
    notifier: Notifier,
    store: AnalyticsStore,
    /// Maximum number of events taken off the queue per batch.
    batch_size: usize,
    /// How long to sleep when the queue is empty.
    poll_interval: time::Duration,
    /// How long to sleep after failing to dequeue.
    error_backoff: time::Duration,
    /// The liveness check handle, reported on every iteration.
    liveness: HealthHandle,
}

impl BatchWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: EventQueue,
        registry: Arc<StrategyRegistry>,
        aggregator: Aggregator,
        notifier: Notifier,
        store: AnalyticsStore,
        batch_size: usize,
        poll_interval: time::Duration,
        error_backoff: time::Duration,
        liveness: HealthHandle,
    ) -> Self {
        Self {
            queue,
            registry,
            aggregator,
            notifier,
            store,
            batch_size: batch_size.max(1),
            poll_interval,
            error_backoff,
            liveness,
        }
    }

    pub fn registry(&self) -> &Arc<StrategyRegistry> {
        &self.registry
    }

    pub fn liveness(&self) -> &HealthHandle {
        &self.liveness
    }

    pub fn analytics(&self) -> AnalyticsReader {
        self.aggregator.reader()
    }

    /// Run until `running` is cleared. The flag is checked before every iteration, so a
    /// batch that already started is always completed. Returns the worker, with its
    /// aggregate state, so it can be started again.
    pub async fn run(mut self, running: Arc<AtomicBool>) -> Self {
        info!("consuming events from {}", self.queue.key());

        while running.load(Ordering::SeqCst) {
            self.liveness.report_healthy().await;
            self.iterate().await;
        }

        info!("stopped consuming events from {}", self.queue.key());
        self
    }

    /// One pass of the loop: dequeue, then either sleep or process what was dequeued.
    pub async fn iterate(&mut self) -> Iteration {
        let batch = match self.queue.pop_batch(self.batch_size).await {
            Ok(batch) => batch,
            Err(error) => {
                let error = WorkerError::from(error);
                error!("{}", error);
                metrics::counter!("vision_batch_errors_total").increment(1);
                tokio::time::sleep(self.error_backoff).await;
                return Iteration::Failed;
            }
        };

        if batch.is_empty() {
            tokio::time::sleep(self.poll_interval).await;
            return Iteration::Idle;
        }

        Iteration::Processed(self.process_batch(batch).await)
    }

    async fn process_batch(&mut self, batch: Vec<ProcessingEvent>) -> BatchReport {
        let start = tokio::time::Instant::now();
        let events = batch.len();
        debug!("processing batch of {} events", events);

        let results = dispatch_all(&self.registry, batch).await;
        let failures = results.iter().filter(|result| result.is_failure()).count();

        let snapshot = self.aggregator.record(&results);

        for result in results {
            if let ProcessingResult::Failure { kind, reason } = &result {
                metrics::counter!(
                    "vision_events_failed_total",
                    "kind" => kind.to_string(),
                    "reason" => reason.label()
                )
                .increment(1);
                continue;
            }

            metrics::counter!("vision_events_processed_total", "kind" => result.kind().to_string())
                .increment(1);
            self.notifier.publish_result(result);
        }

        if let Err(error) = self.store.save(&snapshot).await {
            warn!("failed to persist analytics snapshot: {}", error);
        }
        self.notifier.publish_analytics(snapshot.clone());

        metrics::histogram!("vision_batch_duration_seconds").record(start.elapsed().as_secs_f64());
        metrics::histogram!("vision_batch_size").record(events as f64);

        BatchReport {
            events,
            failures,
            snapshot,
        }
    }
}

/// Dispatch every event on its own task and wait for all of them. Results keep the order
/// of the batch. A task that panics yields a failure for its event.
async fn dispatch_all(
    registry: &Arc<StrategyRegistry>,
    batch: Vec<ProcessingEvent>,
) -> Vec<ProcessingResult> {
    let mut kinds = Vec::with_capacity(batch.len());
    let mut handles = Vec::with_capacity(batch.len());

    for event in batch {
        kinds.push(event.kind.clone());
        let registry = registry.clone();
        handles.push(tokio::spawn(async move { registry.dispatch(&event).await }));
    }

    join_all(handles)
        .await
        .into_iter()
        .zip(kinds)
        .map(|(joined, kind)| match joined {
            Ok(result) => result,
            Err(error) => {
                error!("{} dispatch task failed: {}", kind, error);
                ProcessingResult::failure(kind, FailureReason::Panicked)
            }
        })
        .collect()
}
