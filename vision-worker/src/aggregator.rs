use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use vision_common::analytics::AnalyticsSnapshot;
use vision_common::result::ProcessingResult;

/// What readers see of the aggregate state: the latest snapshot and the history, newest first.
#[derive(Debug, Clone, Default)]
pub struct AnalyticsView {
    pub current: Option<AnalyticsSnapshot>,
    pub history: VecDeque<AnalyticsSnapshot>,
}

/// Folds processed batches into analytics snapshots.
///
/// The aggregator is owned by the consumer loop, which is the only writer. Every batch is
/// published as a whole through a watch channel, so readers never observe a half-applied
/// batch.
pub struct Aggregator {
    history_limit: usize,
    sender: watch::Sender<AnalyticsView>,
}

impl Aggregator {
    pub fn new(history_limit: usize) -> Self {
        Self::with_history(history_limit, Vec::new())
    }

    /// Start from previously persisted history, given newest first.
    pub fn with_history(history_limit: usize, history: Vec<AnalyticsSnapshot>) -> Self {
        let history_limit = history_limit.max(1);
        let history: VecDeque<_> = history.into_iter().take(history_limit).collect();
        let view = AnalyticsView {
            current: history.front().cloned(),
            history,
        };
        let (sender, _) = watch::channel(view);

        Self {
            history_limit,
            sender,
        }
    }

    pub fn reader(&self) -> AnalyticsReader {
        AnalyticsReader(self.sender.subscribe())
    }

    /// Summarize one batch, make it the current snapshot and prepend it to the history.
    pub fn record(&mut self, results: &[ProcessingResult]) -> AnalyticsSnapshot {
        let snapshot = summarize(results, Utc::now());
        let history_limit = self.history_limit;

        self.sender.send_modify(|view| {
            view.current = Some(snapshot.clone());
            view.history.push_front(snapshot.clone());
            view.history.truncate(history_limit);
        });

        snapshot
    }
}

/// Sum counts and processing times over the successful results of a batch.
///
/// Both averages divide by the number of successful results. Only text extraction reports
/// a top-level confidence, so `avg_confidence` is diluted by successful results of the
/// other kinds.
pub fn summarize(results: &[ProcessingResult], timestamp: DateTime<Utc>) -> AnalyticsSnapshot {
    let mut snapshot = AnalyticsSnapshot::empty(timestamp);
    let mut succeeded: u64 = 0;
    let mut total_time: u64 = 0;
    let mut total_confidence: f64 = 0.0;

    for result in results {
        match result {
            ProcessingResult::ObjectDetection(detection) => {
                snapshot.total_objects += detection.objects.len() as u64;
            }
            ProcessingResult::FaceRecognition(recognition) => {
                snapshot.total_faces += recognition.faces.len() as u64;
            }
            ProcessingResult::TextExtraction(extraction) => {
                total_confidence += extraction.confidence;
            }
            ProcessingResult::Failure { .. } => continue,
        }
        succeeded += 1;
        total_time += result.processing_time_ms().unwrap_or(0);
    }

    if succeeded > 0 {
        snapshot.avg_processing_time_ms = total_time as f64 / succeeded as f64;
        snapshot.avg_confidence = total_confidence / succeeded as f64;
    }

    snapshot
}

/// Read-only handle on the aggregate state. Every read is a copy.
#[derive(Clone)]
pub struct AnalyticsReader(watch::Receiver<AnalyticsView>);

impl AnalyticsReader {
    pub fn current(&self) -> Option<AnalyticsSnapshot> {
        self.0.borrow().current.clone()
    }

    pub fn history(&self, limit: usize) -> Vec<AnalyticsSnapshot> {
        self.0.borrow().history.iter().take(limit).cloned().collect()
    }

    pub fn history_len(&self) -> usize {
        self.0.borrow().history.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vision_common::event::EventKind;
    use vision_common::result::{
        DetectedObject, FailureReason, ObjectDetectionResult, TextExtractionResult,
    };

    fn text(confidence: f64, processing_time_ms: u64) -> ProcessingResult {
        ProcessingResult::TextExtraction(TextExtractionResult {
            text: "receipt".to_owned(),
            confidence,
            processing_time_ms,
        })
    }

    fn objects(count: usize, processing_time_ms: u64) -> ProcessingResult {
        ProcessingResult::ObjectDetection(ObjectDetectionResult {
            objects: (0..count)
                .map(|_| DetectedObject {
                    label: "cup".to_owned(),
                    confidence: 0.3,
                    bbox: [0.0, 0.0, 1.0, 1.0],
                })
                .collect(),
            processing_time_ms,
        })
    }

    fn failure() -> ProcessingResult {
        ProcessingResult::failure(EventKind::TextExtraction, FailureReason::Timeout)
    }

    #[test]
    fn test_failures_are_excluded_from_averages() {
        let snapshot = summarize(&[text(0.9, 100), text(0.8, 300), failure()], Utc::now());

        assert!((snapshot.avg_confidence - 0.85).abs() < 1e-9);
        assert!((snapshot.avg_processing_time_ms - 200.0).abs() < 1e-9);
        assert_eq!(snapshot.total_objects, 0);
        assert_eq!(snapshot.total_faces, 0);
    }

    #[test]
    fn test_confidence_is_diluted_by_other_kinds() {
        let snapshot = summarize(&[text(0.9, 10), objects(2, 30)], Utc::now());

        assert!((snapshot.avg_confidence - 0.45).abs() < 1e-9);
        assert!((snapshot.avg_processing_time_ms - 20.0).abs() < 1e-9);
        assert_eq!(snapshot.total_objects, 2);
    }

    #[test]
    fn test_all_failures_average_to_zero() {
        let snapshot = summarize(&[failure(), failure()], Utc::now());

        assert_eq!(snapshot.avg_confidence, 0.0);
        assert_eq!(snapshot.avg_processing_time_ms, 0.0);

        let snapshot = summarize(&[], Utc::now());
        assert_eq!(snapshot, AnalyticsSnapshot::empty(snapshot.timestamp));
    }

    #[test]
    fn test_history_is_newest_first_and_bounded() {
        let mut aggregator = Aggregator::new(3);
        let reader = aggregator.reader();
        assert!(reader.current().is_none());

        for count in 1..=5 {
            aggregator.record(&[objects(count, 1)]);
        }

        let history = reader.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|s| s.total_objects).collect::<Vec<_>>(),
            vec![5, 4, 3]
        );
        assert_eq!(reader.current().map(|s| s.total_objects), Some(5));
        assert_eq!(reader.history(1).len(), 1);
    }

    #[test]
    fn test_seeded_history() {
        let persisted = (0..5)
            .map(|i| {
                let mut snapshot = AnalyticsSnapshot::empty(Utc::now());
                snapshot.total_faces = 10 - i;
                snapshot
            })
            .collect();
        let aggregator = Aggregator::with_history(4, persisted);
        let reader = aggregator.reader();

        assert_eq!(reader.history_len(), 4);
        assert_eq!(reader.current().map(|s| s.total_faces), Some(10));
    }

    #[test]
    fn test_zero_history_limit_keeps_latest() {
        let mut aggregator = Aggregator::new(0);
        let reader = aggregator.reader();

        aggregator.record(&[objects(1, 1)]);
        aggregator.record(&[objects(2, 1)]);

        assert_eq!(reader.history_len(), 1);
        assert_eq!(reader.history(10)[0].total_objects, 2);
    }
}
