use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time;

use async_trait::async_trait;
use vision_common::cache::{ResultCache, DEFAULT_RESULT_TTL};
use vision_common::event::{EventKind, ProcessingEvent};
use vision_common::redis::MockRedisClient;
use vision_common::result::{
    DetectedFace, DetectedObject, FaceRecognitionResult, ObjectDetectionResult, Point,
    ProcessingResult, TextExtractionResult, FACE_DESCRIPTOR_LEN,
};

use crate::error::StrategyError;
use crate::registry::{PayloadPolicy, StrategyRegistry};
use crate::strategy::Strategy;

/// A strategy scripted by its payload:
/// * `fail` returns an error, `panic` panics,
/// * `sleep:<ms>` waits before answering,
/// * a number is the text confidence, or the object/face count for the other kinds.
pub struct FakeStrategy {
    kind: EventKind,
    fail_init: bool,
    initialized: AtomicBool,
    pub init_calls: AtomicUsize,
    pub process_calls: AtomicUsize,
    pub shutdown_calls: AtomicUsize,
}

impl FakeStrategy {
    pub fn new(kind: EventKind) -> Arc<Self> {
        Arc::new(Self::build(kind, false))
    }

    pub fn failing_init(kind: EventKind) -> Arc<Self> {
        Arc::new(Self::build(kind, true))
    }

    fn build(kind: EventKind, fail_init: bool) -> Self {
        Self {
            kind,
            fail_init,
            initialized: AtomicBool::new(false),
            init_calls: AtomicUsize::new(0),
            process_calls: AtomicUsize::new(0),
            shutdown_calls: AtomicUsize::new(0),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn processed(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Strategy for FakeStrategy {
    fn kind(&self) -> EventKind {
        self.kind.clone()
    }

    async fn initialize(&self) -> Result<(), StrategyError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            return Err(StrategyError::InitializationError {
                kind: self.kind.clone(),
                reason: "model files missing".to_owned(),
            });
        }
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn process(&self, payload: &[u8]) -> Result<ProcessingResult, StrategyError> {
        self.process_calls.fetch_add(1, Ordering::SeqCst);
        let script = String::from_utf8_lossy(payload).to_string();

        if script == "fail" {
            return Err(StrategyError::Failed("scripted failure".to_owned()));
        }
        if script == "panic" {
            panic!("scripted panic");
        }
        let value = match script.strip_prefix("sleep:") {
            Some(ms) => {
                let ms = u64::from_str(ms).unwrap_or(0);
                tokio::time::sleep(time::Duration::from_millis(ms)).await;
                1.0
            }
            None => f64::from_str(&script).unwrap_or(1.0),
        };

        let result = match self.kind {
            EventKind::ObjectDetection => ProcessingResult::ObjectDetection(ObjectDetectionResult {
                objects: (0..value as usize)
                    .map(|i| DetectedObject {
                        label: format!("object-{}", i),
                        confidence: 0.5,
                        bbox: [0.0, 0.0, 10.0, 10.0],
                    })
                    .collect(),
                processing_time_ms: 20,
            }),
            EventKind::FaceRecognition => ProcessingResult::FaceRecognition(FaceRecognitionResult {
                faces: (0..value as usize)
                    .map(|_| DetectedFace {
                        descriptor: vec![0.0; FACE_DESCRIPTOR_LEN],
                        landmarks: vec![Point { x: 1.0, y: 2.0 }],
                        confidence: 0.5,
                    })
                    .collect(),
                processing_time_ms: 30,
            }),
            EventKind::TextExtraction => ProcessingResult::TextExtraction(TextExtractionResult {
                text: "text".to_owned(),
                confidence: value,
                processing_time_ms: 10,
            }),
            EventKind::Unknown(_) => {
                return Err(StrategyError::Failed("unknown kind".to_owned()));
            }
        };

        Ok(result)
    }

    async fn shutdown(&self) {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.initialized.store(false, Ordering::SeqCst);
    }
}

pub fn event(kind: EventKind, script: &str) -> ProcessingEvent {
    ProcessingEvent::new(kind, script.as_bytes().to_vec())
}

/// One fake strategy per known kind, in `EventKind::KNOWN` order.
pub fn fake_strategies() -> Vec<Arc<FakeStrategy>> {
    EventKind::KNOWN
        .iter()
        .map(|kind| FakeStrategy::new(kind.clone()))
        .collect()
}

pub fn registry_with(
    strategies: &[Arc<FakeStrategy>],
    client: &MockRedisClient,
    timeout: time::Duration,
) -> StrategyRegistry {
    let cache = ResultCache::new(Arc::new(client.clone()), DEFAULT_RESULT_TTL);

    strategies.iter().fold(
        StrategyRegistry::new(cache, PayloadPolicy::unrestricted(), timeout),
        |registry, strategy| registry.register(strategy.clone()),
    )
}
