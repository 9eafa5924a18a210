use std::fmt;

use serde::{Deserialize, Serialize};

use crate::event::EventKind;

/// Length of the face descriptor vectors produced by face recognition.
pub const FACE_DESCRIPTOR_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub label: String,
    pub confidence: f64,
    /// `[x, y, width, height]` in pixels.
    pub bbox: [f64; 4],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetectionResult {
    pub objects: Vec<DetectedObject>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedFace {
    pub descriptor: Vec<f32>,
    pub landmarks: Vec<Point>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceRecognitionResult {
    pub faces: Vec<DetectedFace>,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextExtractionResult {
    pub text: String,
    pub confidence: f64,
    pub processing_time_ms: u64,
}

/// Why a single event produced no result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    UnknownKind,
    NotInitialized,
    PayloadTooLarge { size: usize, limit: usize },
    UnsupportedFormat(String),
    Timeout,
    Strategy(String),
    Panicked,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FailureReason::UnknownKind => write!(f, "unknown event kind"),
            FailureReason::NotInitialized => write!(f, "strategies are not initialized"),
            FailureReason::PayloadTooLarge { size, limit } => {
                write!(f, "payload of {} bytes exceeds limit of {}", size, limit)
            }
            FailureReason::UnsupportedFormat(format) => {
                write!(f, "unsupported image format: {}", format)
            }
            FailureReason::Timeout => write!(f, "processing timed out"),
            FailureReason::Strategy(error) => write!(f, "strategy failed: {}", error),
            FailureReason::Panicked => write!(f, "processing task panicked"),
        }
    }
}

impl FailureReason {
    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            FailureReason::UnknownKind => "unknown_kind",
            FailureReason::NotInitialized => "not_initialized",
            FailureReason::PayloadTooLarge { .. } => "payload_too_large",
            FailureReason::UnsupportedFormat(_) => "unsupported_format",
            FailureReason::Timeout => "timeout",
            FailureReason::Strategy(_) => "strategy",
            FailureReason::Panicked => "panicked",
        }
    }
}

/// The outcome of processing one event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProcessingResult {
    ObjectDetection(ObjectDetectionResult),
    FaceRecognition(FaceRecognitionResult),
    TextExtraction(TextExtractionResult),
    Failure { kind: EventKind, reason: FailureReason },
}

impl ProcessingResult {
    pub fn failure(kind: EventKind, reason: FailureReason) -> Self {
        ProcessingResult::Failure { kind, reason }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ProcessingResult::Failure { .. })
    }

    pub fn kind(&self) -> EventKind {
        match self {
            ProcessingResult::ObjectDetection(_) => EventKind::ObjectDetection,
            ProcessingResult::FaceRecognition(_) => EventKind::FaceRecognition,
            ProcessingResult::TextExtraction(_) => EventKind::TextExtraction,
            ProcessingResult::Failure { kind, .. } => kind.clone(),
        }
    }

    pub fn processing_time_ms(&self) -> Option<u64> {
        match self {
            ProcessingResult::ObjectDetection(result) => Some(result.processing_time_ms),
            ProcessingResult::FaceRecognition(result) => Some(result.processing_time_ms),
            ProcessingResult::TextExtraction(result) => Some(result.processing_time_ms),
            ProcessingResult::Failure { .. } => None,
        }
    }

    /// Serialize the inner result the way it is stored under its cache key.
    /// Failures are never cached.
    pub fn to_cache_value(&self) -> Option<serde_json::Result<String>> {
        match self {
            ProcessingResult::ObjectDetection(result) => Some(serde_json::to_string(result)),
            ProcessingResult::FaceRecognition(result) => Some(serde_json::to_string(result)),
            ProcessingResult::TextExtraction(result) => Some(serde_json::to_string(result)),
            ProcessingResult::Failure { .. } => None,
        }
    }

    /// Parse a value read back from a cache key for `kind`.
    pub fn from_cache_value(kind: &EventKind, value: &str) -> serde_json::Result<Option<Self>> {
        let result = match kind {
            EventKind::ObjectDetection => {
                Some(ProcessingResult::ObjectDetection(serde_json::from_str(value)?))
            }
            EventKind::FaceRecognition => {
                Some(ProcessingResult::FaceRecognition(serde_json::from_str(value)?))
            }
            EventKind::TextExtraction => {
                Some(ProcessingResult::TextExtraction(serde_json::from_str(value)?))
            }
            EventKind::Unknown(_) => None,
        };

        Ok(result)
    }
}
