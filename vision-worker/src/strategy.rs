use std::sync::atomic::{AtomicBool, Ordering};
use std::time;

use async_trait::async_trait;
use reqwest::header;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info};
use vision_common::event::EventKind;
use vision_common::result::{
    DetectedFace, DetectedObject, FaceRecognitionResult, ObjectDetectionResult, ProcessingResult,
    TextExtractionResult, FACE_DESCRIPTOR_LEN,
};

use crate::error::StrategyError;

/// A pluggable capability turning raw image bytes into a typed result for one event kind.
///
/// `initialize` runs once before the consumer loop starts and `shutdown` releases whatever
/// it acquired. Both may be called more than once.
#[async_trait]
pub trait Strategy: Send + Sync {
    fn kind(&self) -> EventKind;

    async fn initialize(&self) -> Result<(), StrategyError>;

    async fn process(&self, payload: &[u8]) -> Result<ProcessingResult, StrategyError>;

    async fn shutdown(&self);
}

/// Build the HTTP client shared by every `HttpStrategy`.
pub fn inference_client(request_timeout: time::Duration) -> reqwest::Result<reqwest::Client> {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );

    reqwest::Client::builder()
        .default_headers(headers)
        .user_agent("Vision Processing Worker")
        .timeout(request_timeout)
        .build()
}

#[derive(Deserialize)]
struct ObjectsResponse {
    objects: Vec<DetectedObject>,
}

#[derive(Deserialize)]
struct FacesResponse {
    faces: Vec<DetectedFace>,
}

#[derive(Deserialize)]
struct TextResponse {
    text: String,
    confidence: f64,
}

/// Runs one kind of vision model behind an inference service.
///
/// * `GET {base_url}/v1/{kind}/ready` must succeed before any image is sent.
/// * `POST {base_url}/v1/{kind}` takes the raw image as `application/octet-stream` and
///   answers with the JSON result for that kind.
///
/// Processing time is measured here, from sending the image until the response body is read.
pub struct HttpStrategy {
    kind: EventKind,
    base_url: String,
    client: reqwest::Client,
    ready: AtomicBool,
}

impl HttpStrategy {
    pub fn new(kind: EventKind, base_url: &str, client: reqwest::Client) -> Self {
        Self {
            kind,
            base_url: base_url.trim_end_matches('/').to_owned(),
            client,
            ready: AtomicBool::new(false),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/v1/{}{}", self.base_url, self.kind, suffix)
    }

    /// Read the response body into a result. Processing time runs from `start` until the
    /// body has been read.
    async fn parse(
        &self,
        response: reqwest::Response,
        start: Instant,
    ) -> Result<ProcessingResult, StrategyError> {
        let result = match self.kind {
            EventKind::ObjectDetection => {
                let body: ObjectsResponse = response.json().await?;
                ProcessingResult::ObjectDetection(ObjectDetectionResult {
                    objects: body.objects,
                    processing_time_ms: elapsed_ms(start),
                })
            }
            EventKind::FaceRecognition => {
                let body: FacesResponse = response.json().await?;
                if let Some(face) = body
                    .faces
                    .iter()
                    .find(|face| face.descriptor.len() != FACE_DESCRIPTOR_LEN)
                {
                    return Err(StrategyError::InvalidResponse(format!(
                        "face descriptor has {} values, expected {}",
                        face.descriptor.len(),
                        FACE_DESCRIPTOR_LEN
                    )));
                }
                ProcessingResult::FaceRecognition(FaceRecognitionResult {
                    faces: body.faces,
                    processing_time_ms: elapsed_ms(start),
                })
            }
            EventKind::TextExtraction => {
                let body: TextResponse = response.json().await?;
                ProcessingResult::TextExtraction(TextExtractionResult {
                    text: body.text,
                    confidence: body.confidence,
                    processing_time_ms: elapsed_ms(start),
                })
            }
            EventKind::Unknown(ref tag) => {
                return Err(StrategyError::Failed(format!(
                    "no inference endpoint for {}",
                    tag
                )))
            }
        };

        Ok(result)
    }
}

#[async_trait]
impl Strategy for HttpStrategy {
    fn kind(&self) -> EventKind {
        self.kind.clone()
    }

    async fn initialize(&self) -> Result<(), StrategyError> {
        let response = self
            .client
            .get(self.url("/ready"))
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|error| StrategyError::InitializationError {
                kind: self.kind.clone(),
                reason: error.to_string(),
            })?;

        debug!("{} model ready: {}", self.kind, response.status());
        self.ready.store(true, Ordering::SeqCst);
        info!("{} strategy initialized", self.kind);

        Ok(())
    }

    async fn process(&self, payload: &[u8]) -> Result<ProcessingResult, StrategyError> {
        if !self.ready.load(Ordering::SeqCst) {
            return Err(StrategyError::NotInitialized(self.kind.clone()));
        }

        let start = Instant::now();
        let response = self
            .client
            .post(self.url(""))
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(payload.to_vec())
            .send()
            .await?
            .error_for_status()?;

        self.parse(response, start).await
    }

    async fn shutdown(&self) {
        if self.ready.swap(false, Ordering::SeqCst) {
            info!("{} strategy shut down", self.kind);
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn client() -> reqwest::Client {
        inference_client(time::Duration::from_secs(5)).expect("failed to build client")
    }

    #[tokio::test]
    async fn test_initialize_requires_ready_endpoint() {
        let server = MockServer::start_async().await;
        let strategy = HttpStrategy::new(EventKind::TextExtraction, &server.base_url(), client());

        let err = strategy
            .initialize()
            .await
            .expect_err("initialize should fail without a ready endpoint");
        assert!(matches!(err, StrategyError::InitializationError { .. }));

        let ready = server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/text_extraction/ready");
                then.status(200);
            })
            .await;
        strategy.initialize().await.expect("failed to initialize");
        ready.assert_async().await;
    }

    #[tokio::test]
    async fn test_process_before_initialize() {
        let strategy = HttpStrategy::new(
            EventKind::ObjectDetection,
            "http://localhost:1",
            client(),
        );

        let err = strategy.process(b"img").await.unwrap_err();
        assert!(matches!(err, StrategyError::NotInitialized(EventKind::ObjectDetection)));
    }

    #[tokio::test]
    async fn test_process_text_extraction() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/text_extraction/ready");
                then.status(200);
            })
            .await;
        let recognize = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/text_extraction")
                    .header("content-type", "application/octet-stream")
                    .body("image-bytes");
                then.status(200)
                    .json_body(json!({"text": "TOTAL 42.00", "confidence": 0.87}));
            })
            .await;

        let strategy = HttpStrategy::new(EventKind::TextExtraction, &server.base_url(), client());
        strategy.initialize().await.unwrap();

        let result = strategy.process(b"image-bytes").await.expect("process failed");
        match result {
            ProcessingResult::TextExtraction(text) => {
                assert_eq!(text.text, "TOTAL 42.00");
                assert_eq!(text.confidence, 0.87);
            }
            other => panic!("unexpected result: {:?}", other),
        }
        recognize.assert_async().await;
    }

    #[tokio::test]
    async fn test_process_object_detection() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/object_detection/ready");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/object_detection");
                then.status(200).json_body(json!({"objects": [
                    {"label": "face", "confidence": 0.9, "bbox": [1.0, 2.0, 3.0, 4.0]},
                    {"label": "face", "confidence": 0.6, "bbox": [5.0, 6.0, 7.0, 8.0]},
                ]}));
            })
            .await;

        let strategy =
            HttpStrategy::new(EventKind::ObjectDetection, &server.base_url(), client());
        strategy.initialize().await.unwrap();

        match strategy.process(b"img").await.unwrap() {
            ProcessingResult::ObjectDetection(result) => {
                assert_eq!(result.objects.len(), 2);
                assert_eq!(result.objects[1].bbox, [5.0, 6.0, 7.0, 8.0]);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_face_descriptor_length_is_validated() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/face_recognition/ready");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/face_recognition");
                then.status(200).json_body(json!({"faces": [
                    {"descriptor": [0.1, 0.2], "landmarks": [], "confidence": 0.99},
                ]}));
            })
            .await;

        let strategy =
            HttpStrategy::new(EventKind::FaceRecognition, &server.base_url(), client());
        strategy.initialize().await.unwrap();

        let err = strategy.process(b"img").await.unwrap_err();
        assert!(matches!(err, StrategyError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_server_error_fails_the_event() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v1/text_extraction/ready");
                then.status(200);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/text_extraction");
                then.status(503);
            })
            .await;

        let strategy = HttpStrategy::new(EventKind::TextExtraction, &server.base_url(), client());
        strategy.initialize().await.unwrap();

        let err = strategy.process(b"img").await.unwrap_err();
        assert!(matches!(err, StrategyError::RequestError(_)));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let strategy = HttpStrategy::new(
            EventKind::TextExtraction,
            "http://localhost:1",
            client(),
        );

        strategy.shutdown().await;
        strategy.shutdown().await;
        assert!(strategy.process(b"img").await.is_err());
    }
}
