use thiserror::Error;
use vision_common::event::EventKind;
use vision_common::queue::QueueError;

/// Enumeration of errors a processing strategy can return.
#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("{kind} strategy failed to initialize: {reason}")]
    InitializationError { kind: EventKind, reason: String },
    #[error("inference request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("inference service returned an invalid response: {0}")]
    InvalidResponse(String),
    #[error("{0} strategy is not initialized")]
    NotInitialized(EventKind),
    #[error("{0}")]
    Failed(String),
}

/// Enumeration of errors related to starting and running the batch consumer.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("failed to initialize processing strategies: {0}")]
    FatalInit(#[source] StrategyError),
    #[error("failed to dequeue a batch: {0}")]
    TransientBatch(#[from] QueueError),
    #[error("consumer loop terminated abnormally and cannot be restarted")]
    LoopLost,
}
