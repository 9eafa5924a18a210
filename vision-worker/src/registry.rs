use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time;

use image::ImageFormat;
use tokio::time::timeout;
use tracing::{error, info, warn};
use vision_common::cache::ResultCache;
use vision_common::event::{EventKind, ProcessingEvent};
use vision_common::result::{FailureReason, ProcessingResult};

use crate::error::StrategyError;
use crate::strategy::Strategy;

/// Limits applied to a payload before it reaches a strategy.
#[derive(Debug, Clone)]
pub struct PayloadPolicy {
    pub max_bytes: usize,
    /// Accepted image formats, detected from the payload's magic bytes. Empty accepts anything.
    pub formats: Vec<ImageFormat>,
}

impl PayloadPolicy {
    pub fn new(max_bytes: usize, formats: Vec<ImageFormat>) -> Self {
        Self { max_bytes, formats }
    }

    pub fn unrestricted() -> Self {
        Self {
            max_bytes: usize::MAX,
            formats: Vec::new(),
        }
    }

    fn check(&self, payload: &[u8]) -> Result<(), FailureReason> {
        if payload.len() > self.max_bytes {
            return Err(FailureReason::PayloadTooLarge {
                size: payload.len(),
                limit: self.max_bytes,
            });
        }
        if self.formats.is_empty() {
            return Ok(());
        }

        match image::guess_format(payload) {
            Ok(format) if self.formats.contains(&format) => Ok(()),
            Ok(format) => Err(FailureReason::UnsupportedFormat(
                format
                    .extensions_str()
                    .first()
                    .copied()
                    .unwrap_or("unknown")
                    .to_owned(),
            )),
            Err(_) => Err(FailureReason::UnsupportedFormat("unknown".to_owned())),
        }
    }
}

/// Routes events to the strategy registered for their kind.
///
/// `dispatch` never fails: every problem with a single event, from an unknown kind to a
/// strategy timing out, comes back as `ProcessingResult::Failure`.
pub struct StrategyRegistry {
    strategies: HashMap<EventKind, Arc<dyn Strategy>>,
    cache: ResultCache,
    policy: PayloadPolicy,
    timeout: time::Duration,
    initialized: AtomicBool,
}

impl StrategyRegistry {
    pub fn new(cache: ResultCache, policy: PayloadPolicy, timeout: time::Duration) -> Self {
        Self {
            strategies: HashMap::new(),
            cache,
            policy,
            timeout,
            initialized: AtomicBool::new(false),
        }
    }

    /// Register a strategy, replacing any previous one for the same kind.
    pub fn register(mut self, strategy: Arc<dyn Strategy>) -> Self {
        if let Some(previous) = self.strategies.insert(strategy.kind(), strategy) {
            warn!("replaced strategy registered for {}", previous.kind());
        }
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initialize every registered strategy. If one fails, the others are shut down again
    /// and the error is returned.
    pub async fn initialize(&self) -> Result<(), StrategyError> {
        for strategy in self.strategies.values() {
            if let Err(error) = strategy.initialize().await {
                error!("failed to initialize {} strategy: {}", strategy.kind(), error);
                self.shutdown_strategies().await;
                return Err(error);
            }
        }

        self.initialized.store(true, Ordering::SeqCst);
        info!("initialized {} processing strategies", self.strategies.len());

        Ok(())
    }

    pub async fn dispatch(&self, event: &ProcessingEvent) -> ProcessingResult {
        let kind = &event.kind;
        let Some(strategy) = self.strategies.get(kind) else {
            warn!("unknown event kind: {}", kind);
            return ProcessingResult::failure(kind.clone(), FailureReason::UnknownKind);
        };
        if !self.is_initialized() {
            return ProcessingResult::failure(kind.clone(), FailureReason::NotInitialized);
        }
        if let Err(reason) = self.policy.check(&event.payload) {
            warn!("rejected {} event {}: {}", kind, event.id, reason);
            return ProcessingResult::failure(kind.clone(), reason);
        }

        if let Some(cached) = self.cache.get(kind, &event.payload).await {
            return cached;
        }

        let start = time::Instant::now();
        let result = match timeout(self.timeout, strategy.process(&event.payload)).await {
            Ok(Ok(result)) => {
                self.cache.put(kind, &event.payload, &result).await;
                result
            }
            Ok(Err(error)) => {
                error!("error processing {} event {}: {}", kind, event.id, error);
                ProcessingResult::failure(kind.clone(), FailureReason::Strategy(error.to_string()))
            }
            Err(_) => {
                error!(
                    "{} event {} timed out after {:?}",
                    kind, event.id, self.timeout
                );
                ProcessingResult::failure(kind.clone(), FailureReason::Timeout)
            }
        };

        metrics::histogram!("vision_dispatch_duration_seconds", "kind" => kind.to_string())
            .record(start.elapsed().as_secs_f64());

        result
    }

    /// Release every strategy. Safe to call before `initialize` and more than once.
    pub async fn shutdown(&self) {
        let was_initialized = self.initialized.swap(false, Ordering::SeqCst);
        self.shutdown_strategies().await;

        if was_initialized {
            info!("processing strategies shut down");
        }
    }

    async fn shutdown_strategies(&self) {
        for strategy in self.strategies.values() {
            strategy.shutdown().await;
        }
    }
}
