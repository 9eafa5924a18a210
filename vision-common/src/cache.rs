use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::warn;

use crate::event::EventKind;
use crate::redis::Client;
use crate::result::ProcessingResult;

pub const DEFAULT_RESULT_TTL: Duration = Duration::from_secs(3600);

/// Cache key for the result of processing `payload` as `kind`, e.g. `vision:text:<base64>`.
pub fn result_cache_key(kind: &EventKind, payload: &[u8]) -> Option<String> {
    kind.cache_namespace()
        .map(|namespace| format!("{}:{}", namespace, STANDARD.encode(payload)))
}

/// Content-addressed cache of processing results.
///
/// Best effort only: every redis error is logged and counted, then treated as a miss
/// (on reads) or ignored (on writes).
#[derive(Clone)]
pub struct ResultCache {
    client: Arc<dyn Client + Send + Sync>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(client: Arc<dyn Client + Send + Sync>, ttl: Duration) -> Self {
        Self { client, ttl }
    }

    pub async fn get(&self, kind: &EventKind, payload: &[u8]) -> Option<ProcessingResult> {
        let key = result_cache_key(kind, payload)?;

        let value = match self.client.get(key).await {
            Ok(Some(value)) => value,
            Ok(None) => {
                metrics::counter!("vision_cache_misses_total", "kind" => kind.to_string())
                    .increment(1);
                return None;
            }
            Err(error) => {
                warn!("failed to read cached {} result: {}", kind, error);
                metrics::counter!("vision_cache_errors_total", "op" => "get").increment(1);
                return None;
            }
        };

        match ProcessingResult::from_cache_value(kind, &value) {
            Ok(result) => {
                metrics::counter!("vision_cache_hits_total", "kind" => kind.to_string())
                    .increment(1);
                result
            }
            Err(error) => {
                warn!("ignoring unparseable cached {} result: {}", kind, error);
                metrics::counter!("vision_cache_errors_total", "op" => "parse").increment(1);
                None
            }
        }
    }

    pub async fn put(&self, kind: &EventKind, payload: &[u8], result: &ProcessingResult) {
        let Some(key) = result_cache_key(kind, payload) else {
            return;
        };
        let value = match result.to_cache_value() {
            Some(Ok(value)) => value,
            Some(Err(error)) => {
                warn!("failed to serialize {} result for caching: {}", kind, error);
                return;
            }
            None => return,
        };

        if let Err(error) = self.client.set_ex(key, value, self.ttl).await {
            warn!("failed to cache {} result: {}", kind, error);
            metrics::counter!("vision_cache_errors_total", "op" => "set").increment(1);
        }
    }
}
