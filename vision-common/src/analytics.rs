use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::redis::{Client, CustomRedisError};

pub const CURRENT_KEY: &str = "analytics:current";
pub const HISTORY_KEY: &str = "analytics:history";
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// Rolling summary of one processed batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSnapshot {
    pub total_objects: u64,
    pub total_faces: u64,
    pub avg_processing_time_ms: f64,
    pub avg_confidence: f64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsSnapshot {
    pub fn empty(timestamp: DateTime<Utc>) -> Self {
        Self {
            total_objects: 0,
            total_faces: 0,
            avg_processing_time_ms: 0.0,
            avg_confidence: 0.0,
            timestamp,
        }
    }
}

/// Persists snapshots to redis: the latest one under `analytics:current`, and a capped
/// newest-first list under `analytics:history`. The cap is at least one entry.
#[derive(Clone)]
pub struct AnalyticsStore {
    client: Arc<dyn Client + Send + Sync>,
    history_limit: usize,
}

impl AnalyticsStore {
    pub fn new(client: Arc<dyn Client + Send + Sync>, history_limit: usize) -> Self {
        Self {
            client,
            history_limit: history_limit.max(1),
        }
    }

    pub async fn save(&self, snapshot: &AnalyticsSnapshot) -> Result<(), CustomRedisError> {
        let serialized = match serde_json::to_string(snapshot) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!("failed to serialize analytics snapshot: {}", error);
                return Ok(());
            }
        };

        self.client
            .set(CURRENT_KEY.to_owned(), serialized.clone())
            .await?;
        self.client
            .lpush_trim(HISTORY_KEY.to_owned(), serialized, self.history_limit)
            .await?;

        Ok(())
    }

    /// Read back up to `limit` persisted snapshots, newest first. Unparseable entries are skipped.
    pub async fn load_history(
        &self,
        limit: usize,
    ) -> Result<Vec<AnalyticsSnapshot>, CustomRedisError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = limit.min(self.history_limit) as isize - 1;
        let raw = self.client.lrange(HISTORY_KEY.to_owned(), 0, stop).await?;

        Ok(raw
            .iter()
            .filter_map(|entry| match serde_json::from_str(entry) {
                Ok(snapshot) => Some(snapshot),
                Err(error) => {
                    warn!("skipping unparseable analytics history entry: {}", error);
                    None
                }
            })
            .collect())
    }
}
