use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use tokio::sync::OnceCell;
use tokio::time::timeout;

#[derive(Error, Debug, Clone)]
pub enum CustomRedisError {
    #[error("Timeout error")]
    Timeout,
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Redis error: {0}")]
    Redis(Arc<redis::RedisError>),
    #[error("Redis unavailable: {0}")]
    Unavailable(String),
}

impl From<redis::RedisError> for CustomRedisError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            CustomRedisError::Timeout
        } else {
            CustomRedisError::Redis(Arc::new(err))
        }
    }
}

impl From<tokio::time::error::Elapsed> for CustomRedisError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        CustomRedisError::Timeout
    }
}

/// A simple redis wrapper
/// Only exposes the commands the queue, the result cache and the analytics store use.
/// Allows for testing + injecting failures.
#[async_trait]
pub trait Client {
    /// Push a value on the head of a list.
    async fn lpush(&self, k: String, v: String) -> Result<(), CustomRedisError>;

    /// Pop a value from the tail of a list, `None` if the list is empty.
    async fn rpop(&self, k: String) -> Result<Option<String>, CustomRedisError>;

    /// Push a value on the head of a list and trim the list to its first `max_len` values.
    /// A `max_len` of zero keeps only the pushed value.
    async fn lpush_trim(&self, k: String, v: String, max_len: usize)
        -> Result<(), CustomRedisError>;

    /// Read list values between `start` and `stop`, inclusive.
    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError>;

    async fn get(&self, k: String) -> Result<Option<String>, CustomRedisError>;

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError>;

    async fn set_ex(&self, k: String, v: String, ttl: Duration) -> Result<(), CustomRedisError>;
}

/// Commands share one multiplexed connection, opened on first use and re-established by
/// the connection manager when it drops.
pub struct RedisClient {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    timeout: Duration,
}

impl RedisClient {
    pub fn new(addr: String, timeout: Duration) -> Result<RedisClient, CustomRedisError> {
        let client = redis::Client::open(addr)
            .map_err(|e| CustomRedisError::InvalidConfiguration(e.to_string()))?;

        Ok(RedisClient {
            client,
            connection: OnceCell::new(),
            timeout,
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, CustomRedisError> {
        let manager = self
            .connection
            .get_or_try_init(|| async {
                match timeout(self.timeout, ConnectionManager::new(self.client.clone())).await {
                    Ok(connected) => connected.map_err(CustomRedisError::from),
                    Err(elapsed) => Err(CustomRedisError::from(elapsed)),
                }
            })
            .await?;

        Ok(manager.clone())
    }
}

#[async_trait]
impl Client for RedisClient {
    async fn lpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.lpush(k, v);
        let _: i64 = timeout(self.timeout, results).await??;

        Ok(())
    }

    async fn rpop(&self, k: String) -> Result<Option<String>, CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.rpop(k, None);
        let value: Option<String> = timeout(self.timeout, results).await??;

        Ok(value)
    }

    async fn lpush_trim(
        &self,
        k: String,
        v: String,
        max_len: usize,
    ) -> Result<(), CustomRedisError> {
        let mut conn = self.connection().await?;
        let stop = max_len.max(1) as isize - 1;

        let mut pipeline = redis::pipe();
        pipeline
            .atomic()
            .lpush(&k, v)
            .ignore()
            .ltrim(&k, 0, stop)
            .ignore();

        let results = pipeline.query_async::<_, ()>(&mut conn);
        timeout(self.timeout, results).await??;

        Ok(())
    }

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.lrange(k, start, stop);
        let values: Vec<String> = timeout(self.timeout, results).await??;

        Ok(values)
    }

    async fn get(&self, k: String) -> Result<Option<String>, CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.get(k);
        let value: Option<String> = timeout(self.timeout, results).await??;

        Ok(value)
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.set(k, v);
        let _: () = timeout(self.timeout, results).await??;

        Ok(())
    }

    async fn set_ex(&self, k: String, v: String, ttl: Duration) -> Result<(), CustomRedisError> {
        let mut conn = self.connection().await?;

        let results = conn.set_ex(k, v, ttl.as_secs() as usize);
        let _: () = timeout(self.timeout, results).await??;

        Ok(())
    }
}

#[derive(Default)]
struct MockStore {
    values: HashMap<String, (String, Option<Duration>)>,
    lists: HashMap<String, VecDeque<String>>,
}

/// In-memory stand-in for `RedisClient`.
/// Clones share the same store, so a test can keep a handle and inspect what was written.
#[derive(Clone, Default)]
pub struct MockRedisClient {
    store: Arc<Mutex<MockStore>>,
    unavailable: Arc<AtomicBool>,
    rpop_calls: Arc<AtomicUsize>,
}

impl MockRedisClient {
    pub fn new() -> MockRedisClient {
        MockRedisClient::default()
    }

    /// Make every subsequent command fail (or succeed again) as if redis was down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `rpop` commands issued so far, including failed ones.
    pub fn rpop_calls(&self) -> usize {
        self.rpop_calls.load(Ordering::SeqCst)
    }

    /// Snapshot of a list, head first.
    pub fn list(&self, k: &str) -> Vec<String> {
        self.lock()
            .lists
            .get(k)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// TTL a key was written with, `None` if missing or written without one.
    pub fn ttl(&self, k: &str) -> Option<Duration> {
        self.lock().values.get(k).and_then(|(_, ttl)| *ttl)
    }

    pub fn value(&self, k: &str) -> Option<String> {
        self.lock().values.get(k).map(|(value, _)| value.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockStore> {
        // A panicking test poisons the store, everything else can still read it.
        self.store.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_available(&self) -> Result<(), CustomRedisError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(CustomRedisError::Unavailable("mock redis is down".to_owned()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Client for MockRedisClient {
    async fn lpush(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.check_available()?;
        self.lock().lists.entry(k).or_default().push_front(v);
        Ok(())
    }

    async fn rpop(&self, k: String) -> Result<Option<String>, CustomRedisError> {
        self.rpop_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self.lock().lists.get_mut(&k).and_then(|list| list.pop_back()))
    }

    async fn lpush_trim(
        &self,
        k: String,
        v: String,
        max_len: usize,
    ) -> Result<(), CustomRedisError> {
        self.check_available()?;
        let mut store = self.lock();
        let list = store.lists.entry(k).or_default();
        list.push_front(v);
        list.truncate(max_len.max(1));
        Ok(())
    }

    async fn lrange(
        &self,
        k: String,
        start: isize,
        stop: isize,
    ) -> Result<Vec<String>, CustomRedisError> {
        self.check_available()?;
        let store = self.lock();
        let Some(list) = store.lists.get(&k) else {
            return Ok(Vec::new());
        };

        // Same index semantics as LRANGE: negative indexes count from the tail.
        let len = list.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
        if start > stop {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, k: String) -> Result<Option<String>, CustomRedisError> {
        self.check_available()?;
        Ok(self.lock().values.get(&k).map(|(value, _)| value.clone()))
    }

    async fn set(&self, k: String, v: String) -> Result<(), CustomRedisError> {
        self.check_available()?;
        self.lock().values.insert(k, (v, None));
        Ok(())
    }

    async fn set_ex(&self, k: String, v: String, ttl: Duration) -> Result<(), CustomRedisError> {
        self.check_available()?;
        self.lock().values.insert(k, (v, Some(ttl)));
        Ok(())
    }
}
