//! The expiring key/value port and its in-memory implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use rollcall_tick::SharedClock;
use tokio::sync::Mutex;

use crate::TokenError;

/// An ephemeral key/value store with per-key expiry.
///
/// Shaped after the handful of cache commands the token service needs, so
/// a networked cache can implement it with one call per method.
#[async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), TokenError>;

    /// Stores `value` under `key` with no expiry.
    async fn set(&self, key: &str, value: String) -> Result<(), TokenError>;

    /// Reads `key`. Expired keys read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, TokenError>;

    /// Removes `key`. Removing a missing key is not an error.
    async fn del(&self, key: &str) -> Result<(), TokenError>;
}

struct Entry {
    value: String,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|at| now < at)
    }
}

/// A [`TokenStore`] held in process memory.
///
/// Expiry is judged against the injected clock on read; expired entries
/// are evicted lazily (on the read that finds them) and in bulk on write.
pub struct MemoryTokenStore {
    clock: SharedClock,
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryTokenStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of live entries.
    pub async fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> Result<(), TokenError> {
        let now = self.clock.now();
        let ttl = TimeDelta::from_std(ttl).map_err(|e| TokenError::Store(e.to_string()))?;
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: Some(now + ttl),
            },
        );
        Ok(())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), TokenError> {
        self.entries.lock().await.insert(
            key.to_owned(),
            Entry {
                value,
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TokenError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(e) if e.is_live(now) => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn del(&self, key: &str) -> Result<(), TokenError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}
