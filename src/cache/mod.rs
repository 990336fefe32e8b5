//! Expiring key/value cache over a persistent [`KeyValueStore`].
//!
//! Entries are stored as `{data, timestamp, version}` JSON envelopes under
//! keys namespaced with [`CACHE_PREFIX`]. Read and write failures are logged
//! and treated as misses; the cache never fails its caller.

pub mod kv;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use kv::{KeyValueStore, MemoryKv, SqliteKv};

pub const CACHE_PREFIX: &str = "blog_";
pub const CACHE_VERSION: &str = "1.0";
pub const DEFAULT_TTL: Duration = Duration::from_secs(20 * 60);

pub mod keys {
    pub const POSTS: &str = "posts";
    pub const PREFERENCES: &str = "preferences";
    pub const USER: &str = "user";
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    data: T,
    timestamp: i64,
    version: String,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    timestamp: i64,
}

#[derive(Clone)]
pub struct Cache {
    kv: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl Cache {
    pub fn new(kv: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { kv, ttl }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()), DEFAULT_TTL)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn namespaced(key: &str) -> String {
        format!("{}{}", CACHE_PREFIX, key)
    }

    fn now_ms() -> i64 {
        Utc::now().timestamp_millis()
    }

    fn is_stale(&self, timestamp: i64) -> bool {
        let age = Self::now_ms().saturating_sub(timestamp).max(0) as u128;
        age >= self.ttl.as_millis()
    }

    pub fn set<T: Serialize>(&self, key: &str, value: &T) {
        let envelope = Envelope {
            data: value,
            timestamp: Self::now_ms(),
            version: CACHE_VERSION.to_string(),
        };
        let raw = match serde_json::to_string(&envelope) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Cache serialize error for {}: {}", key, e);
                return;
            }
        };
        if let Err(e) = self.kv.set(&Self::namespaced(key), &raw) {
            warn!("Cache write failed for {}: {}", key, e);
        }
    }

    /// Cached value for `key`, or `None` when missing, unreadable or older
    /// than the TTL. Expired entries are evicted unless `ignore_expiry`.
    pub fn get<T: DeserializeOwned>(&self, key: &str, ignore_expiry: bool) -> Option<T> {
        let namespaced = Self::namespaced(key);
        let raw = match self.kv.get(&namespaced) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!("Cache read error for {}: {}", key, e);
                return None;
            }
        };

        let envelope: Envelope<T> = match serde_json::from_str(&raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Cache read error for {}: {}", key, e);
                return None;
            }
        };

        if !ignore_expiry && self.is_stale(envelope.timestamp) {
            debug!("Cache entry {} expired", key);
            self.clear(key);
            return None;
        }

        Some(envelope.data)
    }

    /// Whether `key` is missing or past its TTL. Does not evict.
    pub fn is_expired(&self, key: &str) -> bool {
        match self.get_timestamp(key) {
            Some(timestamp) => self.is_stale(timestamp),
            None => true,
        }
    }

    /// Milliseconds since the epoch at which `key` was last written.
    pub fn get_timestamp(&self, key: &str) -> Option<i64> {
        let raw = self.kv.get(&Self::namespaced(key)).ok()??;
        serde_json::from_str::<EnvelopeHeader>(&raw)
            .ok()
            .map(|h| h.timestamp)
    }

    pub fn clear(&self, key: &str) {
        if let Err(e) = self.kv.remove(&Self::namespaced(key)) {
            warn!("Cache remove failed for {}: {}", key, e);
        }
    }

    /// Remove every entry whose key starts with `prefix`.
    pub fn clear_prefix(&self, prefix: &str) {
        self.remove_where(&Self::namespaced(prefix));
    }

    /// Remove every namespaced entry, leaving foreign keys untouched.
    pub fn clear_all(&self) {
        self.remove_where(CACHE_PREFIX);
    }

    fn remove_where(&self, starts_with: &str) {
        let keys = match self.kv.keys() {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache key listing failed: {}", e);
                return;
            }
        };
        for key in keys.into_iter().filter(|k| k.starts_with(starts_with)) {
            if let Err(e) = self.kv.remove(&key) {
                warn!("Cache remove failed for {}: {}", key, e);
            }
        }
    }
}
