//! Shared counter storage.
//!
//! The limiter keeps no state of its own; every count lives behind
//! [`CounterStore`]. [`RedisCounterStore`] is the production backend,
//! shared by every guard process. [`MemoryCounterStore`] keeps counters in
//! the current process and is meant for single-instance setups and tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use thiserror::Error;
use tracing::info;

use crate::config::RedisConfig;

/// Snapshot of one counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterRecord {
    /// Requests counted in the active window. A missing key reads as zero.
    pub count: u64,
    /// Time until the window expires, if the key has an expiry.
    pub ttl: Option<Duration>,
}

/// Storage faults. These never reach the client.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
}

/// Fixed-window counters keyed by string.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Read the counter for `key`.
    async fn get(&self, key: &str) -> Result<CounterRecord, StoreError>;

    /// Increment the counter for `key` and start a `window` expiry if the key
    /// has none. Both happen as one atomic step; returns the new state.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterRecord, StoreError>;
}

/// INCR, then PEXPIRE only when the key carries no TTL yet.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Counters in a shared Redis instance.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    increment: Arc<Script>,
}

impl RedisCounterStore {
    /// Connect to Redis. The connection manager reconnects on its own afterwards.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        info!("Connecting to Redis...");
        let client = Client::open(config.url.as_str())?;
        let connection = ConnectionManager::new(client).await?;
        info!("Redis connection established");
        Ok(Self::from_connection(connection))
    }

    pub fn from_connection(connection: ConnectionManager) -> Self {
        Self {
            connection,
            increment: Arc::new(Script::new(INCREMENT_SCRIPT)),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<CounterRecord, StoreError> {
        let mut conn = self.connection.clone();
        let (count, pttl): (Option<u64>, i64) = redis::pipe()
            .cmd("GET")
            .arg(key)
            .cmd("PTTL")
            .arg(key)
            .query_async(&mut conn)
            .await?;

        Ok(CounterRecord {
            count: count.unwrap_or(0),
            ttl: ttl_from_millis(pttl),
        })
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<CounterRecord, StoreError> {
        let mut conn = self.connection.clone();
        let (count, pttl): (u64, i64) = self
            .increment
            .key(key)
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await?;

        Ok(CounterRecord {
            count,
            ttl: ttl_from_millis(pttl),
        })
    }
}

/// PTTL returns -2 for a missing key and -1 for a key without expiry.
fn ttl_from_millis(pttl: i64) -> Option<Duration> {
    u64::try_from(pttl).ok().map(Duration::from_millis)
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    count: u64,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// Increments between sweeps of expired counters.
const SWEEP_INTERVAL: u64 = 1024;

/// Counters held in this process.
///
/// Expired counters are dropped when read and by a sweep every
/// [`SWEEP_INTERVAL`] increments, so the map tracks live clients only.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    slots: DashMap<String, Slot>,
    increments: AtomicU64,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently tracked. Expired keys linger until the
    /// next read of that key or the next sweep.
    pub fn tracked_keys(&self) -> usize {
        self.slots.len()
    }

    /// Drop every expired counter. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.slots.len();
        self.slots.retain(|_, slot| slot.is_live(now));
        before.saturating_sub(self.slots.len())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<CounterRecord, StoreError> {
        let now = Instant::now();
        // Copy out so the shard lock is released before any removal.
        let slot = self.slots.get(key).map(|slot| *slot);
        match slot {
            Some(slot) if slot.is_live(now) => Ok(CounterRecord {
                count: slot.count,
                ttl: Some(slot.expires_at - now),
            }),
            Some(_) => {
                self.slots.remove_if(key, |_, slot| !slot.is_live(now));
                Ok(CounterRecord::default())
            }
            None => Ok(CounterRecord::default()),
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<CounterRecord, StoreError> {
        if (self.increments.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_INTERVAL == 0 {
            let purged = self.purge_expired();
            tracing::debug!(purged, remaining = self.slots.len(), "Swept expired counters");
        }

        let now = Instant::now();
        let mut slot = self.slots.entry(key.to_string()).or_insert(Slot {
            count: 0,
            expires_at: now + window,
        });
        if !slot.is_live(now) {
            *slot = Slot {
                count: 0,
                expires_at: now + window,
            };
        }
        slot.count += 1;

        Ok(CounterRecord {
            count: slot.count,
            ttl: Some(slot.expires_at - now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pttl_sentinels_mean_no_ttl() {
        assert_eq!(ttl_from_millis(-2), None);
        assert_eq!(ttl_from_millis(-1), None);
        assert_eq!(ttl_from_millis(1500), Some(Duration::from_millis(1500)));
    }

    #[tokio::test]
    async fn missing_key_reads_as_zero() {
        let store = MemoryCounterStore::new();
        assert_eq!(store.get("ip-limit:1.2.3.4").await.unwrap(), CounterRecord::default());
    }

    #[tokio::test]
    async fn increment_keeps_first_expiry() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);

        let first = store.increment("k", window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = store.increment("k", window).await.unwrap();

        assert_eq!(first.count, 1);
        assert_eq!(second.count, 2);
        assert!(second.ttl.unwrap() < first.ttl.unwrap());
        assert_eq!(store.get("k").await.unwrap().count, 2);
    }

    #[tokio::test]
    async fn expired_counter_resets() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_millis(30);

        store.increment("k", window).await.unwrap();
        store.increment("k", window).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.get("k").await.unwrap().count, 0);
        assert_eq!(store.increment("k", window).await.unwrap().count, 1);
        assert_eq!(store.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn reading_an_expired_counter_evicts_it() {
        let store = MemoryCounterStore::new();
        store.increment("k", Duration::from_millis(20)).await.unwrap();
        assert_eq!(store.tracked_keys(), 1);

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), CounterRecord::default());
        assert_eq!(store.tracked_keys(), 0);
    }

    #[tokio::test]
    async fn expired_clients_are_swept() {
        let store = MemoryCounterStore::new();
        for i in 0..10 {
            store
                .increment(&format!("ip-limit:10.0.0.{i}"), Duration::from_millis(20))
                .await
                .unwrap();
        }
        assert_eq!(store.tracked_keys(), 10);
        tokio::time::sleep(Duration::from_millis(40)).await;

        // Enough traffic from one live client to trigger a sweep.
        for _ in 0..SWEEP_INTERVAL {
            store.increment("ip-limit:live", Duration::from_secs(60)).await.unwrap();
        }
        assert_eq!(store.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn purge_keeps_live_counters() {
        let store = MemoryCounterStore::new();
        store.increment("old", Duration::from_millis(20)).await.unwrap();
        store.increment("new", Duration::from_secs(60)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.tracked_keys(), 1);
        assert_eq!(store.get("new").await.unwrap().count, 1);
    }

    #[tokio::test]
    async fn keys_are_independent() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(1);
        store.increment("a", window).await.unwrap();
        store.increment("a", window).await.unwrap();
        store.increment("b", window).await.unwrap();

        assert_eq!(store.get("a").await.unwrap().count, 2);
        assert_eq!(store.get("b").await.unwrap().count, 1);
    }
}
