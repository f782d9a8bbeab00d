//! Per-key lock manager
//!
//! Provides one exclusive async lock per record key. Keys are hashed to
//! shards of a lock table; each shard maps a live key to its mutex. Entries
//! exist only while someone holds or waits for the key, so distinct keys never
//! share a lock and the table does not grow with the keyspace.

use crate::error::{KilroyError, Result};
use crate::observe;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use xxhash_rust::xxh3::xxh3_64;

/// Default lock acquisition timeout (5 seconds)
pub const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5000;

type Shard = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

struct LockTable {
    shards: Vec<Shard>,
}

impl LockTable {
    fn shard(&self, key: &str) -> &Shard {
        let hash = xxh3_64(key.as_bytes());
        &self.shards[(hash as usize) % self.shards.len()]
    }

    /// Drop the table entry for `key` once nobody holds or waits for it.
    fn release(&self, key: &str) {
        let mut shard = self.shard(key).lock();
        if let Some(entry) = shard.get(key) {
            if Arc::strong_count(entry) == 1 {
                shard.remove(key);
            }
        }
    }
}

/// Lock manager handing out exclusive per-key guards
///
/// Cloning is cheap; clones share the same table.
///
/// # Example
///
/// ```ignore
/// let lm = LockManager::new(64, Duration::from_secs(5));
/// let _guard = lm.lock("immutable/thing/t1").await?;
/// // read-modify-write of immutable/thing/t1
/// ```
#[derive(Clone)]
pub struct LockManager {
    table: Arc<LockTable>,
    default_timeout: Duration,
}

/// Guard for one key; the lock is released when it is dropped.
pub struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl KeyGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release the mutex before checking whether the entry can go.
        drop(self.guard.take());
        self.table.release(&self.key);
    }
}

impl LockManager {
    /// Create a lock manager
    ///
    /// # Panics
    ///
    /// Panics if `num_shards` is 0.
    pub fn new(num_shards: usize, default_timeout: Duration) -> Self {
        assert!(num_shards > 0, "num_shards must be positive");
        let shards = (0..num_shards).map(|_| Mutex::new(HashMap::new())).collect();
        Self {
            table: Arc::new(LockTable { shards }),
            default_timeout,
        }
    }

    /// Create a lock manager with the default timeout
    pub fn with_shards(num_shards: usize) -> Self {
        Self::new(num_shards, Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS))
    }

    /// Acquire the exclusive lock for `key`
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the lock is not acquired within the default
    /// timeout.
    pub async fn lock(&self, key: &str) -> Result<KeyGuard> {
        self.lock_with_timeout(key, self.default_timeout).await
    }

    /// Acquire the exclusive lock for `key` with a custom timeout
    pub async fn lock_with_timeout(&self, key: &str, timeout: Duration) -> Result<KeyGuard> {
        let mutex = {
            let mut shard = self.table.shard(key).lock();
            shard
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };

        let start = Instant::now();
        match tokio::time::timeout(timeout, mutex.lock_owned()).await {
            Ok(guard) => {
                observe::record_lock_wait(start.elapsed());
                Ok(KeyGuard {
                    key: key.to_string(),
                    guard: Some(guard),
                    table: self.table.clone(),
                })
            }
            Err(_) => {
                // The cancelled acquisition dropped its handle on the mutex.
                self.table.release(key);
                Err(KilroyError::LockTimeout {
                    key: key.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.table.shards.iter().map(|s| s.lock().len()).sum()
    }

    /// Get the default timeout
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }
}
