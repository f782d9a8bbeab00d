use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the file-backed record store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Base directory; every collection is a subdirectory of it
    pub root: PathBuf,

    /// Lock acquisition timeout in milliseconds (default: 5000)
    ///
    /// A per-key lock that cannot be acquired within this time fails the
    /// operation with `LockTimeout` instead of waiting forever.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    /// Number of shards in the lock table (default: 64)
    #[serde(default = "default_lock_shards")]
    pub lock_shards: usize,

    /// Maximum number of concurrent record reads for bulk operations such as
    /// resolving many scenes or filtering a citation list (default: 50)
    #[serde(default = "default_fanout_limit")]
    pub fanout_limit: usize,
}

fn default_lock_timeout() -> u64 {
    5000
}

fn default_lock_shards() -> usize {
    64
}

fn default_fanout_limit() -> usize {
    50
}

impl StoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_timeout_ms: default_lock_timeout(),
            lock_shards: default_lock_shards(),
            fanout_limit: default_fanout_limit(),
        }
    }

    pub fn with_lock_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.lock_timeout_ms = timeout_ms;
        self
    }

    pub fn with_fanout_limit(mut self, limit: usize) -> Self {
        self.fanout_limit = limit.max(1);
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}
