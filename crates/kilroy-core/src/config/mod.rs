pub mod gc;
pub mod store;

pub use gc::GcConfig;
pub use store::StoreConfig;

use crate::error::{KilroyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration: where the records live and how the collector runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KilroyConfig {
    pub store: StoreConfig,

    #[serde(default)]
    pub gc: GcConfig,
}

impl KilroyConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            store: StoreConfig::new(root),
            gc: GcConfig::default(),
        }
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)?;
        serde_json::from_str(&data)
            .map_err(|e| KilroyError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn with_gc(mut self, gc: GcConfig) -> Self {
        self.gc = gc;
        self
    }
}
