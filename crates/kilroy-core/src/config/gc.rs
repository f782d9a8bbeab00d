use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the garbage collector and its scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcConfig {
    /// Quiet period after a collection request before the pass starts
    /// Default: 2000ms
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// How long the tracer waits when its queue is empty but root
    /// enumeration has not finished
    /// Default: 20ms
    #[serde(default = "default_starve_delay_ms")]
    pub starve_delay_ms: u64,
}

fn default_debounce_ms() -> u64 {
    2000
}

fn default_starve_delay_ms() -> u64 {
    20
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            starve_delay_ms: default_starve_delay_ms(),
        }
    }
}

impl GcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_debounce_ms(mut self, ms: u64) -> Self {
        self.debounce_ms = ms;
        self
    }

    pub fn with_starve_delay_ms(mut self, ms: u64) -> Self {
        self.starve_delay_ms = ms;
        self
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn starve_delay(&self) -> Duration {
        Duration::from_millis(self.starve_delay_ms)
    }
}
