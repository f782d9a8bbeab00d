//! Per-pass statistics.

use chrono::{DateTime, Utc};
use kilroy_core::Collection;
use kilroy_file_store::SweepCount;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// What one collection pass saw and did
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStats {
    pub started_at: DateTime<Utc>,
    /// Users enumerated
    pub people: u64,
    /// Scene entries across all users' root lists
    pub scenes: u64,
    /// Place versions queued as roots
    pub versions: u64,
    /// Place records marked, roots and child pointers alike
    pub places: u64,
    /// Things traced
    pub things: u64,
    /// Media newly marked
    pub media: u64,
    /// Longest the work queue got
    pub max_queue: usize,
    pub elapsed_ms: u64,
    /// Sweep results per collection
    pub swept: BTreeMap<Collection, SweepCount>,
}

impl GcStats {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            people: 0,
            scenes: 0,
            versions: 0,
            places: 0,
            things: 0,
            media: 0,
            max_queue: 0,
            elapsed_ms: 0,
            swept: BTreeMap::new(),
        }
    }

    pub fn kept(&self) -> u64 {
        self.swept.values().map(|c| c.kept).sum()
    }

    pub fn deleted(&self) -> u64 {
        self.swept.values().map(|c| c.deleted).sum()
    }

    pub fn swept_in(&self, collection: Collection) -> SweepCount {
        self.swept.get(&collection).copied().unwrap_or_default()
    }

    /// Emit the pass summary as one structured event
    pub fn log(&self) {
        info!(
            started_at = %self.started_at,
            people = self.people,
            scenes = self.scenes,
            versions = self.versions,
            places = self.places,
            things = self.things,
            media = self.media,
            max_queue = self.max_queue,
            kept = self.kept(),
            deleted = self.deleted(),
            elapsed_ms = self.elapsed_ms,
            "Collection pass complete"
        );
    }
}
