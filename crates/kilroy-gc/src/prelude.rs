//! Convenience re-exports for common types.

pub use crate::collector::{mark_materials, Collector};
pub use crate::error::{GcError, Result};
pub use crate::scheduler::GcScheduler;
pub use crate::stats::GcStats;
pub use kilroy_core::{GcConfig, StoreConfig};
pub use kilroy_file_store::FileRecordStore;
