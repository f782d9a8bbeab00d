//! Kilroy Prelude
//!
//! Import this to get all commonly used types:
//!
//! ```
//! use kilroy::prelude::*;
//! ```

// Core types
pub use crate::{KilroyDb, KilroyError, Result};

// Records and ids
pub use crate::{ChildRef, Collection, MaterialRef, ObjectId, Place, Record, RecordKey, Thing, User, UserUpdate};

// Configs
pub use crate::{GcConfig, KilroyConfig, StoreConfig};

// Results
pub use crate::{GcStats, MediaManifest, ResolveAs, ResolvedObject, SceneSummary, SearchResult};

// Re-export common external deps
pub use serde::{Deserialize, Serialize};
pub use std::sync::Arc;
pub use tracing;
