//! Kilroy Core: record model and shared plumbing for the kilroy scene store
//!
//! Kilroy persists a graph of user-authored scenes on a plain file tree:
//! - Places: mutable named pointers to the current snapshot of a scene
//! - Things: immutable content snapshots that reference other things and media
//! - Media and thumbnails: large immutable blobs
//! - People, refs and citations: mutable bookkeeping records
//!
//! This crate holds what every other kilroy crate shares: the error type,
//! configuration, record schemas (including the legacy decode step), the
//! per-key lock manager and the optional metrics hooks.

pub mod config;
pub mod error;
pub mod lock_manager;
pub mod observe;
pub mod traits;
pub mod types;

pub use config::{GcConfig, KilroyConfig, StoreConfig};
pub use error::{KilroyError, Result};
pub use lock_manager::{KeyGuard, LockManager};
pub use traits::Liveness;
pub use types::{
    ChildRef, Collection, MaterialRef, ObjectId, Place, Record, RecordKey, Thing, User, UserUpdate,
};
