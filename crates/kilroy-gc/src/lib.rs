//! Kilroy GC
//!
//! An online, incremental mark-and-sweep collector for the kilroy record
//! store.
//!
//! # Overview
//!
//! - Roots are the scenes listed by every user record
//! - Marking is a work-queue traversal that yields to the runtime after every
//!   record, so request handling is never held up for long
//! - Survivors are recorded as marker files in each collection's
//!   `+generation` directory; the sweep deletes everything unmarked and
//!   consumes the markers
//! - Writers mark what they write, so anything created during a pass
//!   survives it
//! - [`GcScheduler`] debounces requests and reruns when storage keeps
//!   changing
//!
//! # Example
//!
//! ```ignore
//! use kilroy_gc::prelude::*;
//! use std::sync::Arc;
//!
//! let store = Arc::new(FileRecordStore::open(StoreConfig::new("./data"))?);
//! let collector = Arc::new(Collector::new(store, GcConfig::default()));
//! let scheduler = GcScheduler::new(collector);
//!
//! scheduler.initialize().await?;
//! // After every write that can change reachability:
//! scheduler.request_gc();
//! ```

pub mod collector;
pub mod error;
pub mod scheduler;
pub mod stats;

pub mod prelude;

pub use collector::{mark_materials, Collector};
pub use error::{GcError, Result};
pub use scheduler::GcScheduler;
pub use stats::GcStats;
