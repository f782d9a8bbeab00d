//! File-backed record store
//!
//! Stores every kilroy collection as a directory of files under one root:
//! - One file per record, JSON or raw bytes depending on the collection
//! - Exclusive per-key locking for every read and write
//! - Whole-file replacement (temp + rename), so readers never see a torn write
//! - Atomic read-modify-write through [`FileRecordStore::update_with`]
//! - Generation markers in a `+generation` companion directory per collected
//!   collection, consumed by the collector's sweep

mod store;

pub use store::{Commit, FileRecordStore, Generation, Marker, SweepCount};
