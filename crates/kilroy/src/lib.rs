//! Kilroy: scene storage with a realtime garbage collector
//!
//! Kilroy keeps a graph of user-authored scenes on a plain file tree:
//! - **Record store**: per-key locked get/set/update over JSON records and blobs
//! - **Resolver**: places followed to their current snapshot, legacy fields merged
//! - **Reference & citation indexes**: which scenes use an object, which objects
//!   mention a word, with lazy pruning of dead citations
//! - **Collector**: incremental mark-and-sweep from every user's scenes, run
//!   in the background shortly after storage activity
//!
//! # Quick Start
//!
//! ```no_run
//! use kilroy::prelude::*;
//!
//! # async fn run() -> Result<()> {
//! let db = KilroyDb::open("./data")?;
//! db.initialize().await?;
//!
//! let thing = Thing::new("block").with_desc("tall block");
//! db.update("t1", &Record::Thing(thing), false).await?;
//! db.update("p1", &Record::Place(Place::new("block", "t1").with_version("1000", "t1")), false).await?;
//! db.upload_refs("p1", &[ObjectId::thing("t1")]).await?;
//!
//! for row in db.search("tall").await? {
//!     println!("{} in {}", row.idvtag, row.scene_idtag);
//! }
//! # Ok(())
//! # }
//! ```

pub mod db;
pub mod index;
pub mod media;
pub mod prelude;
pub mod resolver;
pub mod search;

// Re-export core types
pub use kilroy_core::{
    config::{GcConfig, KilroyConfig, StoreConfig},
    error::{KilroyError, Result},
    traits::Liveness,
    types::{
        ChildRef, Collection, MaterialRef, ObjectId, Place, Record, RecordKey, Thing, User,
        UserUpdate,
    },
    LockManager,
};

// Re-export implementations
pub use kilroy_file_store::{Commit, FileRecordStore};
pub use kilroy_gc::{mark_materials, Collector, GcError, GcScheduler, GcStats};

// Re-export main types from this crate
pub use db::KilroyDb;
pub use index::{words, CitationIndex, ReferenceIndex};
pub use media::MediaManifest;
pub use resolver::{ResolveAs, ResolvedObject, ResolvedUser, Resolver, SceneSummary};
pub use search::SearchResult;
