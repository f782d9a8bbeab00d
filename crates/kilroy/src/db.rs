//! Unified kilroy database interface
//!
//! Provides a single entry point for the record store, the resolver, the
//! indexes and the collector, wired to one root directory.

use crate::index::{CitationIndex, ReferenceIndex};
use crate::media::{self, MediaManifest};
use crate::resolver::{ResolveAs, ResolvedObject, ResolvedUser, Resolver, SceneSummary};
use crate::search::{self, SearchResult};
use crate::{
    Collection, FileRecordStore, KilroyConfig, KilroyError, ObjectId, Record, RecordKey, Result,
    User, UserUpdate,
};
use futures::stream::{self, Stream, StreamExt};
use kilroy_core::MaterialRef;
use kilroy_file_store::Commit;
use kilroy_gc::{Collector, GcScheduler, GcStats};
use std::path::Path;
use std::sync::Arc;

/// Unified kilroy database
///
/// Bundles the store with everything built on it. All components share the
/// store; there is no global state, so several databases can be open in one
/// process.
pub struct KilroyDb {
    config: KilroyConfig,
    store: Arc<FileRecordStore>,
    resolver: Arc<Resolver>,
    references: ReferenceIndex,
    citations: CitationIndex,
    scheduler: GcScheduler,
}

impl KilroyDb {
    /// Open a kilroy database at the given path with default settings
    ///
    /// Creates one subdirectory per collection, e.g.
    /// - `{path}/mutable/place/`
    /// - `{path}/immutable/thing/`
    /// - `{path}/immutable/media/`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(KilroyConfig::new(path.as_ref()))
    }

    /// Open with a custom configuration
    pub fn open_with_config(config: KilroyConfig) -> Result<Self> {
        let store = Arc::new(FileRecordStore::open(config.store.clone())?);
        let resolver = Arc::new(Resolver::new(store.clone()));
        let references = ReferenceIndex::new(store.clone());
        let citations = CitationIndex::new(store.clone(), resolver.clone());
        let collector = Arc::new(Collector::new(store.clone(), config.gc.clone()));
        let scheduler = GcScheduler::new(collector);

        Ok(Self {
            config,
            store,
            resolver,
            references,
            citations,
            scheduler,
        })
    }

    /// Prepare the collector's generation space. Call once at startup.
    pub async fn initialize(&self) -> Result<()> {
        self.scheduler.initialize().await
    }

    pub fn config(&self) -> &KilroyConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    /// Get reference to the record store
    pub fn store(&self) -> &Arc<FileRecordStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    pub fn references(&self) -> &ReferenceIndex {
        &self.references
    }

    pub fn citations(&self) -> &CitationIndex {
        &self.citations
    }

    pub fn scheduler(&self) -> &GcScheduler {
        &self.scheduler
    }

    // ------------------------------------------------------------------
    // Objects
    // ------------------------------------------------------------------

    pub async fn resolve(&self, id: &ObjectId, role: ResolveAs) -> Result<ResolvedObject> {
        self.resolver.resolve(id, role).await
    }

    pub async fn resolve_scenes(&self, ids: &[String]) -> Vec<SceneSummary> {
        self.resolver.resolve_scenes(ids).await
    }

    pub async fn resolve_user(&self, id: &str) -> Result<ResolvedUser> {
        self.resolver.resolve_user(id).await
    }

    /// Store a place or thing
    ///
    /// The record's materials are re-marked first (they may have been
    /// uploaded in an earlier generation), then the record is written and
    /// marked in the current generation under one lock. Places and standalone things are then cited
    /// under the words of their nametag and description; a place's version
    /// snapshot (`is_version`) is not, since searches should lead back to the
    /// place.
    pub async fn update(&self, id: &str, record: &Record, is_version: bool) -> Result<()> {
        let object = match record {
            Record::Place(_) => ObjectId::place(id),
            Record::Thing(_) => ObjectId::thing(id),
            Record::User(_) => {
                return Err(KilroyError::InvalidState(format!(
                    "user {} must be written with update_user",
                    id
                )))
            }
        };
        let key = object.key()?;
        let bytes = record.encode(&key)?;
        // A stored record never names media the running pass may still sweep.
        kilroy_gc::mark_materials(&self.store, record.materials()).await?;
        self.store.set_marked(&key, &bytes).await?;
        if !is_version {
            self.citations
                .add_citations(&record.citation_text(), &object)
                .await?;
        }
        Ok(())
    }

    /// Delete one record from a collection named by the request layer
    ///
    /// `ext` is only used for media, whose ids carry their extension.
    pub async fn remove(&self, id: &str, collection: &str, ext: Option<&str>) -> Result<()> {
        let collection = match Collection::from_route_name(collection)? {
            Collection::Citation => {
                return Err(KilroyError::UnknownCollection(collection.to_string()))
            }
            other => other,
        };
        let key = match (collection, ext) {
            (Collection::Media, Some(ext)) => RecordKey::media(format!("{}.{}", id, ext))?,
            _ => RecordKey::new(collection, id)?,
        };
        self.store.delete(&key).await
    }

    // ------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------

    /// Merge a profile update into a user, creating the user if needed
    ///
    /// Scenes the update drops are handed to the collector while the user is
    /// still locked, so a pass reading its roots keeps them for this round.
    pub async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User> {
        let key = RecordKey::user(id)?;
        let collector = self.scheduler.collector();
        self.store
            .update_with(&key, |current: Option<User>| async move {
                let mut user = match current {
                    Some(user) => user,
                    None => {
                        tracing::info!(
                            "New user {} ({})",
                            id,
                            update.username.as_deref().unwrap_or("unnamed")
                        );
                        User::default()
                    }
                };
                let before = user.scenes.clone();
                update.apply(&mut user);
                let dropped: Vec<String> = before
                    .into_iter()
                    .filter(|scene| !user.scenes.contains(scene))
                    .collect();
                collector.retain_scenes(&dropped);
                Ok(Commit::Write(user.clone(), user))
            })
            .await
    }

    /// Every user record, one at a time
    pub fn iterate_users(&self) -> impl Stream<Item = Result<(String, User)>> + '_ {
        stream::once(self.store.list_ids(Collection::People))
            .flat_map(|listing| {
                let ids: Vec<Result<String>> = match listing {
                    Ok(ids) => ids.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(ids)
            })
            .then(move |id| async move {
                let id = id?;
                let user = self.store.get::<User>(&RecordKey::user(id.as_str())?).await?;
                Ok::<_, KilroyError>((id, user))
            })
    }

    // ------------------------------------------------------------------
    // References, citations and search
    // ------------------------------------------------------------------

    pub async fn add_reference(&self, object: &ObjectId, scene_id: &str) -> Result<()> {
        self.references.add_reference(object, scene_id).await
    }

    pub async fn referring_scenes(&self, object: &ObjectId) -> Result<Vec<String>> {
        self.references.referring_scenes(object).await
    }

    /// Record that `scene_id` uses every one of `objects`, then ask for a
    /// collection: a saved scene is when storage becomes garbage.
    pub async fn upload_refs(&self, scene_id: &str, objects: &[ObjectId]) -> Result<()> {
        let result = async {
            for object in objects {
                self.references.add_reference(object, scene_id).await?;
            }
            Ok::<(), KilroyError>(())
        }
        .await;
        self.scheduler.request_gc();
        result
    }

    pub async fn add_citations(&self, text: &str, object: &ObjectId) -> Result<()> {
        self.citations.add_citations(text, object).await
    }

    pub async fn citations_of(&self, word: &str) -> Result<Vec<ObjectId>> {
        self.citations.citations_of(word).await
    }

    pub async fn search_citations(&self, text: &str) -> Result<Vec<ObjectId>> {
        self.citations.search_citations(text).await
    }

    pub async fn search(&self, text: &str) -> Result<Vec<SearchResult>> {
        search::search(
            text,
            &self.resolver,
            &self.references,
            &self.citations,
            self.config.store.fanout_limit,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------

    /// Mark media for the current generation; returns how many were new
    pub async fn mark_materials(&self, materials: &[MaterialRef]) -> Result<u64> {
        kilroy_gc::mark_materials(&self.store, materials).await
    }

    pub async fn media_from_path(&self, id: &str, source: &Path) -> Result<()> {
        media::media_from_path(&self.store, id, source).await
    }

    pub async fn thumb_from_path(&self, id: &str, copies: &[String], source: &Path) -> Result<()> {
        media::thumb_from_path(&self.store, id, copies, source).await
    }

    pub async fn resolve_media(&self, id: &ObjectId) -> Result<MediaManifest> {
        media::resolve_media(&self.resolver, id).await
    }

    // ------------------------------------------------------------------
    // Collection
    // ------------------------------------------------------------------

    /// Ask for a collection pass soon (debounced)
    pub fn request_gc(&self) {
        self.scheduler.request_gc();
    }

    /// Run one collection pass now and wait for it
    pub async fn collect_now(&self) -> kilroy_gc::Result<GcStats> {
        self.scheduler.run_now().await
    }
}
