//! Incremental mark-and-sweep over the record store.
//!
//! One pass ("generation") first snapshots every user's scenes, then runs
//! root enumeration and tracing side by side: the enumerator marks each
//! snapshotted place and sends the place's versions down a channel; the
//! tracer drains that channel into a work queue and marks one thing at a
//! time, yielding to the runtime after each. When the channel is closed and
//! the queue is empty, the sweep deletes every collected record that did not
//! get a marker.
//!
//! Scenes a user drops while the snapshot is being read are handed to the
//! collector through [`Collector::retain_scenes`] and traced as extra roots.

use crate::error::{GcError, Result};
use crate::stats::GcStats;
use chrono::Utc;
use kilroy_core::{
    observe, types::decode_record, Collection, GcConfig, KilroyError, MaterialRef, ObjectId,
    Place, RecordKey, Thing, User,
};
use kilroy_file_store::{FileRecordStore, Generation, Marker, SweepCount};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, warn};

/// Mark every media file named in `materials` for the current generation.
///
/// Returns how many were not marked before.
pub async fn mark_materials(
    store: &FileRecordStore,
    materials: &[MaterialRef],
) -> kilroy_core::Result<u64> {
    let mut newly_marked = 0;
    for material in materials {
        let key = RecordKey::media(material.media_name())?;
        if store.write_marker(&key, Marker::Written).await? {
            newly_marked += 1;
        }
    }
    Ok(newly_marked)
}

/// Scenes to trace from, read before tracing starts
#[derive(Debug, Default)]
struct RootSet {
    people: u64,
    listed: u64,
    scenes: Vec<String>,
}

#[derive(Debug, Default)]
struct RootCounts {
    versions: u64,
    places: u64,
}

#[derive(Debug, Default)]
struct TraceCounts {
    places: u64,
    things: u64,
    media: u64,
    max_queue: usize,
}

/// Runs collection passes against one store
pub struct Collector {
    store: Arc<FileRecordStore>,
    config: GcConfig,
    // Two passes must never interleave: each consumes the other's markers.
    pass_lock: tokio::sync::Mutex<()>,
    // Some while a pass is reading its root set.
    retained: Mutex<Option<Vec<String>>>,
}

impl Collector {
    pub fn new(store: Arc<FileRecordStore>, config: GcConfig) -> Self {
        Self {
            store,
            config,
            pass_lock: tokio::sync::Mutex::new(()),
            retained: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<FileRecordStore> {
        &self.store
    }

    pub fn config(&self) -> &GcConfig {
        &self.config
    }

    /// Keep `scenes` as roots of the pass currently reading its root set.
    ///
    /// Called by writers that remove scenes from a user, while the user
    /// record is still locked. Outside a pass this does nothing: a scene
    /// dropped before the snapshot is read is garbage, and one dropped after
    /// is already in the snapshot.
    pub fn retain_scenes(&self, scenes: &[String]) {
        if scenes.is_empty() {
            return;
        }
        if let Some(retained) = self.retained.lock().as_mut() {
            retained.extend(scenes.iter().cloned());
        }
    }

    /// Run one full generation: snapshot roots, mark, sweep.
    ///
    /// A mark-phase failure leaves every record in place. A sweep failure
    /// carries the statistics of the work done before it.
    pub async fn run_pass(&self) -> Result<GcStats> {
        let _pass = self.pass_lock.lock().await;
        let generation = Generation::begin();
        let start = Instant::now();
        let mut stats = GcStats::new(Utc::now());

        let outcome = match self.mark_phase(generation, &mut stats).await {
            Ok(()) => self.sweep_phase(generation, &mut stats).await,
            Err(e) => Err(e),
        };
        stats.elapsed_ms = start.elapsed().as_millis() as u64;
        observe::record_gc_pass(start.elapsed(), outcome.is_ok());

        match outcome {
            Ok(()) => {
                stats.log();
                Ok(stats)
            }
            Err(GcError::Sweep { source, .. }) => {
                error!(
                    kept = stats.kept(),
                    deleted = stats.deleted(),
                    "Sweep aborted: {}",
                    source
                );
                Err(GcError::Sweep {
                    source,
                    partial: Box::new(stats),
                })
            }
            Err(e) => {
                error!("Collection pass aborted: {}", e);
                Err(e)
            }
        }
    }

    async fn mark_phase(&self, generation: Generation, stats: &mut GcStats) -> Result<()> {
        let root_set = self.snapshot_roots().await?;
        stats.people = root_set.people;
        stats.scenes = root_set.listed;

        let (roots_tx, roots_rx) = mpsc::unbounded_channel();
        let (roots, traced) = tokio::try_join!(
            self.enumerate_roots(&root_set.scenes, generation, roots_tx),
            self.trace(generation, roots_rx),
        )?;

        stats.versions = roots.versions;
        stats.places = roots.places + traced.places;
        stats.things = traced.things;
        stats.media = traced.media;
        stats.max_queue = traced.max_queue;
        observe::record_marked("place", stats.places);
        observe::record_marked("thing", stats.things);
        observe::record_marked("media", stats.media);
        Ok(())
    }

    /// Read every user's scene list, plus the scenes writers dropped while
    /// the lists were being read.
    async fn snapshot_roots(&self) -> kilroy_core::Result<RootSet> {
        *self.retained.lock() = Some(Vec::new());
        let listed = self.read_user_scenes().await;
        let retained = self.retained.lock().take().unwrap_or_default();
        let mut root_set = listed?;

        let mut seen: HashSet<String> = root_set.scenes.iter().cloned().collect();
        let mut extra = 0;
        for scene in retained {
            if seen.insert(scene.clone()) {
                root_set.scenes.push(scene);
                extra += 1;
            }
        }
        debug!(
            people = root_set.people,
            scenes = root_set.listed,
            retained = extra,
            "Root set read"
        );
        Ok(root_set)
    }

    async fn read_user_scenes(&self) -> kilroy_core::Result<RootSet> {
        let mut root_set = RootSet::default();
        for user_id in self.store.list_ids(Collection::People).await? {
            let user_key = RecordKey::user(user_id.as_str())?;
            let user: User = match self.store.get(&user_key).await {
                Ok(user) => user,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            root_set.people += 1;
            root_set.listed += user.scenes.len() as u64;
            root_set.scenes.extend(user.scenes);
        }
        Ok(root_set)
    }

    /// Mark each root place and send its versions to the tracer. Dropping
    /// `roots` on return tells the tracer enumeration is over.
    async fn enumerate_roots(
        &self,
        scenes: &[String],
        generation: Generation,
        roots: UnboundedSender<String>,
    ) -> kilroy_core::Result<RootCounts> {
        let mut counts = RootCounts::default();
        for scene in scenes {
            let place_key = RecordKey::place(scene.as_str())?;
            // Forced: the place may have gained versions since it was
            // last marked.
            let content = match self.store.mark(&place_key, generation, true).await {
                Ok(Some(content)) => content,
                Ok(None) => continue,
                Err(e) if e.is_not_found() => {
                    warn!("Root scene {} is missing", scene);
                    continue;
                }
                Err(e) => return Err(e),
            };
            counts.places += 1;
            let place: Place = decode_record(&place_key, &content)?;
            for version in place.version_ids() {
                counts.versions += 1;
                roots.send(version.to_string()).map_err(|_| {
                    KilroyError::InvalidState("tracer stopped before enumeration".into())
                })?;
            }
            tokio::task::yield_now().await;
        }
        debug!(places = counts.places, versions = counts.versions, "Root enumeration complete");
        Ok(counts)
    }

    /// Drain roots into the work queue and trace until both are exhausted.
    async fn trace(
        &self,
        generation: Generation,
        mut roots: UnboundedReceiver<String>,
    ) -> kilroy_core::Result<TraceCounts> {
        let mut counts = TraceCounts::default();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut enumerating = true;

        loop {
            while enumerating {
                match roots.try_recv() {
                    Ok(id) => queue.push_back(id),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => enumerating = false,
                }
            }
            counts.max_queue = counts.max_queue.max(queue.len());
            observe::set_queue_len(queue.len());

            let Some(id) = queue.pop_front() else {
                if !enumerating {
                    break;
                }
                // Starved: more roots may still be coming.
                tokio::time::sleep(self.config.starve_delay()).await;
                continue;
            };

            self.trace_thing(&id, generation, &mut queue, &mut counts).await?;
            tokio::task::yield_now().await;
        }
        Ok(counts)
    }

    /// One unit of mark work: mark a thing, its materials and its children.
    async fn trace_thing(
        &self,
        id: &str,
        generation: Generation,
        queue: &mut VecDeque<String>,
        counts: &mut TraceCounts,
    ) -> kilroy_core::Result<()> {
        let key = RecordKey::thing(id)?;
        let content = match self.store.mark(&key, generation, false).await {
            Ok(Some(content)) => content,
            Ok(None) => return Ok(()),
            Err(e) if e.is_not_found() => {
                warn!("Reachable thing {} is missing", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        counts.things += 1;

        let thing: Thing = decode_record(&key, &content)?;
        counts.media += mark_materials(&self.store, &thing.materials).await?;

        for child in &thing.children {
            match &child.idvtag {
                Some(idvtag) => {
                    // The snapshot already pins the right version; only the
                    // pointer itself needs to survive.
                    let place_key = RecordKey::place(child.idtag.as_str())?;
                    match self.store.mark(&place_key, generation, true).await {
                        Ok(_) => counts.places += 1,
                        Err(e) if e.is_not_found() => {
                            warn!("Thing {} uses missing place {}", id, child.idtag)
                        }
                        Err(e) => return Err(e),
                    }
                    queue.push_back(idvtag.clone());
                }
                None => queue.push_back(child.idtag.clone()),
            }
        }
        Ok(())
    }

    async fn sweep_phase(&self, generation: Generation, stats: &mut GcStats) -> Result<()> {
        for collection in Collection::COLLECTED {
            let mut count = SweepCount::default();
            let result = self
                .store
                .sweep_collection(
                    collection,
                    |id| dependents(collection, id),
                    generation,
                    &mut count,
                )
                .await;
            observe::record_sweep(collection_label(collection), count.kept, count.deleted);
            debug!(
                %collection,
                kept = count.kept,
                deleted = count.deleted,
                stale_markers = count.stale_markers,
                "Swept collection"
            );
            stats.swept.insert(collection, count);
            if let Err(source) = result {
                return Err(GcError::Sweep {
                    source,
                    partial: Box::new(stats.clone()),
                });
            }
        }
        Ok(())
    }
}

/// Records that live and die with a swept record: a thing's thumbnail and
/// its reference list.
fn dependents(collection: Collection, id: &str) -> kilroy_core::Result<Vec<RecordKey>> {
    match collection {
        Collection::Thing => Ok(vec![RecordKey::thumb(id)?, ObjectId::thing(id).refs_key()?]),
        _ => Ok(Vec::new()),
    }
}

fn collection_label(collection: Collection) -> &'static str {
    match collection {
        Collection::Place => "place",
        Collection::Thing => "thing",
        Collection::Media => "media",
        Collection::People => "people",
        Collection::Refs => "refs",
        Collection::Citation => "citation",
        Collection::Thumb => "thumb",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kilroy_core::{ChildRef, StoreConfig};
    use tempfile::TempDir;

    async fn setup() -> (Collector, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRecordStore::open(StoreConfig::new(temp_dir.path())).unwrap();
        store.initialize_generations().await.unwrap();
        let collector = Collector::new(Arc::new(store), GcConfig::new().with_starve_delay_ms(1));
        (collector, temp_dir)
    }

    async fn put<T: serde::Serialize>(collector: &Collector, key: RecordKey, value: &T) {
        collector.store().set(&key, value).await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_store_pass() {
        let (collector, _temp) = setup().await;
        let stats = collector.run_pass().await.unwrap();
        assert_eq!(stats.people, 0);
        assert_eq!(stats.kept(), 0);
        assert_eq!(stats.deleted(), 0);
    }

    #[tokio::test]
    async fn test_child_place_pointer_survives() {
        let (collector, _temp) = setup().await;
        let store = collector.store().clone();

        // p1 -> t1, which uses the place p2 pinned at t2; p2 now points at t3.
        put(&collector, RecordKey::thing("t2").unwrap(), &Thing::new("leaf")).await;
        put(&collector, RecordKey::thing("t3").unwrap(), &Thing::new("newer leaf")).await;
        put(
            &collector,
            RecordKey::place("p2").unwrap(),
            &Place::new("leaf", "t2").with_version("1", "t2").with_version("2", "t3"),
        )
        .await;
        put(
            &collector,
            RecordKey::thing("t1").unwrap(),
            &Thing::new("room").with_child(ChildRef::place("p2", "t2")),
        )
        .await;
        put(
            &collector,
            RecordKey::place("p1").unwrap(),
            &Place::new("room", "t1").with_version("1", "t1"),
        )
        .await;
        let user = User {
            scenes: vec!["p1".into()],
            ..User::default()
        };
        put(&collector, RecordKey::user("u1").unwrap(), &user).await;

        let stats = collector.run_pass().await.unwrap();

        for key in [
            RecordKey::place("p1").unwrap(),
            RecordKey::place("p2").unwrap(),
            RecordKey::thing("t1").unwrap(),
            RecordKey::thing("t2").unwrap(),
        ] {
            assert!(store.exists(&key).await.unwrap(), "{} was swept", key);
        }
        // p2's history is not traced through the child pointer.
        assert!(!store.exists(&RecordKey::thing("t3").unwrap()).await.unwrap());
        assert_eq!(stats.places, 2);
        assert_eq!(stats.swept_in(Collection::Thing).deleted, 1);
    }

    #[tokio::test]
    async fn test_media_marked_through_materials() {
        let (collector, _temp) = setup().await;
        let store = collector.store().clone();

        store
            .set_buffer(&RecordKey::media("wood.png").unwrap(), b"wood")
            .await
            .unwrap();
        store
            .set_buffer(&RecordKey::media("stray.png").unwrap(), b"stray")
            .await
            .unwrap();
        put(
            &collector,
            RecordKey::thing("t1").unwrap(),
            &Thing::new("crate").with_material(MaterialRef::Name("wood.png".into())),
        )
        .await;
        put(
            &collector,
            RecordKey::place("p1").unwrap(),
            &Place::new("crate", "t1").with_version("1", "t1"),
        )
        .await;
        let user = User {
            scenes: vec!["p1".into()],
            ..User::default()
        };
        put(&collector, RecordKey::user("u1").unwrap(), &user).await;

        let stats = collector.run_pass().await.unwrap();
        assert_eq!(stats.media, 1);
        assert!(store.exists(&RecordKey::media("wood.png").unwrap()).await.unwrap());
        assert!(!store.exists(&RecordKey::media("stray.png").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_scene_is_skipped() {
        let (collector, _temp) = setup().await;
        let user = User {
            scenes: vec!["gone".into()],
            ..User::default()
        };
        put(&collector, RecordKey::user("u1").unwrap(), &user).await;

        let stats = collector.run_pass().await.unwrap();
        assert_eq!(stats.scenes, 1);
        assert_eq!(stats.places, 0);
    }

    #[tokio::test]
    async fn test_corrupt_record_aborts_without_deleting() {
        let (collector, _temp) = setup().await;
        let store = collector.store().clone();

        store
            .set_buffer(&RecordKey::thing("t1").unwrap(), b"not json")
            .await
            .unwrap();
        put(&collector, RecordKey::thing("orphan").unwrap(), &Thing::new("orphan")).await;
        put(
            &collector,
            RecordKey::place("p1").unwrap(),
            &Place::new("broken", "t1").with_version("1", "t1"),
        )
        .await;
        let user = User {
            scenes: vec!["p1".into()],
            ..User::default()
        };
        put(&collector, RecordKey::user("u1").unwrap(), &user).await;

        let err = collector.run_pass().await.unwrap_err();
        assert!(matches!(err, GcError::Mark(KilroyError::Corruption { .. })));
        assert!(err.partial_stats().is_none());
        assert!(store.exists(&RecordKey::thing("orphan").unwrap()).await.unwrap());
    }

    #[tokio::test]
    async fn test_retained_scenes_only_gathered_while_reading_roots() {
        let (collector, _temp) = setup().await;
        collector.retain_scenes(&["p1".to_string()]);
        assert!(collector.retained.lock().is_none());

        *collector.retained.lock() = Some(Vec::new());
        collector.retain_scenes(&["p1".to_string(), "p2".to_string()]);
        collector.retain_scenes(&[]);
        assert_eq!(
            *collector.retained.lock(),
            Some(vec!["p1".to_string(), "p2".to_string()])
        );

        // A pass gathers afresh and stops when its roots are read.
        let stats = collector.run_pass().await.unwrap();
        assert_eq!(stats.places, 0);
        assert!(collector.retained.lock().is_none());
    }

    #[tokio::test]
    async fn test_mark_materials_counts_new_markers() {
        let (collector, _temp) = setup().await;
        let materials = vec![
            MaterialRef::Name("a.png".into()),
            MaterialRef::Name("b.png".into()),
        ];
        assert_eq!(mark_materials(collector.store(), &materials).await.unwrap(), 2);
        assert_eq!(mark_materials(collector.store(), &materials).await.unwrap(), 0);
    }
}
