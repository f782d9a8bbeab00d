use kilroy_core::{
    ChildRef, Collection, GcConfig, ObjectId, Place, RecordKey, StoreConfig, Thing, User,
};
use kilroy_file_store::{Commit, FileRecordStore};
use kilroy_gc::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

async fn setup() -> (Arc<FileRecordStore>, GcScheduler, TempDir) {
    let data_dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileRecordStore::open(StoreConfig::new(data_dir.path())).unwrap());
    let config = GcConfig::new()
        .with_debounce_ms(20)
        .with_starve_delay_ms(1);
    let scheduler = GcScheduler::new(Arc::new(Collector::new(store.clone(), config)));
    scheduler.initialize().await.unwrap();
    (store, scheduler, data_dir)
}

/// t1 <- p1 <- u1, plus an orphan t2
async fn seed_scene(store: &FileRecordStore) {
    store
        .set(
            &RecordKey::thing("t1").unwrap(),
            &Thing::new("block").with_desc("tall block"),
        )
        .await
        .unwrap();
    store
        .set(
            &RecordKey::place("p1").unwrap(),
            &Place::new("block", "t1").with_version("1000", "t1"),
        )
        .await
        .unwrap();
    let user = User {
        scenes: vec!["p1".to_string()],
        ..User::default()
    };
    store.set(&RecordKey::user("u1").unwrap(), &user).await.unwrap();
    store
        .set(&RecordKey::thing("t2").unwrap(), &Thing::new("orphan"))
        .await
        .unwrap();
}

async fn exists(store: &FileRecordStore, key: RecordKey) -> bool {
    store.exists(&key).await.unwrap()
}

/// `bulk-u<i>` lists `bulk-p<i>`, whose only version is `bulk-t<i>`
async fn seed_bulk_users(store: &FileRecordStore, count: usize) {
    for i in 0..count {
        let thing = format!("bulk-t{}", i);
        let place = format!("bulk-p{}", i);
        store
            .set(&RecordKey::thing(thing.as_str()).unwrap(), &Thing::new("bulk"))
            .await
            .unwrap();
        store
            .set(
                &RecordKey::place(place.as_str()).unwrap(),
                &Place::new("bulk", thing.as_str()).with_version("1", thing.as_str()),
            )
            .await
            .unwrap();
        let user = User {
            scenes: vec![place],
            ..User::default()
        };
        store
            .set(&RecordKey::user(format!("bulk-u{}", i)).unwrap(), &user)
            .await
            .unwrap();
    }
}

/// Wait until the pass has left its first place marker (or is already over).
async fn wait_for_tracing<T>(store: &FileRecordStore, pass: &tokio::task::JoinHandle<T>) {
    let markers = store.root().join(Collection::Place.generation_dir());
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if pass.is_finished() {
                return;
            }
            let mut entries = tokio::fs::read_dir(&markers).await.unwrap();
            if entries.next_entry().await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_reachable_survive_orphan_swept() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    store
        .set_buffer(&RecordKey::thumb("t2").unwrap(), b"png")
        .await
        .unwrap();

    let stats = scheduler.run_now().await.unwrap();

    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(exists(&store, RecordKey::place("p1").unwrap()).await);
    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
    assert!(!exists(&store, RecordKey::thumb("t2").unwrap()).await);
    assert_eq!(stats.people, 1);
    assert_eq!(stats.scenes, 1);
    assert_eq!(stats.things, 1);
    assert_eq!(stats.swept_in(Collection::Thing).kept, 1);
    assert_eq!(stats.swept_in(Collection::Thing).deleted, 1);
}

#[tokio::test]
async fn test_consecutive_passes_keep_live_graph() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;

    scheduler.run_now().await.unwrap();
    let second = scheduler.run_now().await.unwrap();

    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(exists(&store, RecordKey::place("p1").unwrap()).await);
    assert_eq!(second.things, 1);
    assert_eq!(second.deleted(), 0);
    assert_eq!(scheduler.passes_completed(), 2);
}

#[tokio::test]
async fn test_unrooted_scene_is_collected() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    scheduler.run_now().await.unwrap();

    // The user forgets the scene; the next pass reclaims it all.
    store
        .set(&RecordKey::user("u1").unwrap(), &User::default())
        .await
        .unwrap();
    scheduler.run_now().await.unwrap();

    assert!(!exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(!exists(&store, RecordKey::place("p1").unwrap()).await);
}

#[tokio::test]
async fn test_old_versions_survive() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    store
        .set(&RecordKey::thing("t1b").unwrap(), &Thing::new("block"))
        .await
        .unwrap();
    store
        .set(
            &RecordKey::place("p1").unwrap(),
            &Place::new("block", "t1")
                .with_version("1000", "t1")
                .with_version("2000", "t1b"),
        )
        .await
        .unwrap();

    let stats = scheduler.run_now().await.unwrap();
    assert_eq!(stats.versions, 2);
    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(exists(&store, RecordKey::thing("t1b").unwrap()).await);
}

#[tokio::test]
async fn test_nested_children_survive() {
    let (store, scheduler, _dir) = setup().await;
    store
        .set(&RecordKey::thing("leaf").unwrap(), &Thing::new("leaf"))
        .await
        .unwrap();
    store
        .set(
            &RecordKey::thing("branch").unwrap(),
            &Thing::new("branch").with_child(ChildRef::thing("leaf")),
        )
        .await
        .unwrap();
    store
        .set(
            &RecordKey::thing("root").unwrap(),
            &Thing::new("root")
                .with_child(ChildRef::thing("branch"))
                .with_child(ChildRef::thing("leaf")),
        )
        .await
        .unwrap();
    store
        .set(
            &RecordKey::place("p").unwrap(),
            &Place::new("root", "root").with_version("1", "root"),
        )
        .await
        .unwrap();
    let user = User {
        scenes: vec!["p".to_string()],
        ..User::default()
    };
    store.set(&RecordKey::user("u").unwrap(), &user).await.unwrap();

    let stats = scheduler.run_now().await.unwrap();
    for id in ["root", "branch", "leaf"] {
        assert!(exists(&store, RecordKey::thing(id).unwrap()).await, "{} swept", id);
    }
    // The shared leaf is traced once.
    assert_eq!(stats.things, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_records_written_during_pass_survive() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    // Enough unrelated roots to keep the pass busy for a while.
    seed_bulk_users(&store, 50).await;

    let pass = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_now().await })
    };
    wait_for_tracing(&store, &pass).await;

    // A brand-new scene that no user lists yet.
    let t3 = serde_json::to_vec(&Thing::new("fresh")).unwrap();
    store
        .set_marked(&RecordKey::thing("t3").unwrap(), &t3)
        .await
        .unwrap();
    let p2 = serde_json::to_vec(&Place::new("fresh", "t3").with_version("1", "t3")).unwrap();
    store
        .set_marked(&RecordKey::place("p2").unwrap(), &p2)
        .await
        .unwrap();

    pass.await.unwrap().unwrap();

    assert!(exists(&store, RecordKey::thing("t3").unwrap()).await);
    assert!(exists(&store, RecordKey::place("p2").unwrap()).await);
    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scenes_dropped_during_tracing_survive_the_pass() {
    let (store, scheduler, _dir) = setup().await;
    let users = 300;
    seed_bulk_users(&store, users).await;

    let pass = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run_now().await })
    };
    wait_for_tracing(&store, &pass).await;

    // Every user drops their scene while the tracer is still working.
    for i in 0..users {
        store
            .set(&RecordKey::user(format!("bulk-u{}", i)).unwrap(), &User::default())
            .await
            .unwrap();
    }
    let stats = pass.await.unwrap().unwrap();

    // The pass traces from the scenes listed when it started.
    assert_eq!(stats.scenes, users as u64);
    for i in 0..users {
        let thing = RecordKey::thing(format!("bulk-t{}", i)).unwrap();
        assert!(exists(&store, thing).await, "bulk-t{} was swept", i);
    }
    assert_eq!(stats.swept_in(Collection::Thing).deleted, 0);

    // Unrooted now, so the next pass reclaims them.
    let next = scheduler.run_now().await.unwrap();
    assert_eq!(next.swept_in(Collection::Thing).deleted, users as u64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_scene_dropped_while_roots_are_read_is_retained() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    seed_bulk_users(&store, 20).await;

    // Hold u1 while the pass starts, so it reads u1 only after the scene is
    // gone. The writer hands the dropped scene over before committing.
    let collector = scheduler.collector().clone();
    let pass = store
        .update_with(&RecordKey::user("u1").unwrap(), |user: Option<User>| {
            let scheduler = scheduler.clone();
            async move {
                let mut user = user.unwrap_or_default();
                let pass = tokio::spawn(async move { scheduler.run_now().await });
                tokio::time::sleep(Duration::from_millis(100)).await;
                collector.retain_scenes(&user.scenes);
                user.scenes.clear();
                Ok(Commit::Write(user, pass))
            }
        })
        .await
        .unwrap();
    let stats = pass.await.unwrap().unwrap();

    assert!(exists(&store, RecordKey::place("p1").unwrap()).await);
    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
    assert_eq!(stats.scenes, 20);
    assert_eq!(stats.places, 21);

    // Outside a pass a dropped scene is just garbage.
    scheduler.collector().retain_scenes(&["p1".to_string()]);
    scheduler.run_now().await.unwrap();
    assert!(!exists(&store, RecordKey::place("p1").unwrap()).await);
    assert!(!exists(&store, RecordKey::thing("t1").unwrap()).await);
}

#[tokio::test]
async fn test_swept_thing_leaves_same_id_place_refs() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    let thing_refs = ObjectId::thing("t2").refs_key().unwrap();
    let place_refs = ObjectId::place("t2").refs_key().unwrap();
    store.set(&thing_refs, &vec!["p9"]).await.unwrap();
    store.set(&place_refs, &vec!["p1"]).await.unwrap();

    scheduler.run_now().await.unwrap();

    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
    assert!(!exists(&store, thing_refs).await);
    assert!(exists(&store, place_refs).await);
}

#[tokio::test]
async fn test_requests_are_debounced() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;

    scheduler.request_gc();
    scheduler.request_gc();
    scheduler.request_gc();
    assert!(!scheduler.is_idle());

    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
        .await
        .unwrap();
    assert_eq!(scheduler.passes_completed(), 1);
    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
    assert_eq!(scheduler.last_stats().unwrap().things, 1);
}

#[tokio::test]
async fn test_failed_pass_stops_and_recovers() {
    let (store, scheduler, _dir) = setup().await;
    seed_scene(&store).await;
    store
        .set_buffer(&RecordKey::place("p1").unwrap(), b"{")
        .await
        .unwrap();

    scheduler.request_gc();
    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
        .await
        .unwrap();
    assert_eq!(scheduler.passes_failed(), 1);
    assert_eq!(scheduler.passes_completed(), 0);
    // Nothing was deleted by the aborted pass.
    assert!(exists(&store, RecordKey::thing("t2").unwrap()).await);

    store
        .set(
            &RecordKey::place("p1").unwrap(),
            &Place::new("block", "t1").with_version("1000", "t1"),
        )
        .await
        .unwrap();
    scheduler.request_gc();
    tokio::time::timeout(Duration::from_secs(10), scheduler.wait_idle())
        .await
        .unwrap();
    assert_eq!(scheduler.passes_completed(), 1);
    assert!(exists(&store, RecordKey::thing("t1").unwrap()).await);
    assert!(!exists(&store, RecordKey::thing("t2").unwrap()).await);
}

#[test]
fn test_request_outside_runtime_is_ignored() {
    let data_dir = TempDir::new().unwrap();
    let store = Arc::new(FileRecordStore::open(StoreConfig::new(data_dir.path())).unwrap());
    let scheduler = GcScheduler::new(Arc::new(Collector::new(store, GcConfig::default())));

    scheduler.request_gc();
    assert!(scheduler.is_idle());
    assert_eq!(scheduler.passes_completed(), 0);
}
