//! Reference and citation indexes
//!
//! References answer "which scenes use this object"; citations answer
//! "which objects mention this word". Both are append-only lists updated with
//! push-if-new. Citation lists are pruned lazily: every read drops ids that
//! are no longer live and writes the shorter list back.

use futures::stream::{self, StreamExt, TryStreamExt};
use kilroy_core::{observe, Liveness, ObjectId, RecordKey, Result};
use kilroy_file_store::{Commit, FileRecordStore};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Add `item` to the list stored at `key` unless it is already there.
///
/// Returns true if the list changed.
async fn push_if_new<T>(store: &FileRecordStore, key: &RecordKey, item: T) -> Result<bool>
where
    T: Serialize + DeserializeOwned + PartialEq,
{
    store
        .update(key, Vec::new(), |mut list: Vec<T>| async move {
            if list.contains(&item) {
                Ok(Commit::Keep(false))
            } else {
                list.push(item);
                Ok(Commit::Write(list, true))
            }
        })
        .await
}

/// Split text into upper-cased words, dropping empties and repeats.
///
/// Word characters are ASCII letters, digits and underscore.
pub fn words(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .map(str::to_ascii_uppercase)
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Scenes that use each object
pub struct ReferenceIndex {
    store: Arc<FileRecordStore>,
}

impl ReferenceIndex {
    pub fn new(store: Arc<FileRecordStore>) -> Self {
        Self { store }
    }

    /// Record that `scene_id` uses `object`. Idempotent.
    pub async fn add_reference(&self, object: &ObjectId, scene_id: &str) -> Result<()> {
        let key = object.refs_key()?;
        if push_if_new(&self.store, &key, scene_id.to_string()).await? {
            tracing::debug!("{} now referenced by scene {}", object, scene_id);
        }
        Ok(())
    }

    /// Scenes that use `object`
    ///
    /// An object nobody else has cited cites itself.
    pub async fn referring_scenes(&self, object: &ObjectId) -> Result<Vec<String>> {
        let key = object.refs_key()?;
        match self.store.get::<Vec<String>>(&key).await {
            Ok(scenes) => Ok(scenes),
            Err(e) if e.is_not_found() => Ok(vec![object.id().to_string()]),
            Err(e) => Err(e),
        }
    }
}

/// Objects that mention each word
pub struct CitationIndex {
    store: Arc<FileRecordStore>,
    liveness: Arc<dyn Liveness>,
}

impl CitationIndex {
    pub fn new(store: Arc<FileRecordStore>, liveness: Arc<dyn Liveness>) -> Self {
        Self { store, liveness }
    }

    fn fanout(&self) -> usize {
        self.store.config().fanout_limit.max(1)
    }

    /// Cite `object` under every distinct word of `text`
    pub async fn add_citations(&self, text: &str, object: &ObjectId) -> Result<()> {
        stream::iter(words(text))
            .map(|word| async move {
                let key = RecordKey::citation(&word)?;
                push_if_new(&self.store, &key, object.clone()).await
            })
            .buffer_unordered(self.fanout())
            .try_collect::<Vec<_>>()
            .await?;
        Ok(())
    }

    /// Live objects citing `word`
    ///
    /// The stored list is rewritten if any entry turned out to be dead. The
    /// citation stays locked while liveness is checked, so a concurrent
    /// citation of the same word waits rather than being lost in the rewrite.
    pub async fn citations_of(&self, word: &str) -> Result<Vec<ObjectId>> {
        if word.is_empty() {
            return Ok(Vec::new());
        }
        let key = RecordKey::citation(word)?;
        let liveness = self.liveness.clone();
        let fanout = self.fanout();
        self.store
            .update_with(&key, |current: Option<Vec<ObjectId>>| async move {
                let Some(cited) = current else {
                    return Ok(Commit::Keep(Vec::new()));
                };
                let checks: Vec<bool> = stream::iter(cited.clone())
                    .map(|id| {
                        let liveness = liveness.clone();
                        async move { liveness.is_live(&id).await }
                    })
                    .buffered(fanout)
                    .try_collect()
                    .await?;
                let live: Vec<ObjectId> = cited
                    .iter()
                    .zip(checks)
                    .filter_map(|(id, alive)| alive.then(|| id.clone()))
                    .collect();
                if live.len() == cited.len() {
                    Ok(Commit::Keep(cited))
                } else {
                    observe::record_citations_pruned(cited.len() - live.len());
                    tracing::debug!(
                        "Pruned {} dead citations of {}",
                        cited.len() - live.len(),
                        word
                    );
                    Ok(Commit::Write(live.clone(), live))
                }
            })
            .await
    }

    /// Objects citing any word of `text`, best match first
    ///
    /// Each distinct query word adds one to the score of every object citing
    /// it. Ties keep the order in which objects were first found.
    pub async fn search_citations(&self, text: &str) -> Result<Vec<ObjectId>> {
        let per_word: Vec<Vec<ObjectId>> = stream::iter(words(text))
            .map(|word| async move { self.citations_of(&word).await })
            .buffered(self.fanout())
            .try_collect()
            .await?;

        let mut order: Vec<ObjectId> = Vec::new();
        let mut scores: HashMap<ObjectId, u32> = HashMap::new();
        for id in per_word.into_iter().flatten() {
            let score = scores.entry(id.clone()).or_insert(0);
            if *score == 0 {
                order.push(id);
            }
            *score += 1;
        }
        order.sort_by_key(|id| std::cmp::Reverse(scores[id]));
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::Resolver;
    use kilroy_core::{Place, StoreConfig, Thing};
    use tempfile::TempDir;

    fn setup() -> (Arc<FileRecordStore>, ReferenceIndex, CitationIndex, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileRecordStore::open(StoreConfig::new(temp_dir.path())).unwrap());
        let resolver = Arc::new(Resolver::new(store.clone()));
        let references = ReferenceIndex::new(store.clone());
        let citations = CitationIndex::new(store.clone(), resolver);
        (store, references, citations, temp_dir)
    }

    async fn put_thing(store: &FileRecordStore, id: &str) {
        store
            .set(&RecordKey::thing(id).unwrap(), &Thing::new(id))
            .await
            .unwrap();
    }

    #[test]
    fn test_words() {
        assert_eq!(words("tall block, TALL  tower!"), vec!["TALL", "BLOCK", "TOWER"]);
        assert_eq!(words("snake_case x-ray"), vec!["SNAKE_CASE", "X", "RAY"]);
        assert!(words("  ,. ").is_empty());
    }

    #[tokio::test]
    async fn test_reference_idempotence() {
        let (store, references, _citations, _temp) = setup();
        let object = ObjectId::thing("t1");
        references.add_reference(&object, "p1").await.unwrap();
        references.add_reference(&object, "p1").await.unwrap();
        references.add_reference(&object, "p2").await.unwrap();

        assert_eq!(references.referring_scenes(&object).await.unwrap(), vec!["p1", "p2"]);
        let stored: Vec<String> = store.get(&object.refs_key().unwrap()).await.unwrap();
        assert_eq!(stored, vec!["p1", "p2"]);
    }

    #[tokio::test]
    async fn test_place_and_thing_refs_are_separate() {
        let (_store, references, _citations, _temp) = setup();
        references.add_reference(&ObjectId::place("x"), "p1").await.unwrap();
        references.add_reference(&ObjectId::thing("x"), "p2").await.unwrap();

        assert_eq!(references.referring_scenes(&ObjectId::place("x")).await.unwrap(), vec!["p1"]);
        assert_eq!(references.referring_scenes(&ObjectId::thing("x")).await.unwrap(), vec!["p2"]);
    }

    #[tokio::test]
    async fn test_uncited_object_refers_to_itself() {
        let (_store, references, _citations, _temp) = setup();
        let scenes = references
            .referring_scenes(&ObjectId::place("p7"))
            .await
            .unwrap();
        assert_eq!(scenes, vec!["p7"]);
    }

    #[tokio::test]
    async fn test_citations_round_trip() {
        let (store, _references, citations, _temp) = setup();
        put_thing(&store, "t1").await;
        citations
            .add_citations("tall block tall", &ObjectId::thing("t1"))
            .await
            .unwrap();

        assert_eq!(citations.citations_of("tall").await.unwrap(), vec![ObjectId::thing("t1")]);
        assert_eq!(citations.citations_of("BLOCK").await.unwrap(), vec![ObjectId::thing("t1")]);
        assert!(citations.citations_of("tower").await.unwrap().is_empty());
        assert!(citations.citations_of("").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_citations_self_heal() {
        let (store, _references, citations, _temp) = setup();
        put_thing(&store, "t1").await;
        put_thing(&store, "t2").await;
        citations.add_citations("block", &ObjectId::thing("t1")).await.unwrap();
        citations.add_citations("block", &ObjectId::thing("t2")).await.unwrap();

        store.delete(&RecordKey::thing("t1").unwrap()).await.unwrap();

        assert_eq!(citations.citations_of("block").await.unwrap(), vec![ObjectId::thing("t2")]);
        let stored: Vec<ObjectId> = store.get(&RecordKey::citation("block").unwrap()).await.unwrap();
        assert_eq!(stored, vec![ObjectId::thing("t2")]);
    }

    #[tokio::test]
    async fn test_place_citation_follows_current_version() {
        let (store, _references, citations, _temp) = setup();
        put_thing(&store, "t1").await;
        store
            .set(&RecordKey::place("p1").unwrap(), &Place::new("tower", "t1"))
            .await
            .unwrap();
        citations.add_citations("tower", &ObjectId::place("p1")).await.unwrap();
        assert_eq!(citations.citations_of("tower").await.unwrap().len(), 1);

        store.delete(&RecordKey::thing("t1").unwrap()).await.unwrap();
        assert!(citations.citations_of("tower").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_citation_target_keeps_list() {
        let (store, _references, citations, _temp) = setup();
        put_thing(&store, "t1").await;
        store
            .set(&RecordKey::place("p1").unwrap(), &Place::new("tower", "t1"))
            .await
            .unwrap();
        citations.add_citations("tower", &ObjectId::place("p1")).await.unwrap();
        citations.add_citations("tower", &ObjectId::thing("gone")).await.unwrap();

        store
            .set_buffer(&RecordKey::place("p1").unwrap(), b"not json")
            .await
            .unwrap();
        assert!(citations.citations_of("tower").await.is_err());

        // The failed read rewrote nothing, dead entry included.
        let stored: Vec<ObjectId> = store.get(&RecordKey::citation("tower").unwrap()).await.unwrap();
        assert_eq!(stored, vec![ObjectId::place("p1"), ObjectId::thing("gone")]);
    }

    #[tokio::test]
    async fn test_search_ranks_by_matching_words() {
        let (store, _references, citations, _temp) = setup();
        put_thing(&store, "one").await;
        put_thing(&store, "both").await;
        citations.add_citations("tall", &ObjectId::thing("one")).await.unwrap();
        citations.add_citations("tall block", &ObjectId::thing("both")).await.unwrap();

        let ranked = citations.search_citations("tall block").await.unwrap();
        assert_eq!(ranked, vec![ObjectId::thing("both"), ObjectId::thing("one")]);

        // Repeating a query word does not count twice.
        let ranked = citations.search_citations("tall tall tall block").await.unwrap();
        assert_eq!(ranked[0], ObjectId::thing("both"));
    }
}
