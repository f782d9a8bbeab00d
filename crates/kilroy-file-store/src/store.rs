use kilroy_core::{
    error::{KilroyError, Result},
    lock_manager::{KeyGuard, LockManager},
    types::{decode_record, encode_record, Collection, RecordKey},
    StoreConfig,
};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Outcome of a read-modify-write transform
#[derive(Debug)]
pub enum Commit<T, R> {
    /// Replace the record with the value and return the result
    Write(T, R),
    /// Leave the record untouched and return the result
    Keep(R),
}

/// Identity of one collection pass
///
/// Markers left by the tracer carry it, so markers surviving an aborted pass
/// are never taken for work already done by a later one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

impl Generation {
    /// A generation starting now
    pub fn begin() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self(nanos)
    }

    pub fn started_at(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.0)
    }

    fn token(&self) -> String {
        self.0.to_string()
    }
}

/// Which kind of generation marker to leave for a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    /// The record was written by a live writer. Empty file; keeps the record
    /// through the next sweep but does not count as traced.
    Written,
    /// The collector read the record and queued its references
    Traced(Generation),
}

/// Per-collection sweep counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepCount {
    pub kept: u64,
    pub deleted: u64,
    pub stale_markers: u64,
}

/// File-backed record store
///
/// Each collection is a directory under the root; each record is one file.
/// Every operation on a key runs under that key's exclusive lock, and writes
/// replace the whole file through a temporary + rename, so readers see either
/// the old or the new content.
pub struct FileRecordStore {
    config: StoreConfig,
    locks: LockManager,
    tmp_counter: AtomicU64,
}

impl FileRecordStore {
    /// Open or create a store rooted at `config.root`
    pub fn open(config: StoreConfig) -> Result<Self> {
        for collection in Collection::ALL {
            std::fs::create_dir_all(config.root.join(collection.dir()))?;
        }
        for collection in Collection::COLLECTED {
            std::fs::create_dir_all(config.root.join(collection.generation_dir()))?;
        }
        let locks = LockManager::new(config.lock_shards.max(1), config.lock_timeout());
        Ok(Self {
            config,
            locks,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.config.root
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn collection_dir(&self, collection: Collection) -> PathBuf {
        self.config.root.join(collection.dir())
    }

    fn generation_dir(&self, collection: Collection) -> PathBuf {
        self.config.root.join(collection.generation_dir())
    }

    /// Path of the file holding `key`
    pub fn path(&self, key: &RecordKey) -> PathBuf {
        self.collection_dir(key.collection()).join(key.file_name())
    }

    fn marker_path(&self, key: &RecordKey) -> PathBuf {
        self.generation_dir(key.collection()).join(key.file_name())
    }

    async fn lock(&self, key: &RecordKey) -> Result<KeyGuard> {
        self.locks.lock(&key.to_string()).await
    }

    async fn read_unlocked(&self, key: &RecordKey) -> Result<Vec<u8>> {
        tokio::fs::read(self.path(key))
            .await
            .map_err(|e| KilroyError::from_io(key, e))
    }

    /// Write to a temporary file next to the target, then rename over it.
    async fn write_unlocked(&self, key: &RecordKey, data: &[u8]) -> Result<()> {
        let path = self.path(key);
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_file_name(format!(".{}.{}.tmp", key.file_name(), n));
        tokio::fs::write(&tmp, data).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn remove_unlocked(&self, key: &RecordKey) -> Result<()> {
        tokio::fs::remove_file(self.path(key))
            .await
            .map_err(|e| KilroyError::from_io(key, e))
    }

    /// Read raw bytes
    pub async fn get_buffer(&self, key: &RecordKey) -> Result<Vec<u8>> {
        let _guard = self.lock(key).await?;
        self.read_unlocked(key).await
    }

    /// Replace the record with raw bytes
    pub async fn set_buffer(&self, key: &RecordKey, data: &[u8]) -> Result<()> {
        let _guard = self.lock(key).await?;
        self.write_unlocked(key, data).await
    }

    /// Read and decode a JSON record
    pub async fn get<T: DeserializeOwned>(&self, key: &RecordKey) -> Result<T> {
        let bytes = self.get_buffer(key).await?;
        decode_record(key, &bytes)
    }

    /// Encode and write a JSON record
    pub async fn set<T: Serialize>(&self, key: &RecordKey, value: &T) -> Result<()> {
        let bytes = encode_record(key, value)?;
        self.set_buffer(key, &bytes).await
    }

    /// Delete a record; `NotFound` if it does not exist
    pub async fn delete(&self, key: &RecordKey) -> Result<()> {
        let _guard = self.lock(key).await?;
        self.remove_unlocked(key).await
    }

    pub async fn exists(&self, key: &RecordKey) -> Result<bool> {
        match tokio::fs::metadata(self.path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Last write time of a record, in milliseconds since the epoch
    pub async fn modified_millis(&self, key: &RecordKey) -> Result<u64> {
        let meta = tokio::fs::metadata(self.path(key))
            .await
            .map_err(|e| KilroyError::from_io(key, e))?;
        Ok(millis_since_epoch(meta.modified()?))
    }

    /// Atomic read-modify-write of a JSON record
    ///
    /// `transform` receives the current value, or `None` when the record does
    /// not exist, and decides whether to write. The key stays locked from the
    /// read until the write (or the decision not to write) completes. A
    /// failing transform leaves the record unchanged.
    pub async fn update_with<T, R, F, Fut>(&self, key: &RecordKey, transform: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> Fut,
        Fut: Future<Output = Result<Commit<T, R>>>,
    {
        let _guard = self.lock(key).await?;
        let current = match self.read_unlocked(key).await {
            Ok(bytes) => Some(decode_record(key, &bytes)?),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        match transform(current).await? {
            Commit::Write(value, result) => {
                let bytes = encode_record(key, &value)?;
                self.write_unlocked(key, &bytes).await?;
                Ok(result)
            }
            Commit::Keep(result) => Ok(result),
        }
    }

    /// Like [`FileRecordStore::update_with`], substituting `default` for a
    /// missing record
    pub async fn update<T, R, F, Fut>(&self, key: &RecordKey, default: T, transform: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(T) -> Fut,
        Fut: Future<Output = Result<Commit<T, R>>>,
    {
        self.update_with(key, move |current: Option<T>| {
            transform(current.unwrap_or(default))
        })
        .await
    }

    /// Move a staged file into the record's place
    ///
    /// The transfer into the staging area happens without holding any record
    /// lock; only the final rename is serialized with other operations on
    /// `key`. Source and store must be on the same filesystem.
    pub async fn rename_into(&self, source: &Path, key: &RecordKey) -> Result<()> {
        let _guard = self.lock(key).await?;
        tokio::fs::rename(source, self.path(key)).await?;
        Ok(())
    }

    /// Ids of every record in a collection
    pub async fn list_ids(&self, collection: Collection) -> Result<Vec<String>> {
        list_dir_ids(&self.collection_dir(collection), collection).await
    }

    /// Write a record and mark it in the current generation, under one lock.
    ///
    /// A record written this way survives the pass that is running (if any),
    /// even though the collector never reached it.
    pub async fn set_marked(&self, key: &RecordKey, data: &[u8]) -> Result<()> {
        let _guard = self.lock(key).await?;
        self.write_unlocked(key, data).await?;
        self.write_marker(key, Marker::Written).await?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Generation markers
    // ------------------------------------------------------------------

    /// Make every collected collection's generation directory exist and be
    /// empty. Markers left by an interrupted pass would otherwise be taken
    /// for proof of reachability.
    pub async fn initialize_generations(&self) -> Result<()> {
        for collection in Collection::COLLECTED {
            tokio::fs::create_dir_all(self.collection_dir(collection)).await?;
            let generation = self.generation_dir(collection);
            match tokio::fs::remove_dir_all(&generation).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            tokio::fs::create_dir_all(&generation).await?;
            tracing::info!("Initialized generation space {}", generation.display());
        }
        Ok(())
    }

    /// True if any marker exists for `key` in the current generation
    pub async fn is_marked(&self, key: &RecordKey) -> Result<bool> {
        match tokio::fs::metadata(self.marker_path(key)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// True if the collector already traced `key` in `generation`
    pub async fn is_traced(&self, key: &RecordKey, generation: Generation) -> Result<bool> {
        match tokio::fs::read(self.marker_path(key)).await {
            Ok(content) => Ok(content == generation.token().as_bytes()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Leave a marker for `key`. Returns true if no marker existed before.
    ///
    /// A `Written` marker never replaces an existing one; a `Traced` marker
    /// upgrades a `Written` one. Only collected records carry markers.
    pub async fn write_marker(&self, key: &RecordKey, marker: Marker) -> Result<bool> {
        if !key.collection().is_collected() {
            return Err(KilroyError::InvalidState(format!("{} is never collected", key)));
        }
        let path = self.marker_path(key);
        match marker {
            Marker::Written => {
                let created = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&path)
                    .await;
                match created {
                    Ok(_) => Ok(true),
                    Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
                    Err(e) => Err(e.into()),
                }
            }
            Marker::Traced(generation) => {
                let existed = self.is_marked(key).await?;
                tokio::fs::write(&path, generation.token()).await?;
                Ok(!existed)
            }
        }
    }

    /// Mark `key` as traced and return its content for the caller to trace.
    ///
    /// Returns `None` when the record was already traced in this generation,
    /// unless `force` is set; roots and place pointers force, because their
    /// content may have changed since they were traced.
    pub async fn mark(
        &self,
        key: &RecordKey,
        generation: Generation,
        force: bool,
    ) -> Result<Option<Vec<u8>>> {
        if !force && self.is_traced(key, generation).await? {
            return Ok(None);
        }
        // Someone may mark the key between the check and here. The work is
        // repeated, but the markers end up the same.
        let content = self.get_buffer(key).await?;
        self.write_marker(key, Marker::Traced(generation)).await?;
        Ok(Some(content))
    }

    /// Sweep one collection against its generation space.
    ///
    /// Every record with a marker is kept and its marker consumed; every
    /// record without one is deleted, together with the records `dependents`
    /// names for its id. Each decision is made under the record's lock,
    /// so a concurrent `set_marked` either lands first (and the record is
    /// kept) or after the delete (and simply recreates it). Markers older than
    /// the start of `generation` whose record does not exist are dropped as
    /// well.
    ///
    /// `count` is updated as the sweep goes so that a failure still reports
    /// what was done.
    pub async fn sweep_collection<F>(
        &self,
        collection: Collection,
        dependents: F,
        generation: Generation,
        count: &mut SweepCount,
    ) -> Result<()>
    where
        F: Fn(&str) -> Result<Vec<RecordKey>>,
    {
        let stale_before = generation.started_at();
        for id in self.list_ids(collection).await? {
            let key = RecordKey::new(collection, id.as_str())?;
            let guard = self.lock(&key).await?;
            match tokio::fs::remove_file(self.marker_path(&key)).await {
                Ok(()) => {
                    count.kept += 1;
                    drop(guard);
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    match self.remove_unlocked(&key).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(e),
                    }
                    drop(guard);
                    count.deleted += 1;
                    tracing::debug!("Swept {}", key);
                    for dependent_key in dependents(id.as_str())? {
                        match self.delete(&dependent_key).await {
                            Ok(()) => tracing::debug!("Swept {}", dependent_key),
                            Err(e) if e.is_not_found() => {}
                            Err(e) => return Err(e),
                        }
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        let generation = self.generation_dir(collection);
        for id in list_dir_ids(&generation, collection).await? {
            let key = RecordKey::new(collection, id.as_str())?;
            let _guard = self.lock(&key).await?;
            if self.exists(&key).await? {
                continue;
            }
            let marker = self.marker_path(&key);
            let modified = match tokio::fs::metadata(&marker).await {
                Ok(meta) => meta.modified()?,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if modified < stale_before {
                match tokio::fs::remove_file(&marker).await {
                    Ok(()) => count.stale_markers += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(())
    }
}

async fn list_dir_ids(dir: &Path, collection: Collection) -> Result<Vec<String>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut ids = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        // Temporary files from in-flight writes start with a dot.
        if name.starts_with('.') {
            continue;
        }
        if let Some(id) = collection.id_from_file_name(name) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

pub(crate) fn millis_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
