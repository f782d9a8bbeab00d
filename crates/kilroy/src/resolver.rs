//! Content resolution
//!
//! Turns stored records into the merged, display-ready objects the request
//! layer hands to clients. Places are followed to their current snapshot;
//! timestamps come from the records' last-write times.

use futures::stream::{self, StreamExt};
use kilroy_core::{
    ChildRef, Liveness, MaterialRef, ObjectId, Place, RecordKey, Result, Thing, User,
};
use kilroy_file_store::FileRecordStore;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Which pair of display fields a resolved object gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAs {
    /// Sets `sceneIdtag` / `sceneNametag`
    Scene,
    /// Sets `objectIdtag` / `objectNametag`
    Object,
}

/// A place or thing, resolved down to a thing snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedObject {
    /// The snapshot the content came from
    pub idvtag: String,
    /// Last write of the snapshot, in milliseconds since the epoch
    pub timestamp: u64,
    /// Last write of the first record in the chain (the place, if any)
    pub created: u64,
    pub nametags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_idtag: Option<String>,
    pub materials: Vec<MaterialRef>,
    pub children: Vec<ChildRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_idtag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_nametag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_idtag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_nametag: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ResolvedObject {
    pub fn nametag(&self) -> Option<&str> {
        self.nametags.first().map(String::as_str)
    }
}

/// Summary of a scene for result lists
///
/// A scene that could not be read comes back with only `scene_idtag` set.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSummary {
    pub scene_idtag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_nametag: Option<String>,
    pub nametags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_idtag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idvtag: Option<String>,
    /// Newest version timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

impl SceneSummary {
    fn placeholder(scene_idtag: &str) -> Self {
        Self {
            scene_idtag: scene_idtag.to_string(),
            ..Self::default()
        }
    }

    fn from_place(scene_idtag: &str, place: Place) -> Self {
        let timestamp = place.latest_timestamp().map(str::to_string);
        Self {
            scene_idtag: scene_idtag.to_string(),
            scene_nametag: place.nametag().map(str::to_string),
            nametags: place.nametags,
            desc: place.desc,
            user_idtag: place.user_idtag,
            idvtag: Some(place.idvtag),
            timestamp,
        }
    }
}

/// A user record as shown to other users
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedUser {
    pub user_idtag: String,
    /// Nametag, first name and last name, whichever are set
    pub nametags: Vec<String>,
    #[serde(flatten)]
    pub user: User,
}

/// Resolves records from one store
pub struct Resolver {
    store: Arc<FileRecordStore>,
}

impl Resolver {
    pub fn new(store: Arc<FileRecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<FileRecordStore> {
        &self.store
    }

    /// Read a record together with its last-write time
    async fn load<T: serde::de::DeserializeOwned>(&self, key: &RecordKey) -> Result<(T, u64)> {
        tokio::try_join!(self.store.get::<T>(key), self.store.modified_millis(key))
    }

    /// Resolve a place or thing
    ///
    /// A place is followed to its current snapshot; the result carries the
    /// place's id and its write time as `created`. A missing record is
    /// returned as `NotFound`.
    pub async fn resolve(&self, id: &ObjectId, role: ResolveAs) -> Result<ResolvedObject> {
        let (snapshot, created) = match id {
            ObjectId::Place(place_id) => {
                let (place, written) = self.load::<Place>(&RecordKey::place(place_id.as_str())?).await?;
                (place.idvtag, Some(written))
            }
            ObjectId::Thing(thing_id) => (thing_id.clone(), None),
        };

        let (thing, timestamp) = self.load::<Thing>(&RecordKey::thing(snapshot.as_str())?).await?;
        let nametag = thing.nametag().map(str::to_string);
        let mut resolved = ResolvedObject {
            idvtag: snapshot,
            timestamp,
            created: created.unwrap_or(timestamp),
            nametags: thing.nametags,
            desc: thing.desc,
            user_idtag: thing.user_idtag,
            materials: thing.materials,
            children: thing.children,
            scene_idtag: None,
            scene_nametag: None,
            object_idtag: None,
            object_nametag: None,
            extra: thing.extra,
        };
        match role {
            ResolveAs::Scene => {
                resolved.scene_idtag = Some(id.id().to_string());
                resolved.scene_nametag = nametag;
            }
            ResolveAs::Object => {
                resolved.object_idtag = Some(id.id().to_string());
                resolved.object_nametag = nametag;
            }
        }
        Ok(resolved)
    }

    /// Summarize many scenes, in order
    ///
    /// Never fails: a scene that cannot be read (for instance one deleted
    /// while still cited) becomes a placeholder.
    pub async fn resolve_scenes(&self, ids: &[String]) -> Vec<SceneSummary> {
        stream::iter(ids)
            .map(|id| async move {
                let place = match RecordKey::place(id.as_str()) {
                    Ok(key) => self.store.get::<Place>(&key).await,
                    Err(e) => Err(e),
                };
                match place {
                    Ok(place) => SceneSummary::from_place(id, place),
                    Err(e) => {
                        if !e.is_not_found() {
                            tracing::debug!("Scene {} unreadable: {}", id, e);
                        }
                        SceneSummary::placeholder(id)
                    }
                }
            })
            .buffered(self.store.config().fanout_limit.max(1))
            .collect()
            .await
    }

    pub async fn resolve_user(&self, id: &str) -> Result<ResolvedUser> {
        let user: User = self.store.get(&RecordKey::user(id)?).await?;
        let nametags = [&user.nametag, &user.firstname, &user.lastname]
            .into_iter()
            .flatten()
            .cloned()
            .collect();
        Ok(ResolvedUser {
            user_idtag: id.to_string(),
            nametags,
            user,
        })
    }
}

#[async_trait::async_trait]
impl Liveness for Resolver {
    /// A thing is live while its record exists; a place while its current
    /// snapshot does.
    async fn is_live(&self, id: &ObjectId) -> Result<bool> {
        match id {
            ObjectId::Thing(thing_id) => self.store.exists(&RecordKey::thing(thing_id.as_str())?).await,
            ObjectId::Place(place_id) => {
                let place = match self.store.get::<Place>(&RecordKey::place(place_id.as_str())?).await {
                    Ok(place) => place,
                    Err(e) if e.is_not_found() => return Ok(false),
                    Err(e) => return Err(e),
                };
                self.store.exists(&RecordKey::thing(place.idvtag.as_str())?).await
            }
        }
    }
}
