//! Search results
//!
//! Joins the ranked citation list with the resolved objects and the scenes
//! that use them, one row per (object, scene) pair.

use crate::index::{CitationIndex, ReferenceIndex};
use crate::resolver::{ResolveAs, Resolver, ResolvedObject, SceneSummary};
use futures::stream::{self, StreamExt, TryStreamExt};
use kilroy_core::{KilroyError, ObjectId, Result};
use serde::Serialize;

/// One display row of a search
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    /// Snapshot to show for the object
    pub idvtag: String,
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_idtag: Option<String>,
    pub scene_idtag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_nametag: Option<String>,
    /// Set only when the object is not the scene itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_idtag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_nametag: Option<String>,
}

impl SearchResult {
    fn new(object: &ResolvedObject, scene: SceneSummary) -> Self {
        let object_idtag = object.object_idtag.clone();
        let is_scene = object_idtag.as_deref() == Some(scene.scene_idtag.as_str());
        Self {
            idvtag: object.idvtag.clone(),
            timestamp: object.timestamp,
            user_idtag: object.user_idtag.clone(),
            scene_idtag: scene.scene_idtag,
            scene_nametag: scene.scene_nametag,
            object_idtag: if is_scene { None } else { object_idtag },
            object_nametag: if is_scene {
                None
            } else {
                object.object_nametag.clone()
            },
        }
    }
}

/// Rows for one citing object; empty if the object has vanished since it
/// was found live.
async fn rows_for(
    id: ObjectId,
    resolver: &Resolver,
    references: &ReferenceIndex,
) -> Result<Vec<SearchResult>> {
    let object = async {
        match resolver.resolve(&id, ResolveAs::Object).await {
            Ok(object) => Ok(Some(object)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    };
    let scenes = async {
        let scene_ids = references.referring_scenes(&id).await?;
        Ok::<_, KilroyError>(resolver.resolve_scenes(&scene_ids).await)
    };
    let (object, scenes) = tokio::try_join!(object, scenes)?;

    let Some(object) = object else {
        return Ok(Vec::new());
    };
    Ok(scenes
        .into_iter()
        // A scene without a timestamp has been deleted or never saved.
        .filter(|scene| scene.timestamp.is_some())
        .map(|scene| SearchResult::new(&object, scene))
        .collect())
}

/// Search for `text`, best matches first
pub async fn search(
    text: &str,
    resolver: &Resolver,
    references: &ReferenceIndex,
    citations: &CitationIndex,
    fanout: usize,
) -> Result<Vec<SearchResult>> {
    let ranked = citations.search_citations(text).await?;
    let rows: Vec<Vec<SearchResult>> = stream::iter(ranked)
        .map(|id| rows_for(id, resolver, references))
        .buffered(fanout.max(1))
        .try_collect()
        .await?;
    Ok(rows.into_iter().flatten().collect())
}
