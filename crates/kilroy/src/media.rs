//! Media ingestion and media manifests

use crate::resolver::{ResolveAs, Resolver, ResolvedObject};
use kilroy_core::{Collection, ObjectId, RecordKey, Result};
use kilroy_file_store::{FileRecordStore, Marker};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Every media file reachable from an object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaManifest {
    /// Nametag of the object the manifest was built for
    pub nametag: Option<String>,
    /// Directory holding the media files
    pub directory: PathBuf,
    /// Media file name to the nametag of the object that uses it
    pub resources: BTreeMap<String, String>,
}

impl MediaManifest {
    fn new(directory: PathBuf) -> Self {
        Self {
            nametag: None,
            directory,
            resources: BTreeMap::new(),
        }
    }

    /// Fold one resolved object into the manifest.
    fn absorb(mut self, object: &ResolvedObject) -> Self {
        let nametag = object.nametag().unwrap_or_default().to_string();
        if self.nametag.is_none() {
            self.nametag = Some(nametag.clone());
        }
        for material in &object.materials {
            self.resources
                .insert(material.media_name().to_string(), nametag.clone());
        }
        self
    }
}

/// Collect the media used by `id` and everything below it
///
/// Child places are followed to their current version.
pub async fn resolve_media(resolver: &Resolver, id: &ObjectId) -> Result<MediaManifest> {
    let directory = resolver.store().collection_dir(Collection::Media);
    let mut manifest = MediaManifest::new(directory);
    let mut pending = vec![id.clone()];
    while let Some(next) = pending.pop() {
        let object = resolver.resolve(&next, ResolveAs::Object).await?;
        pending.extend(object.children.iter().rev().map(|child| child.object_id()));
        manifest = manifest.absorb(&object);
    }
    Ok(manifest)
}

/// Move an uploaded media file into the store.
///
/// The media is marked first, so a collection pass running now keeps it
/// even if the thing that uses it is uploaded only after the pass traced.
/// `id` includes the file extension.
pub async fn media_from_path(store: &FileRecordStore, id: &str, source: &Path) -> Result<()> {
    let key = RecordKey::media(id)?;
    store.write_marker(&key, Marker::Written).await?;
    store.rename_into(source, &key).await
}

/// Move an uploaded thumbnail into place for `id`, then copy it to each of
/// `copies`.
pub async fn thumb_from_path(
    store: &FileRecordStore,
    id: &str,
    copies: &[String],
    source: &Path,
) -> Result<()> {
    let key = RecordKey::thumb(id)?;
    store.rename_into(source, &key).await?;
    if copies.is_empty() {
        return Ok(());
    }
    let data = store.get_buffer(&key).await?;
    for copy in copies {
        store.set_buffer(&RecordKey::thumb(copy.as_str())?, &data).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kilroy_core::{ChildRef, MaterialRef, Place, StoreConfig, Thing};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (Resolver, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRecordStore::open(StoreConfig::new(temp_dir.path())).unwrap();
        (Resolver::new(Arc::new(store)), temp_dir)
    }

    #[tokio::test]
    async fn test_resolve_media_walks_children() {
        let (resolver, _temp) = setup();
        let store = resolver.store();
        store
            .set(
                &RecordKey::thing("leg").unwrap(),
                &Thing::new("leg").with_material(MaterialRef::Name("oak.png".into())),
            )
            .await
            .unwrap();
        store
            .set(
                &RecordKey::thing("lamp-v2").unwrap(),
                &Thing::new("lamp").with_material(MaterialRef::Name("brass.png".into())),
            )
            .await
            .unwrap();
        store
            .set(&RecordKey::place("lamp").unwrap(), &Place::new("lamp", "lamp-v2"))
            .await
            .unwrap();
        store
            .set(
                &RecordKey::thing("table").unwrap(),
                &Thing::new("table")
                    .with_material(MaterialRef::Name("top.png".into()))
                    .with_child(ChildRef::thing("leg"))
                    .with_child(ChildRef::place("lamp", "lamp-v1")),
            )
            .await
            .unwrap();

        let manifest = resolve_media(&resolver, &ObjectId::thing("table"))
            .await
            .unwrap();
        assert_eq!(manifest.nametag.as_deref(), Some("table"));
        assert!(manifest.directory.ends_with("immutable/media"));
        assert_eq!(manifest.resources.len(), 3);
        assert_eq!(manifest.resources["top.png"], "table");
        assert_eq!(manifest.resources["oak.png"], "leg");
        assert_eq!(manifest.resources["brass.png"], "lamp");
    }

    #[tokio::test]
    async fn test_media_from_path_marks_before_landing() {
        let (resolver, temp) = setup();
        let store = resolver.store();
        store.initialize_generations().await.unwrap();
        let staged = temp.path().join("upload-1");
        std::fs::write(&staged, b"jpeg").unwrap();

        media_from_path(store, "photo.jpg", &staged).await.unwrap();

        let key = RecordKey::media("photo.jpg").unwrap();
        assert_eq!(store.get_buffer(&key).await.unwrap(), b"jpeg");
        assert!(store.is_marked(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_thumb_from_path_with_copies() {
        let (resolver, temp) = setup();
        let store = resolver.store();
        let staged = temp.path().join("upload-2");
        std::fs::write(&staged, b"png").unwrap();

        thumb_from_path(store, "t1", &["p1".to_string(), "p2".to_string()], &staged)
            .await
            .unwrap();

        for id in ["t1", "p1", "p2"] {
            let data = store.get_buffer(&RecordKey::thumb(id).unwrap()).await.unwrap();
            assert_eq!(data, b"png");
        }
    }
}
