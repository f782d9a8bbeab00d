//! Record schemas
//!
//! Things, places and users are stored as JSON. Older records use the legacy
//! field names (`nametag`, `author`) and carry no `schema` number; they are
//! normalized once, while decoding, into the current shape. Fields that this
//! crate does not interpret are kept in `extra` so they survive a rewrite.

use crate::error::{KilroyError, Result};
use crate::types::collection::RecordKey;
use crate::types::ids::ObjectId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Schema number written with every thing and place
pub const SCHEMA_VERSION: u32 = 1;

/// A media reference inside a thing's `materials`
///
/// Either a bare media file name or an object whose `map` names the file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MaterialRef {
    Name(String),
    Map {
        map: String,
        #[serde(flatten)]
        extra: Map<String, Value>,
    },
}

impl MaterialRef {
    /// Media file name (with extension)
    pub fn media_name(&self) -> &str {
        match self {
            MaterialRef::Name(name) => name,
            MaterialRef::Map { map, .. } => map,
        }
    }
}

/// A child of a thing
///
/// A child with an `idvtag` is reached through the mutable place `idtag`,
/// pinned to the snapshot `idvtag`; otherwise `idtag` is an immutable thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildRef {
    pub idtag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idvtag: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChildRef {
    pub fn thing(idtag: impl Into<String>) -> Self {
        Self {
            idtag: idtag.into(),
            idvtag: None,
            extra: Map::new(),
        }
    }

    pub fn place(idtag: impl Into<String>, idvtag: impl Into<String>) -> Self {
        Self {
            idtag: idtag.into(),
            idvtag: Some(idvtag.into()),
            extra: Map::new(),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        if self.idvtag.is_some() {
            ObjectId::place(self.idtag.as_str())
        } else {
            ObjectId::thing(self.idtag.as_str())
        }
    }

    /// The immutable snapshot this child uses
    pub fn snapshot(&self) -> &str {
        self.idvtag.as_deref().unwrap_or(&self.idtag)
    }
}

/// Immutable content snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ThingWire")]
pub struct Thing {
    pub schema: u32,

    pub nametags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_idtag: Option<String>,

    #[serde(default)]
    pub materials: Vec<MaterialRef>,

    #[serde(default)]
    pub children: Vec<ChildRef>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Thing {
    pub fn new(nametag: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            nametags: vec![nametag.into()],
            desc: None,
            user_idtag: None,
            materials: Vec::new(),
            children: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_author(mut self, user_idtag: impl Into<String>) -> Self {
        self.user_idtag = Some(user_idtag.into());
        self
    }

    pub fn with_material(mut self, material: MaterialRef) -> Self {
        self.materials.push(material);
        self
    }

    pub fn with_child(mut self, child: ChildRef) -> Self {
        self.children.push(child);
        self
    }

    pub fn nametag(&self) -> Option<&str> {
        self.nametags.first().map(String::as_str)
    }

    /// Text indexed for search: the nametag followed by the description
    pub fn citation_text(&self) -> String {
        citation_text(self.nametag(), self.desc.as_deref())
    }
}

/// Mutable, versioned pointer to a thing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "PlaceWire")]
pub struct Place {
    pub schema: u32,

    pub nametags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_idtag: Option<String>,

    /// Current snapshot
    pub idvtag: String,

    /// Every snapshot that has been current, keyed by timestamp
    #[serde(default)]
    pub versions: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Place {
    pub fn new(nametag: impl Into<String>, idvtag: impl Into<String>) -> Self {
        Self {
            schema: SCHEMA_VERSION,
            nametags: vec![nametag.into()],
            desc: None,
            user_idtag: None,
            idvtag: idvtag.into(),
            versions: BTreeMap::new(),
            extra: Map::new(),
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_author(mut self, user_idtag: impl Into<String>) -> Self {
        self.user_idtag = Some(user_idtag.into());
        self
    }

    /// Record `idvtag` as a version and make it current.
    pub fn with_version(mut self, timestamp: impl Into<String>, idvtag: impl Into<String>) -> Self {
        let idvtag = idvtag.into();
        self.versions.insert(timestamp.into(), idvtag.clone());
        self.idvtag = idvtag;
        self
    }

    pub fn nametag(&self) -> Option<&str> {
        self.nametags.first().map(String::as_str)
    }

    /// All snapshots this place keeps alive, current one included
    pub fn version_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.versions.values().map(String::as_str).collect();
        if !ids.contains(&self.idvtag.as_str()) {
            ids.push(&self.idvtag);
        }
        ids
    }

    /// Newest version timestamp, comparing numerically when possible
    pub fn latest_timestamp(&self) -> Option<&str> {
        self.versions
            .keys()
            .max_by(|a, b| (a.len(), a.as_str()).cmp(&(b.len(), b.as_str())))
            .map(String::as_str)
    }

    pub fn citation_text(&self) -> String {
        citation_text(self.nametag(), self.desc.as_deref())
    }
}

fn citation_text(nametag: Option<&str>, desc: Option<&str>) -> String {
    match (nametag, desc) {
        (Some(n), Some(d)) => format!("{} {}", n, d),
        (Some(n), None) => n.to_string(),
        (None, Some(d)) => d.to_string(),
        (None, None) => String::new(),
    }
}

/// A person and the scenes they keep alive
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nametag: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub firstname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lastname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Place ids, most recently visited first. This is the GC root set.
    #[serde(default)]
    pub scenes: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_visited: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Profile and scene-list changes sent by the request layer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserUpdate {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub username: Option<String>,
    pub description: Option<String>,
    pub gender: Option<String>,
    /// Scene being visited
    pub scene: Option<String>,
    /// Scene to drop from the list
    pub obsolete: Option<String>,
    /// The visited scene belongs to this user
    #[serde(default)]
    pub is_mine: bool,
}

impl UserUpdate {
    /// Merge into `user`. Supplied fields win; the visited scene moves to the
    /// front of `scenes` (or is added there when it is the user's own).
    pub fn apply(self, user: &mut User) {
        fn merge(slot: &mut Option<String>, value: Option<String>) {
            if let Some(v) = value.filter(|v| !v.is_empty()) {
                *slot = Some(v);
            }
        }
        merge(&mut user.firstname, self.firstname);
        merge(&mut user.lastname, self.lastname);
        merge(&mut user.username, self.username);
        merge(&mut user.description, self.description);
        merge(&mut user.gender, self.gender);

        if let Some(obsolete) = &self.obsolete {
            user.scenes.retain(|s| s != obsolete);
        }
        if let Some(scene) = self.scene {
            if let Some(index) = user.scenes.iter().position(|s| *s == scene) {
                let lead = user.scenes.remove(index);
                user.scenes.insert(0, lead);
            } else if self.is_mine {
                user.scenes.insert(0, scene.clone());
            }
            user.last_visited = Some(scene);
        }
    }
}

/// Closed set of structured record variants
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    Place(Place),
    Thing(Thing),
    User(User),
}

impl Record {
    pub fn materials(&self) -> &[MaterialRef] {
        match self {
            Record::Thing(thing) => &thing.materials,
            _ => &[],
        }
    }

    pub fn citation_text(&self) -> String {
        match self {
            Record::Place(place) => place.citation_text(),
            Record::Thing(thing) => thing.citation_text(),
            Record::User(_) => String::new(),
        }
    }

    pub fn encode(&self, key: &RecordKey) -> Result<Vec<u8>> {
        match self {
            Record::Place(place) => encode_record(key, place),
            Record::Thing(thing) => encode_record(key, thing),
            Record::User(user) => encode_record(key, user),
        }
    }
}

/// Decode a JSON record; parse failures are corruption of `key`.
pub fn decode_record<T: DeserializeOwned>(key: &RecordKey, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| KilroyError::corruption(key, e))
}

pub fn encode_record<T: Serialize>(key: &RecordKey, value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| KilroyError::Serialization(format!("{}: {}", key, e)))
}

// On-disk shapes accepted by the decoder, legacy fields included.

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThingWire {
    #[serde(default)]
    schema: u32,
    nametags: Option<Vec<String>>,
    nametag: Option<String>,
    desc: Option<String>,
    user_idtag: Option<String>,
    author: Option<String>,
    #[serde(default)]
    materials: Vec<MaterialRef>,
    #[serde(default)]
    children: Vec<ChildRef>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<ThingWire> for Thing {
    type Error = String;

    fn try_from(wire: ThingWire) -> std::result::Result<Self, String> {
        let (nametags, user_idtag) = normalize(
            wire.schema,
            wire.nametags,
            wire.nametag,
            wire.user_idtag,
            wire.author,
        )?;
        Ok(Thing {
            schema: SCHEMA_VERSION,
            nametags,
            desc: wire.desc,
            user_idtag,
            materials: wire.materials,
            children: wire.children,
            extra: wire.extra,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceWire {
    #[serde(default)]
    schema: u32,
    nametags: Option<Vec<String>>,
    nametag: Option<String>,
    desc: Option<String>,
    user_idtag: Option<String>,
    author: Option<String>,
    idvtag: String,
    #[serde(default)]
    versions: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl TryFrom<PlaceWire> for Place {
    type Error = String;

    fn try_from(wire: PlaceWire) -> std::result::Result<Self, String> {
        let (nametags, user_idtag) = normalize(
            wire.schema,
            wire.nametags,
            wire.nametag,
            wire.user_idtag,
            wire.author,
        )?;
        Ok(Place {
            schema: SCHEMA_VERSION,
            nametags,
            desc: wire.desc,
            user_idtag,
            idvtag: wire.idvtag,
            versions: wire.versions,
            extra: wire.extra,
        })
    }
}

/// Schema 0 names the author `author` and has a single `nametag`; schema 1
/// uses `userIdtag` and `nametags`. Newer schemas are rejected.
fn normalize(
    schema: u32,
    nametags: Option<Vec<String>>,
    nametag: Option<String>,
    user_idtag: Option<String>,
    author: Option<String>,
) -> std::result::Result<(Vec<String>, Option<String>), String> {
    match schema {
        0 => Ok((
            nametags.unwrap_or_else(|| nametag.into_iter().collect()),
            user_idtag.or(author),
        )),
        SCHEMA_VERSION => Ok((nametags.unwrap_or_default(), user_idtag)),
        other => Err(format!("unsupported record schema {}", other)),
    }
}
