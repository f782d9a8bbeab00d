//! Collections and record keys
//!
//! Every record lives in exactly one collection, which maps to a directory
//! under the store root. A record's key is `(collection, id)`.

use crate::error::{KilroyError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the companion directory that holds generation markers
pub const GENERATION_SUFFIX: &str = "+generation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Place,
    Thing,
    Media,
    People,
    Refs,
    Citation,
    Thumb,
}

impl Collection {
    pub const ALL: [Collection; 7] = [
        Collection::Place,
        Collection::Thing,
        Collection::Media,
        Collection::People,
        Collection::Refs,
        Collection::Citation,
        Collection::Thumb,
    ];

    /// Collections reclaimed by the garbage collector, in sweep order
    pub const COLLECTED: [Collection; 3] = [Collection::Place, Collection::Thing, Collection::Media];

    /// Directory of this collection, relative to the store root
    pub fn dir(&self) -> &'static str {
        match self {
            Collection::Place => "mutable/place",
            Collection::Thing => "immutable/thing",
            Collection::Media => "immutable/media",
            Collection::People => "mutable/people",
            Collection::Refs => "mutable/refs",
            Collection::Citation => "mutable/citation",
            Collection::Thumb => "immutable/thumb",
        }
    }

    /// Directory of the new-generation markers for this collection
    pub fn generation_dir(&self) -> String {
        format!("{}{}", self.dir(), GENERATION_SUFFIX)
    }

    pub fn is_collected(&self) -> bool {
        Self::COLLECTED.contains(self)
    }

    fn extension(&self) -> &'static str {
        match self {
            // Media ids already carry their own extension.
            Collection::Media => "",
            Collection::Thumb => ".png",
            _ => ".json",
        }
    }

    /// File name of `id` inside this collection's directory
    pub fn file_name(&self, id: &str) -> String {
        format!("{}{}", id, self.extension())
    }

    /// Inverse of [`Collection::file_name`]; `None` for stray files.
    pub fn id_from_file_name<'a>(&self, name: &'a str) -> Option<&'a str> {
        let id = name.strip_suffix(self.extension())?;
        (!id.is_empty()).then_some(id)
    }

    /// Parse the collection names used by the request layer's delete route.
    pub fn from_route_name(name: &str) -> Result<Self> {
        match name {
            "place" => Ok(Collection::Place),
            "thing" => Ok(Collection::Thing),
            "media" => Ok(Collection::Media),
            "fbusr" | "people" => Ok(Collection::People),
            "refs" => Ok(Collection::Refs),
            "citation" => Ok(Collection::Citation),
            "thumb" => Ok(Collection::Thumb),
            other => Err(KilroyError::UnknownCollection(other.to_string())),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir())
    }
}

/// Storage key of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    collection: Collection,
    id: String,
}

impl RecordKey {
    /// Build a key, rejecting ids that could escape the collection directory.
    pub fn new(collection: Collection, id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        validate_id(&id)?;
        Ok(Self { collection, id })
    }

    pub fn place(id: impl Into<String>) -> Result<Self> {
        Self::new(Collection::Place, id)
    }

    pub fn thing(id: impl Into<String>) -> Result<Self> {
        Self::new(Collection::Thing, id)
    }

    pub fn media(file_name: impl Into<String>) -> Result<Self> {
        Self::new(Collection::Media, file_name)
    }

    pub fn user(id: impl Into<String>) -> Result<Self> {
        Self::new(Collection::People, id)
    }

    pub fn thumb(id: impl Into<String>) -> Result<Self> {
        Self::new(Collection::Thumb, id)
    }

    /// Citation records are keyed by the upper-cased word.
    pub fn citation(word: &str) -> Result<Self> {
        Self::new(Collection::Citation, word.to_uppercase())
    }

    pub fn collection(&self) -> Collection {
        self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn file_name(&self) -> String {
        self.collection.file_name(&self.id)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection.dir(), self.id)
    }
}

fn validate_id(id: &str) -> Result<()> {
    let bad = id.is_empty()
        || id.starts_with('.')
        || id.contains(['/', '\\', '\0'])
        || id.ends_with(GENERATION_SUFFIX);
    if bad {
        Err(KilroyError::InvalidId(id.to_string()))
    } else {
        Ok(())
    }
}
