//! Object ids with an explicit kind
//!
//! Places and things share one namespace in citations, references and search
//! results, so every such id carries its kind instead of being guessed from
//! its shape.

use crate::error::{KilroyError, Result};
use crate::types::collection::{Collection, RecordKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ObjectId {
    /// A mutable, versioned place
    Place(String),
    /// An immutable thing snapshot
    Thing(String),
}

impl ObjectId {
    pub fn place(id: impl Into<String>) -> Self {
        ObjectId::Place(id.into())
    }

    pub fn thing(id: impl Into<String>) -> Self {
        ObjectId::Thing(id.into())
    }

    pub fn id(&self) -> &str {
        match self {
            ObjectId::Place(id) | ObjectId::Thing(id) => id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ObjectId::Place(_) => "place",
            ObjectId::Thing(_) => "thing",
        }
    }

    /// Key of the record this id names
    pub fn key(&self) -> Result<RecordKey> {
        match self {
            ObjectId::Place(id) => RecordKey::place(id.as_str()),
            ObjectId::Thing(id) => RecordKey::thing(id.as_str()),
        }
    }

    /// Key of the reference record listing the scenes that use this object
    ///
    /// The kind is part of the key, so a place and a thing with the same id
    /// keep separate lists.
    pub fn refs_key(&self) -> Result<RecordKey> {
        RecordKey::new(Collection::Refs, format!("{}-{}", self.kind(), self.id()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind(), self.id())
    }
}

impl FromStr for ObjectId {
    type Err = KilroyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once(':') {
            Some(("place", id)) if !id.is_empty() => Ok(ObjectId::place(id)),
            Some(("thing", id)) if !id.is_empty() => Ok(ObjectId::thing(id)),
            _ => Err(KilroyError::InvalidId(format!(
                "{} (expected place:<id> or thing:<id>)",
                s
            ))),
        }
    }
}
