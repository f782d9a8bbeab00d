use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KilroyError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Corrupt record {key}: {reason}")]
    Corruption { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown collection {0}")]
    UnknownCollection(String),

    #[error("Invalid id: {0:?}")]
    InvalidId(String),

    #[error("Timed out after {timeout_ms}ms waiting for lock on {key}")]
    LockTimeout { key: String, timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, KilroyError>;

impl KilroyError {
    /// Missing records are usually "empty" rather than failures; callers use
    /// this to decide.
    pub fn is_not_found(&self) -> bool {
        match self {
            KilroyError::NotFound(_) => true,
            KilroyError::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Map an I/O error on `key`, turning a missing file into `NotFound`.
    pub fn from_io(key: impl std::fmt::Display, err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::NotFound {
            KilroyError::NotFound(key.to_string())
        } else {
            KilroyError::Io(err)
        }
    }

    pub fn corruption(key: impl std::fmt::Display, reason: impl std::fmt::Display) -> Self {
        KilroyError::Corruption {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let err = KilroyError::from_io(
            "immutable/thing/t1",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(matches!(err, KilroyError::NotFound(ref k) if k == "immutable/thing/t1"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_other_io_errors_are_not_not_found() {
        let err = KilroyError::from_io(
            "mutable/place/p1",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, KilroyError::Io(_)));
        assert!(!err.is_not_found());
        assert!(!KilroyError::corruption("k", "bad json").is_not_found());
    }
}
