//! Error types for the collector.

use crate::stats::GcStats;
use kilroy_core::KilroyError;
use thiserror::Error;

/// Result type for collector operations.
pub type Result<T> = std::result::Result<T, GcError>;

/// Errors that abort a collection pass.
#[derive(Debug, Error)]
pub enum GcError {
    /// Root enumeration or marking failed. Nothing was deleted.
    #[error("Mark phase failed: {0}")]
    Mark(#[source] KilroyError),

    /// Sweeping failed part way. `partial` holds what was done before.
    #[error("Sweep failed: {source}")]
    Sweep {
        #[source]
        source: KilroyError,
        partial: Box<GcStats>,
    },
}

impl GcError {
    /// Statistics gathered before the failure, if any
    pub fn partial_stats(&self) -> Option<&GcStats> {
        match self {
            GcError::Sweep { partial, .. } => Some(partial),
            GcError::Mark(_) => None,
        }
    }
}

impl From<KilroyError> for GcError {
    fn from(err: KilroyError) -> Self {
        GcError::Mark(err)
    }
}
