use crate::error::Result;
use crate::types::ObjectId;
use async_trait::async_trait;

/// Answers whether an object id still names live content.
///
/// For a thing this is plain existence; for a place its current snapshot must
/// exist as well. The citation index is handed an implementation at
/// construction instead of reaching for the resolver itself.
#[async_trait]
pub trait Liveness: Send + Sync {
    async fn is_live(&self, id: &ObjectId) -> Result<bool>;
}
