pub mod gc;
pub mod search;
pub mod status;

use anyhow::{Context, Result};
use kilroy::prelude::*;

/// Open the store and prepare its generation space
pub async fn open(config: KilroyConfig) -> Result<KilroyDb> {
    let root = config.store.root.clone();
    let db = KilroyDb::open_with_config(config)
        .with_context(|| format!("Failed to open store at {}", root.display()))?;
    db.initialize()
        .await
        .context("Failed to initialize generation markers")?;
    Ok(db)
}
