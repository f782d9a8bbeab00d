//! Collection command implementation

use anyhow::{Context, Result};
use kilroy::prelude::*;

pub async fn execute(db: &KilroyDb, passes: u32, json: bool) -> Result<()> {
    for pass in 1..=passes.max(1) {
        let stats = db
            .collect_now()
            .await
            .with_context(|| format!("Collection pass {} failed", pass))?;

        if json {
            println!("{}", serde_json::to_string(&stats)?);
            continue;
        }

        println!("\nPass {} ({}ms)", pass, stats.elapsed_ms);
        println!(
            "  Traced: {} people, {} scenes, {} versions, {} things, {} media",
            stats.people, stats.scenes, stats.versions, stats.things, stats.media
        );
        println!("  Max queue: {}", stats.max_queue);
        for (collection, count) in &stats.swept {
            println!(
                "  {:<12} kept {:>6}  deleted {:>6}  stale markers {:>4}",
                collection.dir(),
                count.kept,
                count.deleted,
                count.stale_markers
            );
        }
        println!("  Total: kept {}, deleted {}", stats.kept(), stats.deleted());
    }

    Ok(())
}
