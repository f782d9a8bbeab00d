//! Init and status command implementations

use anyhow::{Context, Result};
use kilroy::prelude::*;

pub fn init(db: &KilroyDb) -> Result<()> {
    println!("Initialized store at {}", db.root().display());
    for collection in Collection::ALL {
        println!("  {}", db.store().collection_dir(collection).display());
    }
    Ok(())
}

pub async fn execute(db: &KilroyDb) -> Result<()> {
    tracing::info!("Checking store status: {}", db.root().display());

    println!("\nStore Status");
    println!("{}", "=".repeat(60));
    println!("Root: {}", db.root().display());
    println!(
        "GC debounce: {}ms, starve delay: {}ms",
        db.config().gc.debounce_ms,
        db.config().gc.starve_delay_ms
    );

    println!("\n{:<12} {:>10} Collected", "Collection", "Records");
    println!("{}", "-".repeat(60));
    let mut total = 0;
    for collection in Collection::ALL {
        let count = db
            .store()
            .list_ids(collection)
            .await
            .with_context(|| format!("Failed to list {}", collection))?
            .len();
        total += count;
        let collected = if Collection::COLLECTED.contains(&collection) {
            "yes"
        } else {
            ""
        };
        println!("{:<12} {:>10} {}", collection.dir(), count, collected);
    }
    println!("\nTotal: {} record(s)", total);

    Ok(())
}
