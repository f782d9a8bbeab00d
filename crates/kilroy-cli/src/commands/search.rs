//! Search, refs and citations command implementations

use anyhow::{Context, Result};
use kilroy::prelude::*;

pub async fn search(db: &KilroyDb, text: &str, json: bool) -> Result<()> {
    let rows = db.search(text).await.context("Search failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if rows.is_empty() {
        println!("No matches for \"{}\"", text);
        return Ok(());
    }

    println!("{:<24} {:<24} Object", "Scene", "Snapshot");
    println!("{}", "=".repeat(72));
    for row in &rows {
        let scene = row.scene_nametag.as_deref().unwrap_or(&row.scene_idtag);
        let object = row
            .object_nametag
            .as_deref()
            .or(row.object_idtag.as_deref())
            .unwrap_or("-");
        println!("{:<24} {:<24} {}", scene, row.idvtag, object);
    }
    println!("\nTotal: {} result(s)", rows.len());

    Ok(())
}

pub async fn refs(db: &KilroyDb, object: &ObjectId) -> Result<()> {
    let scenes = db
        .referring_scenes(object)
        .await
        .with_context(|| format!("Failed to read references of {}", object))?;
    for scene in scenes {
        println!("{}", scene);
    }
    Ok(())
}

pub async fn citations(db: &KilroyDb, word: &str) -> Result<()> {
    let cited = db
        .citations_of(word)
        .await
        .with_context(|| format!("Failed to read citations of {}", word))?;
    for object in &cited {
        println!("{}", object);
    }
    println!("\nTotal: {} live citation(s)", cited.len());
    Ok(())
}
