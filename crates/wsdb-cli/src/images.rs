//! `image` and `deny-image` command handlers.

use wsdb_scraper::BadHashRegistry;

use crate::runtime::Runtime;

pub(crate) async fn run_resolve(runtime: &Runtime, url: &str, base: Option<&str>) -> anyhow::Result<()> {
    let cache = runtime.image_cache().await?;
    let entry = cache.resolve(url, base).await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);
    Ok(())
}

/// Deny-lists `hash` for this and every later process: the hash is appended
/// to the deny-list file and any cached copy is deleted.
pub(crate) async fn run_deny(runtime: &Runtime, hash: &str) -> anyhow::Result<()> {
    let hash = hash.trim().to_ascii_lowercase();
    let cache = runtime.image_cache().await?;
    let already_listed = cache.registry().contains(&hash);
    let removed = cache.deny(&hash).await?;
    if !already_listed {
        BadHashRegistry::append_to_file(&runtime.bad_hash_path(), &hash).await?;
    }
    let note = if removed { " (cached file removed)" } else { "" };
    println!("deny-listed {hash}{note}");
    Ok(())
}
