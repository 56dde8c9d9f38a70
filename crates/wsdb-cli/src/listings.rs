//! `search`, `refresh` and `weak` command handlers.

use wsdb_audit::{refresh_by_url, refresh_listing, ListingStore};
use wsdb_scraper::SearchOptions;

use crate::runtime::Runtime;

pub(crate) async fn run_search(
    runtime: &Runtime,
    platform: &str,
    query: &str,
    limit: usize,
    headless: Option<bool>,
    save: bool,
) -> anyhow::Result<()> {
    let registry = runtime.registry()?;
    let adapter = registry.require(platform)?;
    let options = SearchOptions {
        headless,
        cancel: None,
    };
    let stubs = adapter.search_listings(query, limit, &options).await;
    tracing::info!(platform, query, found = stubs.len(), "search finished");

    if !save {
        println!("{}", serde_json::to_string_pretty(&stubs)?);
        return Ok(());
    }

    let store = runtime.store().await?;
    let found = stubs.len();
    for stub in stubs {
        store.insert_stub(stub).await?;
    }
    println!(
        "saved {found} listings to {}",
        runtime.config.listings_path.display()
    );
    Ok(())
}

/// Refreshes one listing and reports the outcome. A failed upstream fetch is
/// reported as an error so the exit status reflects it.
pub(crate) async fn run_refresh(
    runtime: &Runtime,
    id: Option<i64>,
    url: Option<&str>,
) -> anyhow::Result<()> {
    let registry = runtime.registry()?;
    let store = runtime.store().await?;
    let classification = &runtime.config.classification;

    let outcome = match (id, url) {
        (Some(id), _) => refresh_listing(store.as_ref(), &registry, id, classification).await?,
        (None, Some(url)) => refresh_by_url(store.as_ref(), &registry, url, classification).await?,
        (None, None) => anyhow::bail!("refresh needs --id or --url"),
    };

    if !outcome.is_success() {
        anyhow::bail!("{outcome}");
    }
    println!("{outcome}");
    Ok(())
}

pub(crate) async fn run_weak(
    runtime: &Runtime,
    platform: Option<&str>,
    limit: usize,
) -> anyhow::Result<()> {
    let store = runtime.store().await?;
    let weak = store
        .find_weak(platform, None, limit, &runtime.config.classification)
        .await?;

    if weak.is_empty() {
        println!("no weak listings");
        return Ok(());
    }
    for listing in &weak {
        println!("{:>6}  {:<14} {}", listing.id, listing.stub.platform, listing.stub.source_url);
    }
    Ok(())
}
