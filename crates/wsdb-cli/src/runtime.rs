//! Process-wide configuration and the service objects built from it.

use std::path::PathBuf;
use std::sync::Arc;

use wsdb_audit::JsonFileListingStore;
use wsdb_core::{AppConfig, ScrapeConfig};
use wsdb_scraper::{build_registry, AdapterRegistry, Fetcher, HeadlessPool, ImageCache, RateLimiter};

/// Newline-delimited deny-list kept next to the cached images.
const BAD_HASH_FILE: &str = "bad-hashes.txt";

pub(crate) struct Runtime {
    pub config: AppConfig,
    pub scrape: ScrapeConfig,
}

impl Runtime {
    /// Loads environment and scrape configuration. Any missing or invalid
    /// setting is fatal here, before a command starts work.
    pub fn load() -> anyhow::Result<Self> {
        let config = wsdb_core::load_app_config()?;
        let scrape = wsdb_core::load_scrape_config(&config.scrape_config_path)?;
        Ok(Self { config, scrape })
    }

    /// Adapters for every enabled platform, sharing one fetcher, rate
    /// limiter and headless pool.
    pub fn registry(&self) -> anyhow::Result<AdapterRegistry> {
        let limiter = Arc::new(RateLimiter::new(self.scrape.clone()));
        let headless = Arc::new(HeadlessPool::from_config(&self.config)?);
        let fetcher = Arc::new(Fetcher::from_config(&self.config, limiter, headless)?);
        Ok(build_registry(&self.config, &fetcher)?)
    }

    pub async fn store(&self) -> anyhow::Result<Arc<JsonFileListingStore>> {
        let store = JsonFileListingStore::open(&self.config.listings_path).await?;
        Ok(Arc::new(store))
    }

    pub fn bad_hash_path(&self) -> PathBuf {
        self.config.image_cache_dir.join(BAD_HASH_FILE)
    }

    /// Image cache seeded from the scrape config and the deny-list file.
    pub async fn image_cache(&self) -> anyhow::Result<ImageCache> {
        let cache = ImageCache::from_config(&self.config, &self.scrape)?;
        let loaded = cache.registry().load_file(&self.bad_hash_path()).await?;
        tracing::debug!(loaded, total = cache.registry().len(), "bad image hashes loaded");
        Ok(cache)
    }
}
