//! Content-addressable image cache.
//!
//! Entries are keyed by the SHA-1 of the normalized image URL, not of the
//! bytes: two URLs serving the same picture are cached twice. Hashes on the
//! [`BadHashRegistry`] are refused before any lookup or download, and
//! concurrent resolves of one hash share a single download.

mod registry;
mod store;

pub use registry::BadHashRegistry;
pub use store::{extension_for, CacheEntry, FsImageStore, ImageStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::header::CONTENT_TYPE;
use sha1::{Digest, Sha1};
use thiserror::Error;
use wsdb_core::{AppConfig, ScrapeConfig};

use crate::canonical::normalize_image_url;

/// Cloneable so one download result can be handed to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ImageCacheError {
    #[error("bad image asset {hash}: {reason}")]
    BadImageAsset { hash: String, reason: String },

    #[error("invalid image URL \"{0}\"")]
    InvalidUrl(String),

    #[error("invalid image hash \"{0}\"")]
    InvalidHash(String),

    #[error("image download failed: {0}")]
    Download(String),

    #[error("image store I/O error: {0}")]
    Io(String),
}

/// Lowercase hex SHA-1 of `url`.
#[must_use]
pub fn url_hash(url: &str) -> String {
    let digest = Sha1::digest(url.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

type InFlight = Shared<BoxFuture<'static, Result<CacheEntry, ImageCacheError>>>;

pub struct ImageCache {
    client: reqwest::Client,
    store: Arc<dyn ImageStore>,
    registry: Arc<BadHashRegistry>,
    max_bytes: u64,
    in_flight: Mutex<HashMap<String, InFlight>>,
}

impl ImageCache {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        store: Arc<dyn ImageStore>,
        registry: Arc<BadHashRegistry>,
        max_bytes: u64,
    ) -> Self {
        Self {
            client,
            store,
            registry,
            max_bytes,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Filesystem-backed cache under `WSDB_IMAGE_CACHE_DIR`, with the
    /// registry seeded from the scrape config.
    ///
    /// # Errors
    ///
    /// Returns [`ImageCacheError::Download`] if the HTTP client cannot be built.
    pub fn from_config(config: &AppConfig, scrape: &ScrapeConfig) -> Result<Self, ImageCacheError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| ImageCacheError::Download(e.to_string()))?;
        Ok(Self::new(
            client,
            Arc::new(FsImageStore::new(&config.image_cache_dir)),
            Arc::new(BadHashRegistry::from_hashes(&scrape.bad_image_hashes)),
            config.max_image_bytes,
        ))
    }

    #[must_use]
    pub fn registry(&self) -> &BadHashRegistry {
        &self.registry
    }

    /// Resolves `url` (relative URLs against `base`) to a local cache entry,
    /// downloading it at most once.
    ///
    /// # Errors
    ///
    /// - [`ImageCacheError::InvalidUrl`] when the URL cannot be normalized
    /// - [`ImageCacheError::BadImageAsset`] for deny-listed hashes, oversized
    ///   payloads and non-image responses
    /// - [`ImageCacheError::Download`] / [`ImageCacheError::Io`] for network
    ///   and store failures
    pub async fn resolve(&self, url: &str, base: Option<&str>) -> Result<CacheEntry, ImageCacheError> {
        let normalized =
            normalize_image_url(url, base).ok_or_else(|| ImageCacheError::InvalidUrl(url.to_owned()))?;
        let hash = url_hash(&normalized);

        if self.registry.contains(&hash) {
            tracing::debug!(url = %normalized, hash = %hash, "refusing deny-listed image");
            return Err(ImageCacheError::BadImageAsset {
                hash,
                reason: "hash is deny-listed".to_owned(),
            });
        }

        if let Some(entry) = self.store.get(&hash).await? {
            return Ok(entry);
        }

        let download = {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            in_flight
                .entry(hash.clone())
                .or_insert_with(|| {
                    download(
                        self.client.clone(),
                        Arc::clone(&self.store),
                        hash.clone(),
                        normalized.clone(),
                        self.max_bytes,
                    )
                    .boxed()
                    .shared()
                })
                .clone()
        };

        let result = download.clone().await;

        {
            let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            if in_flight.get(&hash).is_some_and(|f| f.ptr_eq(&download)) {
                in_flight.remove(&hash);
            }
        }

        if let Err(e) = &result {
            tracing::warn!(url = %normalized, error = %e, "image resolve failed");
        }
        result
    }

    /// Resolves several URLs concurrently, keeping input order.
    pub async fn resolve_many(
        &self,
        urls: &[&str],
        base: Option<&str>,
    ) -> Vec<Result<CacheEntry, ImageCacheError>> {
        futures::future::join_all(urls.iter().map(|url| self.resolve(url, base))).await
    }

    /// Deny-lists `hash` and deletes any entry already stored for it.
    /// Returns whether a stored entry was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ImageCacheError::InvalidHash`] or a store error.
    pub async fn deny(&self, hash: &str) -> Result<bool, ImageCacheError> {
        let hash = hash.trim().to_ascii_lowercase();
        if self.registry.insert(&hash)? {
            tracing::info!(hash = %hash, "image hash deny-listed");
        }
        self.store.remove(&hash).await
    }
}

async fn download(
    client: reqwest::Client,
    store: Arc<dyn ImageStore>,
    hash: String,
    url: String,
    max_bytes: u64,
) -> Result<CacheEntry, ImageCacheError> {
    // Another resolver may have finished between our store miss and now.
    if let Some(entry) = store.get(&hash).await? {
        return Ok(entry);
    }

    let oversized = |hash: &str| ImageCacheError::BadImageAsset {
        hash: hash.to_owned(),
        reason: format!("payload exceeds {max_bytes} bytes"),
    };

    let mut response = client
        .get(&url)
        .send()
        .await
        .map_err(|e| ImageCacheError::Download(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(ImageCacheError::Download(format!("HTTP {status} for {url}")));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if extension_for(&content_type).is_none() {
        return Err(ImageCacheError::BadImageAsset {
            hash,
            reason: format!("not an image (content type {content_type:?})"),
        });
    }
    if response.content_length().is_some_and(|len| len > max_bytes) {
        return Err(oversized(&hash));
    }

    let mut bytes: Vec<u8> = Vec::new();
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| ImageCacheError::Download(e.to_string()))?
    {
        if (bytes.len() + chunk.len()) as u64 > max_bytes {
            return Err(oversized(&hash));
        }
        bytes.extend_from_slice(&chunk);
    }

    let entry = store.put(&hash, &content_type, &bytes).await?;
    tracing::debug!(url = %url, path = %entry.local_path.display(), bytes = bytes.len(), "image cached");
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_hash_is_sha1_hex() {
        assert_eq!(url_hash(""), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert!(wsdb_core::is_sha1_hex(&url_hash("https://img.dhgate.com/a.jpg")));
    }

    #[tokio::test]
    async fn bare_extension_is_invalid_url() {
        let cache = ImageCache::new(
            reqwest::Client::new(),
            Arc::new(FsImageStore::new(std::env::temp_dir().join("wsdb-unused"))),
            Arc::new(BadHashRegistry::new()),
            1024,
        );
        assert_eq!(
            cache.resolve("jpg", None).await,
            Err(ImageCacheError::InvalidUrl("jpg".to_owned()))
        );
    }

    #[tokio::test]
    async fn deny_rejects_malformed_hash() {
        let cache = ImageCache::new(
            reqwest::Client::new(),
            Arc::new(FsImageStore::new(std::env::temp_dir().join("wsdb-unused"))),
            Arc::new(BadHashRegistry::new()),
            1024,
        );
        assert!(matches!(cache.deny("xyz").await, Err(ImageCacheError::InvalidHash(_))));
    }
}
