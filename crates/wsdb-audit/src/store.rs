//! Listing Store contract and two implementations: an in-memory map for
//! tests and one-shot runs, and a JSON file for the CLI.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use wsdb_core::{ClassificationConfig, DetailRecord, ListingStub, QualityClass};
use wsdb_scraper::canonical::canonical_listing_key;

use crate::error::StoreError;
use crate::heal::stored_quality;

/// A persisted listing: the search stub plus its latest detail record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredListing {
    pub id: i64,
    pub stub: ListingStub,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<DetailRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ListingStore: Send + Sync {
    /// Listings with `id > after`, ascending by id, optionally filtered by platform.
    async fn list_after(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredListing>, StoreError>;

    /// Like [`ListingStore::list_after`], restricted to listings whose stored
    /// record classifies as weak.
    async fn find_weak(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
        config: &ClassificationConfig,
    ) -> Result<Vec<StoredListing>, StoreError>;

    async fn get(&self, id: i64) -> Result<Option<StoredListing>, StoreError>;

    /// Looks a listing up by URL, comparing canonical listing keys.
    async fn get_by_url(&self, url: &str) -> Result<Option<StoredListing>, StoreError>;

    /// Replaces the detail record of listing `id`.
    async fn upsert_detail(
        &self,
        id: i64,
        detail: &DetailRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Inserts `stub` and returns its id. A stub whose URL is already stored
    /// replaces the old stub but keeps the id and detail record.
    async fn insert_stub(&self, stub: ListingStub) -> Result<i64, StoreError>;
}

fn url_key(url: &str) -> String {
    canonical_listing_key(url).unwrap_or_else(|| url.trim().to_owned())
}

/// On-disk and in-memory shape of the whole store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    next_id: i64,
    listings: BTreeMap<i64, StoredListing>,
}

impl Snapshot {
    fn page<'a>(
        &'a self,
        platform: Option<&'a str>,
        after: Option<i64>,
    ) -> impl Iterator<Item = &'a StoredListing> + 'a {
        let start = after.map_or(i64::MIN, |a| a.saturating_add(1));
        self.listings
            .range(start..)
            .map(|(_, listing)| listing)
            .filter(move |l| platform.map_or(true, |p| l.stub.platform == p))
    }
}

#[derive(Debug, Default)]
pub struct MemoryListingStore {
    inner: Mutex<Snapshot>,
}

impl MemoryListingStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            inner: Mutex::new(snapshot),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut Snapshot) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    fn snapshot(&self) -> Snapshot {
        self.with(|s| s.clone())
    }

    /// Inserts a listing with an explicit id and detail record, for seeding.
    pub fn seed(&self, listing: StoredListing) {
        self.with(|s| {
            s.next_id = s.next_id.max(listing.id);
            s.listings.insert(listing.id, listing);
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.with(|s| s.listings.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn list_after(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredListing>, StoreError> {
        Ok(self.with(|s| s.page(platform, after).take(limit).cloned().collect()))
    }

    async fn find_weak(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
        config: &ClassificationConfig,
    ) -> Result<Vec<StoredListing>, StoreError> {
        Ok(self.with(|s| {
            s.page(platform, after)
                .filter(|l| stored_quality(l.detail.as_ref(), config) == QualityClass::Weak)
                .take(limit)
                .cloned()
                .collect()
        }))
    }

    async fn get(&self, id: i64) -> Result<Option<StoredListing>, StoreError> {
        Ok(self.with(|s| s.listings.get(&id).cloned()))
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<StoredListing>, StoreError> {
        let key = url_key(url);
        Ok(self.with(|s| {
            s.listings
                .values()
                .find(|l| url_key(&l.stub.source_url) == key)
                .cloned()
        }))
    }

    async fn upsert_detail(
        &self,
        id: i64,
        detail: &DetailRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.with(|s| {
            let listing = s.listings.get_mut(&id).ok_or(StoreError::NotFound(id))?;
            listing.detail = Some(detail.clone());
            listing.detail_updated_at = Some(updated_at);
            Ok(())
        })
    }

    async fn insert_stub(&self, stub: ListingStub) -> Result<i64, StoreError> {
        let key = url_key(&stub.source_url);
        Ok(self.with(|s| {
            if let Some(existing) = s
                .listings
                .values_mut()
                .find(|l| url_key(&l.stub.source_url) == key)
            {
                existing.stub = stub;
                return existing.id;
            }
            s.next_id += 1;
            let id = s.next_id;
            s.listings.insert(
                id,
                StoredListing {
                    id,
                    stub,
                    detail: None,
                    detail_updated_at: None,
                },
            );
            id
        }))
    }
}

/// A listing store backed by one JSON file.
///
/// Every call re-reads the file under the store lock and every write
/// applies its change to that fresh copy, so several processes sharing the
/// file (a scheduled audit next to one-off refreshes) see each other's
/// writes instead of overwriting them with a stale snapshot. Writes go to a
/// temporary sibling and are renamed into place, so a crash mid-write
/// leaves the previous file intact.
#[derive(Debug)]
pub struct JsonFileListingStore {
    path: PathBuf,
    memory: MemoryListingStore,
    lock: tokio::sync::Mutex<()>,
}

impl JsonFileListingStore {
    /// Opens the store at `path`; a missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the file exists but cannot be read, or
    /// [`StoreError::Json`] if it is not a valid store file.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let snapshot = load(&path).await?;
        Ok(Self {
            memory: MemoryListingStore::from_snapshot(snapshot),
            path,
            lock: tokio::sync::Mutex::new(()),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replaces the in-memory copy with the file's current contents.
    /// Callers hold `lock`.
    async fn reload(&self) -> Result<(), StoreError> {
        let snapshot = load(&self.path).await?;
        self.memory.with(|s| *s = snapshot);
        Ok(())
    }

    /// Writes the in-memory copy back to disk. Callers hold `lock`.
    async fn persist(&self) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(&self.memory.snapshot())?;
        let io_err = |source: std::io::Error| StoreError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        if let Err(source) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(io_err(source));
        }
        Ok(())
    }
}

async fn load(path: &Path) -> Result<Snapshot, StoreError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Snapshot::default()),
        Err(source) => Err(StoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[async_trait]
impl ListingStore for JsonFileListingStore {
    async fn list_after(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<StoredListing>, StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        self.memory.list_after(platform, after, limit).await
    }

    async fn find_weak(
        &self,
        platform: Option<&str>,
        after: Option<i64>,
        limit: usize,
        config: &ClassificationConfig,
    ) -> Result<Vec<StoredListing>, StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        self.memory.find_weak(platform, after, limit, config).await
    }

    async fn get(&self, id: i64) -> Result<Option<StoredListing>, StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        self.memory.get(id).await
    }

    async fn get_by_url(&self, url: &str) -> Result<Option<StoredListing>, StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        self.memory.get_by_url(url).await
    }

    async fn upsert_detail(
        &self,
        id: i64,
        detail: &DetailRecord,
        updated_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        self.memory.upsert_detail(id, detail, updated_at).await?;
        self.persist().await
    }

    async fn insert_stub(&self, stub: ListingStub) -> Result<i64, StoreError> {
        let _guard = self.lock.lock().await;
        self.reload().await?;
        let id = self.memory.insert_stub(stub).await?;
        self.persist().await?;
        Ok(id)
    }
}
