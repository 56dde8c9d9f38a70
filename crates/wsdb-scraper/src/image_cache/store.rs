use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Serialize;

use super::ImageCacheError;

/// Content types the cache accepts, with the extension each is stored under.
const IMAGE_TYPES: &[(&str, &str)] = &[
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
    ("image/bmp", "bmp"),
    ("image/svg+xml", "svg"),
];

/// File extension for an image content type, `None` for anything else.
#[must_use]
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(ct, _)| ct.eq_ignore_ascii_case(content_type))
        .map(|(_, ext)| *ext)
}

fn content_type_for(extension: &str) -> Option<&'static str> {
    IMAGE_TYPES
        .iter()
        .find(|(_, ext)| *ext == extension)
        .map(|(ct, _)| *ct)
}

/// A resolved image on the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub hash: String,
    pub local_path: PathBuf,
    pub content_type: String,
}

/// Backing store for cached image bytes, keyed by URL hash.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>, ImageCacheError>;

    /// Writes `bytes` atomically; readers never observe a partial file.
    async fn put(
        &self,
        hash: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<CacheEntry, ImageCacheError>;

    /// Deletes every stored file for `hash`; returns whether anything was removed.
    async fn remove(&self, hash: &str) -> Result<bool, ImageCacheError>;
}

/// Filesystem store laid out as `<root>/<first two hex chars>/<hash>.<ext>`.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn shard_dir(&self, hash: &str) -> PathBuf {
        self.root.join(hash.get(..2).unwrap_or("00"))
    }

    fn path_for(&self, hash: &str, extension: &str) -> PathBuf {
        self.shard_dir(hash).join(format!("{hash}.{extension}"))
    }
}

fn io_error(path: &Path, e: &std::io::Error) -> ImageCacheError {
    ImageCacheError::Io(format!("{}: {e}", path.display()))
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn get(&self, hash: &str) -> Result<Option<CacheEntry>, ImageCacheError> {
        for (content_type, extension) in IMAGE_TYPES {
            let path = self.path_for(hash, extension);
            if tokio::fs::try_exists(&path)
                .await
                .map_err(|e| io_error(&path, &e))?
            {
                return Ok(Some(CacheEntry {
                    hash: hash.to_owned(),
                    local_path: path,
                    content_type: content_type_for(extension).unwrap_or(content_type).to_owned(),
                }));
            }
        }
        Ok(None)
    }

    async fn put(
        &self,
        hash: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> Result<CacheEntry, ImageCacheError> {
        let extension = extension_for(content_type).ok_or_else(|| ImageCacheError::BadImageAsset {
            hash: hash.to_owned(),
            reason: format!("unsupported content type {content_type:?}"),
        })?;
        let dir = self.shard_dir(hash);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error(&dir, &e))?;

        let final_path = self.path_for(hash, extension);
        let tmp_path = dir.join(format!(".{hash}.{}.tmp", uuid::Uuid::new_v4()));
        tokio::fs::write(&tmp_path, bytes)
            .await
            .map_err(|e| io_error(&tmp_path, &e))?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &final_path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(io_error(&final_path, &e));
        }

        Ok(CacheEntry {
            hash: hash.to_owned(),
            local_path: final_path,
            content_type: content_type_for(extension).unwrap_or(content_type).to_owned(),
        })
    }

    async fn remove(&self, hash: &str) -> Result<bool, ImageCacheError> {
        let mut removed = false;
        for (_, extension) in IMAGE_TYPES {
            let path = self.path_for(hash, extension);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path, &e)),
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0a1b2c3d4e5f60718293a4b5c6d7e8f901234567";

    fn temp_store() -> FsImageStore {
        FsImageStore::new(std::env::temp_dir().join(format!("wsdb-store-{}", uuid::Uuid::new_v4())))
    }

    #[test]
    fn extension_for_known_and_unknown_types() {
        assert_eq!(extension_for("image/jpeg"), Some("jpg"));
        assert_eq!(extension_for("IMAGE/PNG"), Some("png"));
        assert_eq!(extension_for("text/html"), None);
    }

    #[tokio::test]
    async fn put_then_get_uses_sharded_layout() {
        let store = temp_store();
        assert!(store.get(HASH).await.unwrap().is_none());

        let entry = store.put(HASH, "image/jpeg", b"\xff\xd8\xff").await.unwrap();
        assert_eq!(entry.local_path, store.root().join("0a").join(format!("{HASH}.jpg")));
        assert_eq!(entry.content_type, "image/jpeg");
        assert_eq!(store.get(HASH).await.unwrap(), Some(entry.clone()));

        let mut leftovers = tokio::fs::read_dir(store.root().join("0a")).await.unwrap();
        let mut names = Vec::new();
        while let Some(e) = leftovers.next_entry().await.unwrap() {
            names.push(e.file_name().to_string_lossy().into_owned());
        }
        assert_eq!(names, vec![format!("{HASH}.jpg")]);

        assert!(store.remove(HASH).await.unwrap());
        assert!(store.get(HASH).await.unwrap().is_none());
        assert!(!store.remove(HASH).await.unwrap());

        let _ = tokio::fs::remove_dir_all(store.root()).await;
    }

    #[tokio::test]
    async fn put_rejects_non_image_content() {
        let store = temp_store();
        let err = store.put(HASH, "text/html", b"<html>").await.unwrap_err();
        assert!(matches!(err, ImageCacheError::BadImageAsset { .. }));
    }
}
