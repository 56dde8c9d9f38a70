use std::collections::HashSet;
use std::path::Path;
use std::sync::{PoisonError, RwLock};

use tokio::io::AsyncWriteExt;
use wsdb_core::is_sha1_hex;

use super::ImageCacheError;

/// Append-only set of URL hashes known to be placeholders, banners or
/// supplier logos. Hashes are stored lowercase.
#[derive(Debug, Default)]
pub struct BadHashRegistry {
    hashes: RwLock<HashSet<String>>,
}

impl BadHashRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the registry, skipping anything that is not a 40-character hex digest.
    pub fn from_hashes<I, S>(hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let registry = Self::new();
        for hash in hashes {
            if let Err(e) = registry.insert(hash.as_ref()) {
                tracing::warn!(error = %e, "skipping bad image hash seed");
            }
        }
        registry
    }

    #[must_use]
    pub fn contains(&self, hash: &str) -> bool {
        self.hashes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&hash.to_ascii_lowercase())
    }

    /// Adds `hash`; returns `true` if it was not already present.
    ///
    /// # Errors
    ///
    /// Returns [`ImageCacheError::InvalidHash`] for anything but a SHA-1 hex digest.
    pub fn insert(&self, hash: &str) -> Result<bool, ImageCacheError> {
        let hash = hash.trim();
        if !is_sha1_hex(hash) {
            return Err(ImageCacheError::InvalidHash(hash.to_owned()));
        }
        Ok(self
            .hashes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(hash.to_ascii_lowercase()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.hashes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds every hash listed in a newline-delimited file. Blank lines and
    /// `#` comments are ignored. A missing file adds nothing.
    ///
    /// # Errors
    ///
    /// Returns [`ImageCacheError::Io`] if the file exists but cannot be read.
    pub async fn load_file(&self, path: &Path) -> Result<usize, ImageCacheError> {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(ImageCacheError::Io(format!("{}: {e}", path.display()))),
        };
        let mut added = 0;
        for line in content.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match self.insert(line) {
                Ok(true) => added += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping deny-list line"),
            }
        }
        Ok(added)
    }

    /// Appends `hash` to a newline-delimited deny-list file, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ImageCacheError::Io`] on write failure.
    pub async fn append_to_file(path: &Path, hash: &str) -> Result<(), ImageCacheError> {
        let io_err = |e: std::io::Error| ImageCacheError::Io(format!("{}: {e}", path.display()));
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(io_err)?;
        file.write_all(format!("{}\n", hash.to_ascii_lowercase()).as_bytes())
            .await
            .map_err(io_err)?;
        file.flush().await.map_err(io_err)
    }
}
