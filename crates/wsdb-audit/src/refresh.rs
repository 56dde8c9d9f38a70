//! Manual detail refresh for a single listing.

use chrono::Utc;
use serde::Serialize;
use wsdb_core::{classify, ClassificationConfig, QualityClass};
use wsdb_scraper::{normalize, AdapterRegistry, DetailOptions, FailureKind};

use crate::error::AuditError;
use crate::heal::{regresses, scrub_images, stored_quality};
use crate::store::{ListingStore, StoredListing};

/// What a refresh did, reported back to whoever asked for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefreshOutcome {
    /// The fresh record was written.
    Updated { quality: QualityClass },
    /// The fresh record would have regressed the stored one; nothing written.
    /// `quality` is that of the stored record.
    Kept { quality: QualityClass },
    /// The fetch produced nothing; the stored record is untouched.
    Failed { kind: FailureKind },
}

impl RefreshOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, RefreshOutcome::Failed { .. })
    }
}

impl std::fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RefreshOutcome::Updated { quality } => write!(f, "updated ({quality})"),
            RefreshOutcome::Kept { quality } => {
                write!(f, "kept stored record ({quality}); fresh fetch was less complete")
            }
            RefreshOutcome::Failed { kind } => write!(f, "upstream fetch failed: {kind}"),
        }
    }
}

/// Re-fetches listing `id`, bypassing the negative memo, and writes the
/// result unless it would regress the stored record.
///
/// # Errors
///
/// Returns [`AuditError::ListingNotFound`] for an unknown id,
/// [`AuditError::Scraper`] when no adapter serves the listing's platform, and
/// [`AuditError::Store`] when the store cannot be read or written.
pub async fn refresh_listing(
    store: &dyn ListingStore,
    registry: &AdapterRegistry,
    id: i64,
    config: &ClassificationConfig,
) -> Result<RefreshOutcome, AuditError> {
    let listing = store
        .get(id)
        .await?
        .ok_or_else(|| AuditError::ListingNotFound(id.to_string()))?;
    refresh_stored(store, registry, &listing, config).await
}

/// [`refresh_listing`] keyed by listing URL instead of id.
///
/// # Errors
///
/// See [`refresh_listing`].
pub async fn refresh_by_url(
    store: &dyn ListingStore,
    registry: &AdapterRegistry,
    url: &str,
    config: &ClassificationConfig,
) -> Result<RefreshOutcome, AuditError> {
    let listing = store
        .get_by_url(url)
        .await?
        .ok_or_else(|| AuditError::ListingNotFound(url.to_owned()))?;
    refresh_stored(store, registry, &listing, config).await
}

async fn refresh_stored(
    store: &dyn ListingStore,
    registry: &AdapterRegistry,
    listing: &StoredListing,
    config: &ClassificationConfig,
) -> Result<RefreshOutcome, AuditError> {
    let adapter = registry.require(&listing.stub.platform)?;
    let options = DetailOptions {
        force: true,
        ..DetailOptions::default()
    };
    let fetch = adapter.fetch_detail(&listing.stub.source_url, &options).await;
    let Some(raw) = fetch.raw else {
        let kind = fetch.failure.unwrap_or(FailureKind::Permanent);
        tracing::warn!(id = listing.id, url = %listing.stub.source_url, failure = %kind, "refresh failed");
        return Ok(RefreshOutcome::Failed { kind });
    };

    let fresh = normalize(Some(&raw), &listing.stub);
    // Compare against the record as stored now, not as read before the fetch.
    let current = store
        .get(listing.id)
        .await?
        .ok_or_else(|| AuditError::ListingNotFound(listing.id.to_string()))?;
    if let Some(old) = current.detail.as_ref().map(scrub_images) {
        if regresses(&fresh, &old) {
            let quality = stored_quality(Some(&old), config);
            tracing::info!(id = listing.id, quality = %quality, "refresh kept stored record");
            return Ok(RefreshOutcome::Kept { quality });
        }
    }

    store.upsert_detail(listing.id, &fresh, Utc::now()).await?;
    let quality = classify(&fresh, config);
    tracing::info!(id = listing.id, quality = %quality, "refresh updated record");
    Ok(RefreshOutcome::Updated { quality })
}
