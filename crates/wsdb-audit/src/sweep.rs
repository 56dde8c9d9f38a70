//! The audit & heal sweep.
//!
//! A sweep pages through stored listings in ascending id order, counts
//! weak records per platform, and re-fetches the weak ones with bounded
//! concurrency. A fresh record is written only when [`should_persist_heal`]
//! allows it, so repeating a sweep (for example after a restart) can never
//! leave a listing worse off than it was.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use wsdb_core::{classify, AppConfig, ClassificationConfig, QualityClass};
use wsdb_scraper::{normalize, AdapterRegistry, DetailOptions};

use crate::error::AuditError;
use crate::heal::{should_persist_heal, stored_quality};
use crate::store::{ListingStore, StoredListing};

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_BATCH_SIZE: usize = 50;

/// Per-listing state within one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealState {
    Pending,
    InFlight,
    Healed,
    StillWeak,
    Failed,
}

impl std::fmt::Display for HealState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HealState::Pending => "pending",
            HealState::InFlight => "in_flight",
            HealState::Healed => "healed",
            HealState::StillWeak => "still_weak",
            HealState::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformCounts {
    pub total: usize,
    pub weak_before: usize,
    pub weak_after: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// `{platform: {total, weakBefore, weakAfter}}`.
    pub platforms: BTreeMap<String, PlatformCounts>,
    pub healed: usize,
    pub still_weak: usize,
    pub failed: usize,
    /// Id of the last listing visited; pass it to
    /// [`AuditScheduler::sweep_from`] to resume.
    pub last_cursor: Option<i64>,
}

impl SweepReport {
    fn record(&mut self, platform: String, state: HealState) {
        let counts = self.platforms.entry(platform).or_default();
        match state {
            HealState::Healed => self.healed += 1,
            HealState::StillWeak => {
                self.still_weak += 1;
                counts.weak_after += 1;
            }
            HealState::Failed => {
                self.failed += 1;
                counts.weak_after += 1;
            }
            HealState::Pending | HealState::InFlight => {}
        }
    }
}

pub struct AuditScheduler {
    store: Arc<dyn ListingStore>,
    registry: AdapterRegistry,
    classification: ClassificationConfig,
    concurrency: usize,
    batch_size: usize,
    headless: bool,
    cancel: Option<CancellationToken>,
}

impl AuditScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn ListingStore>,
        registry: AdapterRegistry,
        classification: ClassificationConfig,
    ) -> Self {
        Self {
            store,
            registry,
            classification,
            concurrency: DEFAULT_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            headless: true,
            cancel: None,
        }
    }

    /// Scheduler with concurrency, batch size and thresholds taken from `config`.
    #[must_use]
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn ListingStore>,
        registry: AdapterRegistry,
    ) -> Self {
        Self::new(store, registry, config.classification)
            .with_concurrency(config.heal_concurrency)
            .with_batch_size(config.heal_batch_size)
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Whether heal fetches may escalate to headless rendering (default on).
    #[must_use]
    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Sweeps every stored listing, or only those of `platform`.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::Store`] only when a page of listings cannot be
    /// read. Failures of individual listings are logged and counted.
    pub async fn sweep(&self, platform: Option<&str>) -> Result<SweepReport, AuditError> {
        self.sweep_from(platform, None).await
    }

    /// Sweeps listings with ids greater than `cursor`.
    ///
    /// # Errors
    ///
    /// See [`AuditScheduler::sweep`].
    pub async fn sweep_from(
        &self,
        platform: Option<&str>,
        cursor: Option<i64>,
    ) -> Result<SweepReport, AuditError> {
        let mut report = SweepReport {
            last_cursor: cursor,
            ..SweepReport::default()
        };
        let mut cursor = cursor;

        loop {
            if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(cursor = ?cursor, "audit: sweep cancelled");
                break;
            }

            let batch = self
                .store
                .list_after(platform, cursor, self.batch_size)
                .await?;
            let Some(last) = batch.last() else {
                break;
            };
            cursor = Some(last.id);
            let batch_len = batch.len();

            let mut weak = Vec::new();
            for listing in batch {
                let counts = report
                    .platforms
                    .entry(listing.stub.platform.clone())
                    .or_default();
                counts.total += 1;
                if stored_quality(listing.detail.as_ref(), &self.classification)
                    == QualityClass::Weak
                {
                    counts.weak_before += 1;
                    tracing::debug!(id = listing.id, state = %HealState::Pending, "audit: queued");
                    weak.push(listing);
                }
            }

            let outcomes = stream::iter(weak.into_iter().map(|listing| self.heal_one(listing)))
                .buffer_unordered(self.concurrency)
                .collect::<Vec<_>>()
                .await;
            for (platform, state) in outcomes {
                report.record(platform, state);
            }

            report.last_cursor = cursor;
            tracing::debug!(cursor = ?cursor, listings = batch_len, "audit: batch done");
            if batch_len < self.batch_size {
                break;
            }
        }

        tracing::info!(
            healed = report.healed,
            still_weak = report.still_weak,
            failed = report.failed,
            "audit: sweep finished"
        );
        Ok(report)
    }

    /// Re-fetches one weak listing. Never returns an error: every failure is
    /// logged and reported as [`HealState::Failed`].
    async fn heal_one(&self, listing: StoredListing) -> (String, HealState) {
        let platform = listing.stub.platform.clone();
        let state = self.heal_state(&listing).await;
        tracing::debug!(id = listing.id, platform = %platform, state = %state, "audit: listing done");
        (platform, state)
    }

    async fn heal_state(&self, listing: &StoredListing) -> HealState {
        let Some(adapter) = self.registry.get(&listing.stub.platform) else {
            tracing::warn!(
                id = listing.id,
                platform = %listing.stub.platform,
                "audit: no adapter registered, skipping"
            );
            return HealState::Failed;
        };

        tracing::debug!(id = listing.id, state = %HealState::InFlight, "audit: fetching");
        let options = DetailOptions {
            force: false,
            headless: Some(self.headless),
            cancel: self.cancel.clone(),
        };
        let fetch = adapter.fetch_detail(&listing.stub.source_url, &options).await;
        let Some(raw) = fetch.raw else {
            tracing::warn!(
                id = listing.id,
                url = %listing.stub.source_url,
                failure = ?fetch.failure,
                attempts = fetch.attempts.len(),
                "audit: heal fetch failed"
            );
            return HealState::Failed;
        };

        let fresh = normalize(Some(&raw), &listing.stub);
        // Another writer may have replaced the record while the fetch ran;
        // judge the heal against what is stored now.
        let current = match self.store.get(listing.id).await {
            Ok(Some(current)) => current.detail,
            Ok(None) => {
                tracing::warn!(id = listing.id, "audit: listing vanished during heal");
                return HealState::Failed;
            }
            Err(e) => {
                tracing::warn!(id = listing.id, error = %e, "audit: failed to re-read listing");
                return HealState::Failed;
            }
        };
        if !should_persist_heal(current.as_ref(), &fresh, &self.classification) {
            let quality = stored_quality(current.as_ref(), &self.classification);
            return if quality == QualityClass::Weak {
                HealState::StillWeak
            } else {
                HealState::Healed
            };
        }
        if let Err(e) = self
            .store
            .upsert_detail(listing.id, &fresh, Utc::now())
            .await
        {
            tracing::warn!(id = listing.id, error = %e, "audit: failed to persist healed record");
            return HealState::Failed;
        }

        if classify(&fresh, &self.classification) == QualityClass::Weak {
            HealState::StillWeak
        } else {
            HealState::Healed
        }
    }
}
