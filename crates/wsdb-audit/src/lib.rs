//! Listing store contract, never-regress rules, the audit & heal sweep and
//! the manual detail-refresh trigger.

pub mod error;
pub mod heal;
pub mod refresh;
pub mod store;
pub mod sweep;

pub use error::{AuditError, StoreError};
pub use heal::{dominates, regresses, scrub_images, should_persist_heal, stored_quality};
pub use refresh::{refresh_by_url, refresh_listing, RefreshOutcome};
pub use store::{JsonFileListingStore, ListingStore, MemoryListingStore, StoredListing};
pub use sweep::{AuditScheduler, HealState, PlatformCounts, SweepReport};
