use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("listing store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("listing store is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("listing {0} not found")]
    NotFound(i64),
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Scraper(#[from] wsdb_scraper::ScraperError),

    #[error("no stored listing matches {0}")]
    ListingNotFound(String),
}
