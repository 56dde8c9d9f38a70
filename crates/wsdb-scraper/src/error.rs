use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScraperError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("rate bucket {bucket} exhausted (retry after {retry_after_ms}ms)")]
    RateLimited { bucket: String, retry_after_ms: u64 },

    #[error("invalid URL \"{url}\": {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("no adapter registered for platform \"{0}\"")]
    UnknownPlatform(String),

    #[error(transparent)]
    Config(#[from] wsdb_core::ConfigError),
}
