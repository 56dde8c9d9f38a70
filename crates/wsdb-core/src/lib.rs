pub mod app_config;
pub mod config;
pub mod detail;
pub mod quality;
pub mod scrape_config;

pub use app_config::{AppConfig, Environment};
pub use config::{load_app_config, load_app_config_from_env};
pub use detail::{Attribute, DetailRecord, ListingStub, PriceTier, Supplier};
pub use quality::{classify, classify_stored, ClassificationConfig, QualityClass};
pub use scrape_config::{
    is_sha1_hex, load_scrape_config, parse_scrape_config, BucketConfig, ScrapeConfig,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },

    #[error("failed to read scrape config at {path}: {source}")]
    ScrapeFileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scrape config: {0}")]
    ScrapeFileParse(#[source] serde_yaml::Error),

    #[error("scrape config validation failed: {0}")]
    Validation(String),
}
