use std::path::PathBuf;

use crate::quality::ClassificationConfig;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Development,
    Test,
    Production,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Test => write!(f, "test"),
            Environment::Production => write!(f, "production"),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    pub env: Environment,
    pub log_level: String,
    pub scrape_config_path: PathBuf,
    pub listings_path: PathBuf,
    pub image_cache_dir: PathBuf,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    pub max_retries: u32,
    pub headless_default: bool,
    pub headless_max_contexts: usize,
    pub browserless_url: Option<String>,
    pub browserless_token: Option<String>,
    pub heal_concurrency: usize,
    pub heal_batch_size: usize,
    pub max_image_bytes: u64,
    pub classification: ClassificationConfig,
    /// Platform ids enabled for this process, in configured order.
    pub platforms: Vec<String>,
    pub alibaba_session_cookie: Option<String>,
    pub audit_schedule: Option<String>,
}

impl AppConfig {
    /// Returns `true` when `platform` appears in the enabled platform list.
    #[must_use]
    pub fn platform_enabled(&self, platform: &str) -> bool {
        self.platforms.iter().any(|p| p == platform)
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("env", &self.env)
            .field("log_level", &self.log_level)
            .field("scrape_config_path", &self.scrape_config_path)
            .field("listings_path", &self.listings_path)
            .field("image_cache_dir", &self.image_cache_dir)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("user_agent", &self.user_agent)
            .field("max_retries", &self.max_retries)
            .field("headless_default", &self.headless_default)
            .field("headless_max_contexts", &self.headless_max_contexts)
            .field("browserless_url", &self.browserless_url)
            .field(
                "browserless_token",
                &self.browserless_token.as_ref().map(|_| "[redacted]"),
            )
            .field("heal_concurrency", &self.heal_concurrency)
            .field("heal_batch_size", &self.heal_batch_size)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("classification", &self.classification)
            .field("platforms", &self.platforms)
            .field(
                "alibaba_session_cookie",
                &self.alibaba_session_cookie.as_ref().map(|_| "[redacted]"),
            )
            .field("audit_schedule", &self.audit_schedule)
            .finish()
    }
}
