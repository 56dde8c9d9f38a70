//! YAML scrape configuration: rate-bucket sizing and the seed deny-list of
//! known-bad image hashes.
//!
//! ```yaml
//! default_bucket:
//!   capacity: 10
//!   refill_rate: 1.0
//! rate_buckets:
//!   dhgate-detail:
//!     capacity: 30
//!     refill_rate: 0.5
//! bad_image_hashes:
//!   - 2fd4e1c67a2d28fced849ee1bb76e7391b93eb12
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Maximum tokens the bucket can hold.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_rate: f64,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            capacity: 10.0,
            refill_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScrapeConfig {
    #[serde(default)]
    pub default_bucket: BucketConfig,
    /// Bucket sizing keyed by bucket name, e.g. `"dhgate-detail"`.
    #[serde(default)]
    pub rate_buckets: BTreeMap<String, BucketConfig>,
    /// Lower-case SHA-1 hex digests of normalized image URLs known to serve
    /// placeholders, banners, or platform logos.
    #[serde(default)]
    pub bad_image_hashes: Vec<String>,
}

impl ScrapeConfig {
    /// Bucket sizing for `name`, falling back to the default bucket.
    #[must_use]
    pub fn bucket(&self, name: &str) -> BucketConfig {
        self.rate_buckets
            .get(name)
            .copied()
            .unwrap_or(self.default_bucket)
    }
}

/// Load and validate the scrape configuration from a YAML file.
///
/// A missing file yields the built-in defaults; a present but unreadable or
/// invalid file is an error.
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or fails validation.
pub fn load_scrape_config(path: &Path) -> Result<ScrapeConfig, ConfigError> {
    if !path.exists() {
        return Ok(ScrapeConfig::default());
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ScrapeFileIo {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_scrape_config(&content)
}

/// Parse and validate scrape configuration from YAML text.
///
/// # Errors
///
/// Returns `ConfigError` if the YAML cannot be parsed or fails validation.
pub fn parse_scrape_config(content: &str) -> Result<ScrapeConfig, ConfigError> {
    let mut config: ScrapeConfig =
        serde_yaml::from_str(content).map_err(ConfigError::ScrapeFileParse)?;
    validate_scrape_config(&mut config)?;
    Ok(config)
}

fn validate_scrape_config(config: &mut ScrapeConfig) -> Result<(), ConfigError> {
    validate_bucket("default_bucket", &config.default_bucket)?;
    for (name, bucket) in &config.rate_buckets {
        if name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "rate bucket name must be non-empty".to_string(),
            ));
        }
        validate_bucket(name, bucket)?;
    }

    let mut seen = HashSet::new();
    let mut hashes = Vec::with_capacity(config.bad_image_hashes.len());
    for raw in &config.bad_image_hashes {
        let hash = raw.trim().to_ascii_lowercase();
        if !is_sha1_hex(&hash) {
            return Err(ConfigError::Validation(format!(
                "bad image hash '{raw}' is not a 40-character hex digest"
            )));
        }
        if seen.insert(hash.clone()) {
            hashes.push(hash);
        }
    }
    config.bad_image_hashes = hashes;

    Ok(())
}

fn validate_bucket(name: &str, bucket: &BucketConfig) -> Result<(), ConfigError> {
    if !(bucket.capacity.is_finite() && bucket.capacity >= 1.0) {
        return Err(ConfigError::Validation(format!(
            "bucket '{name}' capacity must be at least 1, got {}",
            bucket.capacity
        )));
    }
    if !(bucket.refill_rate.is_finite() && bucket.refill_rate > 0.0) {
        return Err(ConfigError::Validation(format!(
            "bucket '{name}' refill_rate must be positive, got {}",
            bucket.refill_rate
        )));
    }
    Ok(())
}

/// Returns `true` for a 40-character lower-case hex string.
#[must_use]
pub fn is_sha1_hex(s: &str) -> bool {
    s.len() == 40 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "2fd4e1c67a2d28fced849ee1bb76e7391b93eb12";

    #[test]
    fn parses_buckets_and_hashes() {
        let yaml = format!(
            "default_bucket:\n  capacity: 5\n  refill_rate: 2.0\nrate_buckets:\n  dhgate-detail:\n    capacity: 30\n    refill_rate: 0.5\nbad_image_hashes:\n  - \"{}\"\n  - \"{HASH}\"\n",
            HASH.to_uppercase()
        );
        let config = parse_scrape_config(&yaml).unwrap();
        assert_eq!(
            config.bucket("dhgate-detail"),
            BucketConfig {
                capacity: 30.0,
                refill_rate: 0.5
            }
        );
        assert_eq!(config.bucket("unknown").capacity, 5.0);
        assert_eq!(config.bad_image_hashes, vec![HASH.to_owned()]);
    }

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse_scrape_config("{}").unwrap();
        assert_eq!(config.default_bucket, BucketConfig::default());
        assert!(config.rate_buckets.is_empty());
        assert!(config.bad_image_hashes.is_empty());
    }

    #[test]
    fn rejects_zero_refill_rate() {
        let yaml = "rate_buckets:\n  a-search:\n    capacity: 3\n    refill_rate: 0\n";
        let err = parse_scrape_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("refill_rate")));
    }

    #[test]
    fn rejects_fractional_capacity_below_one() {
        let yaml = "default_bucket:\n  capacity: 0.5\n  refill_rate: 1\n";
        let err = parse_scrape_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("capacity")));
    }

    #[test]
    fn rejects_malformed_hash() {
        let yaml = "bad_image_hashes:\n  - not-a-hash\n";
        let err = parse_scrape_config(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(ref m) if m.contains("not-a-hash")));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let path = std::env::temp_dir().join("wsdb-no-such-scrape-config.yaml");
        let config = load_scrape_config(&path).unwrap();
        assert!(config.rate_buckets.is_empty());
    }

    #[test]
    fn invalid_yaml_is_parse_error() {
        let err = parse_scrape_config("rate_buckets: [").unwrap_err();
        assert!(matches!(err, ConfigError::ScrapeFileParse(_)));
    }

    #[test]
    fn bundled_scrape_config_is_valid() {
        let config = parse_scrape_config(include_str!("../../../config/scrape.yaml")).unwrap();
        assert_eq!(config.bucket("dhgate-detail").capacity, 20.0);
        assert_eq!(config.bucket("unknown-bucket"), config.default_bucket);
    }
}
