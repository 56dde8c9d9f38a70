use crate::app_config::{AppConfig, Environment};
use crate::quality::ClassificationConfig;
use crate::ConfigError;

/// Load application configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config() -> Result<AppConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_app_config_from_env()
}

/// Load application configuration from environment variables already in the process.
///
/// Unlike [`load_app_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if values are invalid.
pub fn load_app_config_from_env() -> Result<AppConfig, ConfigError> {
    build_app_config(|key| std::env::var(key))
}

/// Build application configuration using the provided env-var lookup function.
///
/// The parsing/validation logic is decoupled from the process environment so
/// it can be tested with a plain `HashMap` lookup.
fn build_app_config<F>(lookup: F) -> Result<AppConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    use std::path::PathBuf;

    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let optional = |var: &str| -> Option<String> {
        lookup(var)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u32>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<u64>().map_err(|e| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: e.to_string(),
        })
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let raw = or_default(var, default);
        raw.parse::<usize>()
            .map_err(|e| ConfigError::InvalidEnvVar {
                var: var.to_string(),
                reason: e.to_string(),
            })
    };

    let parse_bool = |var: &str, default: &str| -> Result<bool, ConfigError> {
        let raw = or_default(var, default);
        parse_flag(&raw).ok_or_else(|| ConfigError::InvalidEnvVar {
            var: var.to_string(),
            reason: format!("expected true/false, got '{raw}'"),
        })
    };

    let env = parse_environment(&or_default("WSDB_ENV", "development"))?;
    let log_level = or_default("WSDB_LOG_LEVEL", "info");
    let scrape_config_path =
        PathBuf::from(or_default("WSDB_SCRAPE_CONFIG_PATH", "./config/scrape.yaml"));
    let listings_path = PathBuf::from(or_default("WSDB_LISTINGS_PATH", "./data/listings.json"));
    let image_cache_dir = PathBuf::from(or_default("WSDB_IMAGE_CACHE_DIR", "./data/images"));

    let request_timeout_secs = parse_u64("WSDB_REQUEST_TIMEOUT_SECS", "30")?;
    let user_agent = or_default(
        "WSDB_USER_AGENT",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    );
    let max_retries = parse_u32("WSDB_MAX_RETRIES", "2")?;

    let headless_default = parse_bool("WSDB_HEADLESS_DEFAULT", "true")?;
    let headless_max_contexts = parse_usize("WSDB_HEADLESS_MAX_CONTEXTS", "2")?;
    if headless_max_contexts == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "WSDB_HEADLESS_MAX_CONTEXTS".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let browserless_url = optional("WSDB_BROWSERLESS_URL");
    let browserless_token = optional("WSDB_BROWSERLESS_TOKEN");

    let heal_concurrency = parse_usize("WSDB_HEAL_CONCURRENCY", "4")?;
    let heal_batch_size = parse_usize("WSDB_HEAL_BATCH_SIZE", "50")?;
    if heal_batch_size == 0 {
        return Err(ConfigError::InvalidEnvVar {
            var: "WSDB_HEAL_BATCH_SIZE".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let max_image_bytes = parse_u64("WSDB_MAX_IMAGE_BYTES", "5242880")?;

    let classification = ClassificationConfig {
        min_attributes_for_correct: parse_usize("WSDB_MIN_ATTRIBUTES_FOR_CORRECT", "5")?,
        require_tier_for_correct: parse_bool("WSDB_REQUIRE_TIER_FOR_CORRECT", "true")?,
        weak_requires_all_empty: parse_bool("WSDB_WEAK_REQUIRES_ALL_EMPTY", "true")?,
    };

    let platforms = parse_platform_list(&or_default("WSDB_PLATFORMS", "dhgate,made_in_china"));
    if platforms.is_empty() {
        return Err(ConfigError::InvalidEnvVar {
            var: "WSDB_PLATFORMS".to_string(),
            reason: "at least one platform must be enabled".to_string(),
        });
    }
    let alibaba_session_cookie = optional("WSDB_ALIBABA_SESSION_COOKIE");
    let audit_schedule = optional("WSDB_AUDIT_SCHEDULE");

    Ok(AppConfig {
        env,
        log_level,
        scrape_config_path,
        listings_path,
        image_cache_dir,
        request_timeout_secs,
        user_agent,
        max_retries,
        headless_default,
        headless_max_contexts,
        browserless_url,
        browserless_token,
        heal_concurrency,
        heal_batch_size,
        max_image_bytes,
        classification,
        platforms,
        alibaba_session_cookie,
        audit_schedule,
    })
}

/// Parse a string into an `Environment` variant.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidEnvVar`] for anything other than
/// `development`, `test`, or `production`.
fn parse_environment(s: &str) -> Result<Environment, ConfigError> {
    match s {
        "development" => Ok(Environment::Development),
        "test" => Ok(Environment::Test),
        "production" => Ok(Environment::Production),
        other => Err(ConfigError::InvalidEnvVar {
            var: "WSDB_ENV".to_string(),
            reason: format!("unknown environment '{other}'"),
        }),
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Splits a comma-separated platform list, lowercasing and dropping blanks
/// and repeats while keeping first-seen order.
fn parse_platform_list(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for id in raw.split(',').map(|s| s.trim().to_ascii_lowercase()) {
        if !id.is_empty() && !out.contains(&id) {
            out.push(id);
        }
    }
    out
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
