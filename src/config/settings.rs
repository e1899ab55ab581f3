use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::env;
use validator::Validate;

use super::breaker::BreakerConfig;
use super::filter::FilterConfig;
use super::redis::RedisConfig;
use crate::errors::DedupError;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct Settings {
    #[validate(length(min = 1))]
    pub environment: String,
    #[validate(length(min = 1))]
    pub log_level: String,
    #[validate(nested)]
    pub redis: RedisConfig,
    #[validate(nested)]
    pub filter: FilterConfig,
    #[validate(nested)]
    pub breaker: BreakerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            log_level: "info".to_string(),
            redis: RedisConfig::default(),
            filter: FilterConfig::default(),
            breaker: BreakerConfig::default(),
        }
    }
}

/// Loads settings from `.env.<environment>` and `BLOOMGUARD_*` variables.
///
/// Nested fields use a double underscore, e.g. `BLOOMGUARD_FILTER__EXPECTED_ITEMS`.
///
/// # Errors
/// Returns [`DedupError::Settings`] when a variable cannot be parsed and
/// [`DedupError::Validation`] when a value is out of range.
pub fn load() -> Result<Settings, DedupError> {
    let env = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
    let env_file = match env.as_str() {
        "production" => ".env.production",
        _ => ".env.development",
    };

    dotenv::from_filename(env_file).ok();

    let config = Config::builder()
        .set_default("environment", env)?
        .add_source(
            Environment::with_prefix("BLOOMGUARD")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings = config
        .try_deserialize::<Settings>()
        .map_err(|e| ConfigError::Message(format!("Failed to deserialize settings: {}", e)))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.filter.key_prefix, "bloom:");
        assert_eq!(settings.filter.ttl_secs, 86_400);
        assert!(!settings.filter.enable_degrade);
        assert_eq!(settings.breaker.failure_threshold, 5);
        assert_eq!(settings.breaker.success_threshold, 2);
        assert_eq!(settings.breaker.open_timeout_ms, 10_000);
    }

    #[test]
    fn test_rejects_out_of_range_fpr() {
        let mut settings = Settings::default();
        settings.filter.false_positive_rate = 1.0;
        assert!(settings.validate().is_err());
        settings.filter.false_positive_rate = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_expected_items() {
        let mut settings = Settings::default();
        settings.filter.expected_items = 0;
        assert!(settings.validate().is_err());
    }
}
