use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct FilterConfig {
    #[validate(range(min = 1))]
    pub expected_items: u64,
    #[validate(range(exclusive_min = 0.0, exclusive_max = 1.0))]
    pub false_positive_rate: f64,
    #[validate(length(min = 1))]
    pub key_prefix: String,
    // Expiry of each rotating key, and the rotation period
    #[validate(range(min = 1))]
    pub ttl_secs: u64,
    pub enable_degrade: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_items: 1_000_000,
            false_positive_rate: 0.01,
            key_prefix: "bloom:".to_string(),
            ttl_secs: 86_400, // 24h
            enable_degrade: false,
        }
    }
}
