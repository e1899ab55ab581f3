use serde::Deserialize;
use std::time::Duration;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct RedisConfig {
    #[validate(url)]
    pub url: String,
    #[validate(range(min = 1, max = 256))]
    pub pool_size: usize,
    // Per-round-trip budget is base_timeout_ms * (hash_count + 1)
    #[validate(range(min = 1))]
    pub base_timeout_ms: u64,
    #[validate(range(min = 10))]
    pub connection_timeout_ms: u64,
    #[validate(range(min = 1))]
    pub max_command_attempts: u32,
    pub reconnect_max_attempts: u32,
    #[validate(range(min = 10))]
    pub reconnect_delay_ms: u32,
    #[validate(range(min = 10))]
    pub reconnect_max_delay_ms: u32,
}

impl RedisConfig {
    pub fn base_timeout(&self) -> Duration {
        Duration::from_millis(self.base_timeout_ms)
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 8,
            base_timeout_ms: 50,
            connection_timeout_ms: 1_000,
            max_command_attempts: 1,
            reconnect_max_attempts: 3,
            reconnect_delay_ms: 100,
            reconnect_max_delay_ms: 500,
        }
    }
}
