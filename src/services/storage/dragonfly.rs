use async_trait::async_trait;
use fred::{
    clients::Pool as FredPool,
    error::{Error as FredError, ErrorKind as FredErrorKind},
    prelude::{ClientLike, KeysInterface},
    types::{
        config::{Config, ConnectionConfig, PerformanceConfig, ReconnectPolicy, Server, ServerConfig},
        ClusterHash, CustomCommand, Value,
    },
};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

use super::BitStore;
use crate::config::redis::RedisConfig;
use crate::errors::{StoreError, StoreErrorKind};
use crate::services::metrics;

/// Redis strings cap at 512 MiB, so bit offsets must stay below 2^32.
pub const REDIS_MAX_BITS: u64 = 1 << 32;

/// Bit store backed by a Redis-compatible server through a fred connection pool.
pub struct RedisBitStore {
    pool: FredPool,
    url: String,
}

impl RedisBitStore {
    /// # Errors
    /// [`StoreErrorKind::Connection`] when the URL is malformed or the pool cannot connect.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let parsed_url = Url::parse(&config.url)
            .map_err(|e| StoreError::connection(format!("Invalid URL {}: {}", config.url, e)))?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| StoreError::connection(format!("No host in URL {}", config.url)))?
            .to_string();
        let port = parsed_url.port().unwrap_or(6379);

        let redis_config = Config {
            server: ServerConfig::Centralized {
                server: Server::new(host, port),
            },
            ..Default::default()
        };

        // Round trip deadlines are enforced by the caller.
        let perf_config = PerformanceConfig {
            default_command_timeout: Duration::ZERO,
            ..Default::default()
        };

        let connection_config = ConnectionConfig {
            connection_timeout: Duration::from_millis(config.connection_timeout_ms),
            max_command_attempts: config.max_command_attempts,
            ..Default::default()
        };

        let policy = ReconnectPolicy::new_linear(
            config.reconnect_max_attempts,
            config.reconnect_max_delay_ms,
            config.reconnect_delay_ms,
        );

        let pool = FredPool::new(
            redis_config,
            Some(perf_config),
            Some(connection_config),
            Some(policy),
            config.pool_size,
        )
        .map_err(classify)?;

        let _ = pool.connect();
        pool.wait_for_connect().await.map_err(classify)?;
        info!(url = %config.url, pool_size = config.pool_size, "Connected to bit store");

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }
}

fn getbit() -> CustomCommand {
    CustomCommand::new_static("GETBIT", ClusterHash::FirstKey, false)
}

fn setbit() -> CustomCommand {
    CustomCommand::new_static("SETBIT", ClusterHash::FirstKey, false)
}

/// Maps a fred error onto the crate's store error classification.
fn classify(e: FredError) -> StoreError {
    let kind = match e.kind() {
        FredErrorKind::Timeout => StoreErrorKind::Timeout,
        FredErrorKind::IO | FredErrorKind::Canceled => StoreErrorKind::Connection,
        _ => StoreErrorKind::Command,
    };
    StoreError::new(kind, e.to_string())
}

fn record(op: &'static str, start: Instant, result: &Result<impl Sized, StoreError>) {
    match result {
        Ok(_) => metrics::record_store_latency(op, start),
        Err(e) => metrics::record_store_error(op, e.kind.as_str()),
    }
}

#[async_trait]
impl BitStore for RedisBitStore {
    async fn get_bits(&self, key: &str, offsets: &[u64]) -> Result<Vec<bool>, StoreError> {
        let start = Instant::now();
        let pipeline = self.pool.next().pipeline();
        for &offset in offsets {
            let _: () = pipeline
                .custom(getbit(), vec![Value::from(key), Value::from(offset as i64)])
                .await
                .map_err(classify)?;
        }

        let result = pipeline
            .all::<Vec<i64>>()
            .await
            .map_err(classify)
            .and_then(|bits| {
                if bits.len() != offsets.len() {
                    return Err(StoreError::command(format!(
                        "GETBIT pipeline returned {} replies for {} offsets",
                        bits.len(),
                        offsets.len()
                    )));
                }
                Ok(bits.into_iter().map(|b| b == 1).collect::<Vec<bool>>())
            });
        record("get_bits", start, &result);
        result
    }

    async fn set_bits(&self, key: &str, offsets: &[u64], ttl_secs: u64) -> Result<(), StoreError> {
        let start = Instant::now();
        let pipeline = self.pool.next().pipeline();
        for &offset in offsets {
            let _: () = pipeline
                .custom(setbit(), vec![Value::from(key), Value::from(offset as i64), Value::from(1_i64)])
                .await
                .map_err(classify)?;
        }
        let _: () = pipeline
            .expire(key, ttl_secs as i64, None)
            .await
            .map_err(classify)?;

        let result = pipeline.all::<Vec<Value>>().await.map(|_| ()).map_err(classify);
        record("set_bits", start, &result);
        result
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let start = Instant::now();
        let result = self
            .pool
            .next()
            .expire::<i64, _>(key, ttl_secs as i64, None)
            .await
            .map(|_| ())
            .map_err(classify);
        record("expire", start, &result);
        result
    }

    async fn close(&self) -> Result<(), StoreError> {
        debug!(url = %self.url, "Closing bit store pool");
        self.pool.quit().await.map_err(classify)
    }

    fn max_bits(&self) -> Option<u64> {
        Some(REDIS_MAX_BITS)
    }
}
